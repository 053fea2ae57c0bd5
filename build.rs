use std::env;
use std::process::Command;

/// Exposes `VAGRANT_MCP_VERSION` to the crate: the package version, with the
/// short commit hash appended on debug builds.
fn main() {
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let debug = env::var("PROFILE").map(|p| p == "debug").unwrap_or(false);

    let full_version = match (debug, short_commit()) {
        (true, Some(hash)) => format!("{}-dev+{}", version, hash),
        (true, None) => format!("{}-dev", version),
        (false, _) => version,
    };

    println!("cargo:rustc-env=VAGRANT_MCP_VERSION={}", full_version);
    println!("cargo:rerun-if-changed=.git/HEAD");
}

fn short_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
