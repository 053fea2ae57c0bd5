//! Three-way merge of diverged host/guest copies via `diff3`.

use crate::error::{Result, VagrantMcpError};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    pub text: String,
    /// False when `text` carries conflict markers
    pub clean: bool,
}

/// Reconstruct a merge base: the lines both sides share at the start and
/// at the end, without overlapping.
pub fn common_base(host: &str, guest: &str) -> String {
    let h: Vec<&str> = host.lines().collect();
    let g: Vec<&str> = guest.lines().collect();

    let prefix = h.iter().zip(&g).take_while(|(a, b)| a == b).count();
    let max_suffix = h.len().min(g.len()) - prefix;
    let suffix = h
        .iter()
        .rev()
        .zip(g.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let mut lines: Vec<&str> = h[..prefix].to_vec();
    lines.extend_from_slice(&h[h.len() - suffix..]);

    let mut base = lines.join("\n");
    if !base.is_empty() && host.ends_with('\n') && guest.ends_with('\n') {
        base.push('\n');
    }
    base
}

/// Merge `host` and `guest` against their [`common_base`].
pub async fn three_way(host: &str, guest: &str, cancel: &CancellationToken) -> Result<MergeOutput> {
    let scratch = tempfile::tempdir()?;
    let host_file = scratch.path().join("host");
    let base_file = scratch.path().join("base");
    let guest_file = scratch.path().join("guest");
    tokio::fs::write(&host_file, host).await?;
    tokio::fs::write(&base_file, common_base(host, guest)).await?;
    tokio::fs::write(&guest_file, guest).await?;

    let child = Command::new("diff3")
        .args(["-m", "-L", "host", "-L", "base", "-L", "guest"])
        .arg(&host_file)
        .arg(&base_file)
        .arg(&guest_file)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VagrantMcpError::DependencyMissing("diff3 (GNU diffutils)".to_string())
            } else {
                VagrantMcpError::failed("merge", e)
            }
        })?;

    let output = tokio::select! {
        output = child.wait_with_output() => output.map_err(|e| VagrantMcpError::failed("merge", e))?,
        _ = cancel.cancelled() => return Err(VagrantMcpError::Cancelled),
    };

    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    match output.status.code() {
        Some(0) => Ok(MergeOutput { text, clean: true }),
        Some(1) => Ok(MergeOutput { text, clean: false }),
        _ => Err(VagrantMcpError::failed(
            "merge",
            String::from_utf8_lossy(&output.stderr).trim(),
        )),
    }
}
