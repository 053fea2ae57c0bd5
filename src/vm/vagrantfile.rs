//! Vagrantfile rendering. The output depends only on the [`VmConfig`].

use crate::sync::SyncMethod;
use crate::vm::config::VmConfig;
use std::fmt::Write;

pub const FILE_NAME: &str = "Vagrantfile";

const RSYNC_ARGS: [&str; 4] = ["--verbose", "--archive", "--delete", "-z"];

/// Render a Vagrantfile for `config`.
pub fn render(config: &VmConfig) -> String {
    let mut out = String::new();

    out.push_str("# Generated by vagrant-mcp. Edits are overwritten on config updates.\n");
    out.push_str("Vagrant.configure(\"2\") do |config|\n");
    let _ = writeln!(out, "  config.vm.box = {}", ruby_str(&config.box_name));
    out.push('\n');

    out.push_str("  config.vm.provider \"virtualbox\" do |vb|\n");
    out.push_str("    vb.gui = false\n");
    let _ = writeln!(out, "    vb.name = {}", ruby_str(&config.name));
    let _ = writeln!(out, "    vb.memory = {}", config.memory);
    let _ = writeln!(out, "    vb.cpus = {}", config.cpu);
    out.push_str("  end\n");

    if !config.ports.is_empty() {
        out.push('\n');
    }
    for port in &config.ports {
        let _ = writeln!(
            out,
            "  config.vm.network \"forwarded_port\", guest: {}, host: {}, host_ip: \"127.0.0.1\"",
            port.guest, port.host
        );
    }

    out.push('\n');
    out.push_str(&synced_folder(config));

    for (index, line) in config.environment.iter().enumerate() {
        if index == 0 {
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "  config.vm.provision \"shell\", name: {}, inline: {}",
            ruby_str(&format!("environment-{}", index + 1)),
            ruby_str(line)
        );
    }

    for (index, script) in config.provisioners.iter().enumerate() {
        if index == 0 {
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "  config.vm.provision \"shell\", name: {}, inline: {}",
            ruby_str(&format!("provisioner-{}", index + 1)),
            ruby_str(script)
        );
    }

    out.push_str("end\n");
    out
}

fn synced_folder(config: &VmConfig) -> String {
    let head = format!(
        "  config.vm.synced_folder {}, {}",
        ruby_str(config.host_mount()),
        ruby_str(config.guest_mount())
    );

    match config.sync_type {
        SyncMethod::Rsync => format!(
            "{},\n    type: \"rsync\",\n    rsync__exclude: {},\n    rsync__args: {}\n",
            head,
            ruby_list(config.sync_exclude_patterns.iter().map(String::as_str)),
            ruby_list(RSYNC_ARGS.iter().copied())
        ),
        SyncMethod::Nfs => format!(
            "{},\n    type: \"nfs\",\n    nfs_udp: false,\n    nfs_version: 4\n",
            head
        ),
        SyncMethod::Smb => format!("{},\n    type: \"smb\"\n", head),
        SyncMethod::Shared => format!("{}\n", head),
    }
}

/// Single-quoted Ruby literal; only `\` and `'` need escaping.
pub fn ruby_str(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn ruby_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let items: Vec<String> = items.map(ruby_str).collect();
    format!("[{}]", items.join(", "))
}
