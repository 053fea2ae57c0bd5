//! Stand-ins for `vagrant` and `ssh` so the server can run without VirtualBox.
//!
//! The fake `vagrant` keeps the machine state in a `.state` file inside the
//! VM directory; the fake `ssh` runs its last argument with the local shell.
//! Marker files in the bin directory switch on slow calls (`slow`) and
//! forced failures (`fail-<subcommand>`). Calls that start while another
//! one is still running are recorded in `overlaps`.
#![allow(dead_code)]

use serde_json::{json, Value};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vagrant_mcp::config::Settings;
use vagrant_mcp::exec::Executor;
use vagrant_mcp::server::{McpServer, Services};
use vagrant_mcp::sync::SyncEngine;
use vagrant_mcp::vm::ssh::RemoteShell;
use vagrant_mcp::vm::VmManager;

const FAKE_VAGRANT: &str = r#"#!/bin/sh
echo "$*" >> '@LOG@'
[ -e '@BIN@/.busy' ] && echo "$1" >> '@BIN@/overlaps'
touch '@BIN@/.busy'
trap "rm -f '@BIN@/.busy'" EXIT
[ -e '@BIN@/slow' ] && sleep 0.3
if [ -e "@BIN@/fail-$1" ]; then echo "forced $1 failure" >&2; exit 1; fi
case "$1" in
  validate) exit 0 ;;
  up) echo running > .state ;;
  halt) echo poweroff > .state ;;
  destroy) rm -f .state ;;
  status)
    if [ -f .state ]; then s=$(cat .state); else s=not_created; fi
    echo "1700000000,default,provider-name,virtualbox"
    echo "1700000000,default,state,$s"
    echo "1700000000,default,state-human-short,$s"
    ;;
  ssh-config)
    printf 'Host default\n  HostName 127.0.0.1\n  User vagrant\n  Port 2222\n  IdentityFile /tmp/fake_key\n'
    ;;
  upload)
    case "$3" in /tmp/*) cp -R "$2" "$3" ;; esac
    ;;
  rsync|rsync-back) ;;
  *) echo "unsupported: $1" >&2; exit 1 ;;
esac
"#;

const FAKE_SSH: &str = r#"#!/bin/sh
echo "$*" >> '@LOG@'
for last; do :; done
exec sh -c "$last"
"#;

pub struct Fixture {
    pub bin: TempDir,
    pub base: TempDir,
    pub project: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let fixture = Self {
            bin: TempDir::new().unwrap(),
            base: TempDir::new().unwrap(),
            project: TempDir::new().unwrap(),
        };
        write_script(&fixture.vagrant_bin(), FAKE_VAGRANT, &fixture.vagrant_log(), fixture.bin.path());
        write_script(&fixture.ssh_bin(), FAKE_SSH, &fixture.ssh_log(), fixture.bin.path());
        fixture
    }

    pub fn vagrant_bin(&self) -> PathBuf {
        self.bin.path().join("vagrant")
    }

    pub fn ssh_bin(&self) -> PathBuf {
        self.bin.path().join("ssh")
    }

    pub fn vagrant_log(&self) -> PathBuf {
        self.bin.path().join("vagrant.log")
    }

    pub fn ssh_log(&self) -> PathBuf {
        self.bin.path().join("ssh.log")
    }

    /// Logged vagrant invocations, one argument string per call.
    pub fn vagrant_calls(&self) -> Vec<String> {
        read_lines(&self.vagrant_log())
    }

    pub fn ssh_calls(&self) -> Vec<String> {
        read_lines(&self.ssh_log())
    }

    /// Make every later `vagrant <subcommand>` exit non-zero.
    pub fn fail(&self, subcommand: &str) {
        fs::write(self.bin.path().join(format!("fail-{}", subcommand)), "").unwrap();
    }

    /// Make every later vagrant call take a moment.
    pub fn slow(&self) {
        fs::write(self.bin.path().join("slow"), "").unwrap();
    }

    /// Subcommands that started while another vagrant call was running.
    pub fn overlaps(&self) -> Vec<String> {
        read_lines(&self.bin.path().join("overlaps"))
    }

    pub fn project_path(&self) -> String {
        self.project.path().to_string_lossy().into_owned()
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::new(self.base.path());
        settings.vagrant_bin = self.vagrant_bin();
        settings.ssh_bin = self.ssh_bin();
        settings
    }

    pub fn services(&self) -> Arc<Services> {
        let settings = self.settings();
        let vms = Arc::new(VmManager::new(&settings).unwrap());
        let sync = SyncEngine::new(vms.clone());
        let executor = Arc::new(Executor::new(
            vms.clone(),
            sync.clone(),
            RemoteShell::new(&settings.ssh_bin),
        ));
        Arc::new(Services { vms, sync, executor })
    }

    pub fn server(&self) -> McpServer {
        McpServer::new(self.services(), CancellationToken::new()).unwrap()
    }
}

fn write_script(path: &Path, template: &str, log: &Path, bin: &Path) {
    let script = template
        .replace("@LOG@", &log.to_string_lossy())
        .replace("@BIN@", &bin.to_string_lossy());
    fs::write(path, script).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn tool_request(id: u64, name: &str, params: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tool:execute",
        "params": {"name": name, "params": params},
    })
    .to_string()
}

pub fn resource_request(id: u64, uri: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "resource:get",
        "params": {"uri": uri},
    })
    .to_string()
}

/// Send one request line and parse the reply.
pub async fn call(server: &McpServer, line: &str) -> Value {
    let reply = server.handle_line(line).await.expect("request without reply");
    serde_json::from_str(&reply).unwrap()
}
