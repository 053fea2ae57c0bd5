//! Runs commands inside VMs with sync before and after.

use crate::error::{Result, VagrantMcpError};
use crate::sync::{SyncEngine, GUEST_MOUNT};
use crate::utils::shell::{escape, export_prefix};
use crate::vm::ssh::{OutputCallback, RemoteShell};
use crate::vm::{VmManager, VmState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const HOST_CONTEXT_VIOLATION: &str = "SECURITY VIOLATION: Attempted to execute a shell command outside of a VM context. All commands must target a Vagrant VM.";

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub vm_name: String,
    /// Guest directory; relative paths are taken under the guest mount
    pub working_dir: String,
    pub environment: BTreeMap<String, String>,
    pub sync_before: bool,
    pub sync_after: bool,
}

impl ExecutionContext {
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandResult {
    /// -1 when the command did not run to completion
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackgroundTask {
    pub vm_name: String,
    pub command: String,
    pub log_file: String,
}

/// Command execution pipeline: guard, state check, pre-sync, remote run, post-sync.
///
/// Calls are serialized by the executor's own lock so a pre-sync, remote
/// run and post-sync stay together. Single `vagrant` invocations are
/// serialized separately inside [`crate::vm::vagrant::Vagrant`].
pub struct Executor {
    vms: Arc<VmManager>,
    sync: SyncEngine,
    shell: RemoteShell,
    lock: Mutex<()>,
}

impl Executor {
    pub fn new(vms: Arc<VmManager>, sync: SyncEngine, shell: RemoteShell) -> Self {
        Self {
            vms,
            sync,
            shell,
            lock: Mutex::new(()),
        }
    }

    pub async fn execute_command(
        &self,
        command: &str,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
        on_output: Option<&OutputCallback>,
    ) -> Result<CommandResult> {
        ensure_vm_context(&ctx.vm_name)?;
        let _guard = self.lock.lock().await;

        self.ensure_running(&ctx.vm_name, cancel).await?;
        if ctx.sync_before {
            self.sync_before(&ctx.vm_name, cancel).await?;
        }

        let started = Instant::now();
        let remote_command = compose_command(command, ctx)?;
        let ssh = self.vms.get_ssh_config(&ctx.vm_name, cancel).await?;
        let output = self
            .shell
            .run(&ssh, &remote_command, cancel, on_output)
            .await?;

        let result = CommandResult {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            vm = %ctx.vm_name,
            exit_code = result.exit_code,
            duration_s = result.duration_seconds,
            "command finished"
        );

        if ctx.sync_after {
            if let Err(e) = self.sync.sync_from_vm(&ctx.vm_name, None, cancel).await {
                warn!(vm = %ctx.vm_name, error = %e, "sync after command failed");
                return Err(VagrantMcpError::PartialResult {
                    message: format!("command completed but sync from VM failed: {}", e),
                    data: Box::new(serde_json::to_value(&result)?),
                });
            }
        }

        Ok(result)
    }

    /// Start `command` detached on the guest; output goes to `/tmp/bg_<vm>.log`.
    pub async fn execute_background(
        &self,
        command: &str,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<BackgroundTask> {
        ensure_vm_context(&ctx.vm_name)?;
        let _guard = self.lock.lock().await;

        self.ensure_running(&ctx.vm_name, cancel).await?;
        if ctx.sync_before {
            self.sync_before(&ctx.vm_name, cancel).await?;
        }

        let log_file = format!("/tmp/bg_{}.log", ctx.vm_name);
        let detached = format!("nohup sh -c {} > {} 2>&1 &", escape(command), escape(&log_file));
        let remote_command = compose_command(&detached, ctx)?;

        let ssh = self.vms.get_ssh_config(&ctx.vm_name, cancel).await?;
        let output = self.shell.run(&ssh, &remote_command, cancel, None).await?;
        if output.exit_code != 0 {
            return Err(VagrantMcpError::failed(
                "start background task",
                output.stderr.trim(),
            ));
        }

        info!(vm = %ctx.vm_name, log_file = %log_file, "background task started");
        Ok(BackgroundTask {
            vm_name: ctx.vm_name.clone(),
            command: command.to_string(),
            log_file,
        })
    }

    async fn ensure_running(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let state = self.vms.get_vm_state(name, cancel).await?;
        if state != VmState::Running {
            return Err(VagrantMcpError::InvalidState(format!(
                "VM is not running (current state: {})",
                state
            )));
        }
        Ok(())
    }

    async fn sync_before(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.sync
            .sync_to_vm(name, None, cancel)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                VagrantMcpError::Cancelled => e,
                other => VagrantMcpError::failed("sync to VM before command", other),
            })
    }
}

/// Refuse anything that could run on the host itself.
pub fn ensure_vm_context(vm_name: &str) -> Result<()> {
    if vm_name.trim().is_empty() || vm_name.eq_ignore_ascii_case("host") {
        return Err(VagrantMcpError::PermissionDenied(
            HOST_CONTEXT_VIOLATION.to_string(),
        ));
    }
    Ok(())
}

/// Prefix `command` with exports and a `cd` into the working directory.
pub fn compose_command(command: &str, ctx: &ExecutionContext) -> Result<String> {
    let mut composed = export_prefix(&ctx.environment)?;

    let wd = ctx.working_dir.trim();
    if !wd.is_empty() {
        let dir = if wd == GUEST_MOUNT || wd.starts_with(&format!("{}/", GUEST_MOUNT)) {
            wd.to_string()
        } else {
            format!("{}/{}", GUEST_MOUNT, wd.trim_start_matches('/'))
        };
        composed.push_str(&format!("cd {} && ", escape(&dir)));
    }

    composed.push_str(command);
    Ok(composed)
}
