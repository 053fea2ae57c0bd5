//! Remote shell transport: runs one command on a guest over `ssh`.

use crate::error::{Result, VagrantMcpError};
use crate::vm::ssh_config::SshConfig;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Receives every output line; the flag is true for stderr lines.
pub type OutputCallback = dyn Fn(String, bool) + Send + Sync;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    /// -1 when the process could not be awaited
    pub exit_code: i32,
}

/// Output of [`RemoteShell::run_raw`]: stdout untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct RemoteShell {
    binary: PathBuf,
}

impl RemoteShell {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Client arguments for running `command` against `config`
    pub fn args(config: &SshConfig, command: &str) -> Vec<String> {
        vec![
            "-p".to_string(),
            config.port.to_string(),
            "-i".to_string(),
            config.identity_file.clone(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            format!("{}@{}", config.user, config.host_name),
            command.to_string(),
        ]
    }

    /// Run `command` on the guest, streaming lines to `on_output` as they arrive.
    ///
    /// Both pipes are drained before the process is reaped. There is no
    /// implicit timeout; only `cancel` stops a running command.
    pub async fn run(
        &self,
        config: &SshConfig,
        command: &str,
        cancel: &CancellationToken,
        on_output: Option<&OutputCallback>,
    ) -> Result<RemoteOutput> {
        let mut child = self.spawn(config, command)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let streams = async {
            tokio::join!(
                read_lines(stdout, false, on_output),
                read_lines(stderr, true, on_output)
            )
        };

        let (stdout, stderr) = tokio::select! {
            captured = streams => captured,
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                return Err(VagrantMcpError::Cancelled);
            }
        };

        let exit_code = tokio::select! {
            status = child.wait() => status.ok().and_then(|s| s.code()).unwrap_or(-1),
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                return Err(VagrantMcpError::Cancelled);
            }
        };

        Ok(RemoteOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Run `command` and keep stdout exactly as the guest wrote it.
    pub async fn run_raw(
        &self,
        config: &SshConfig,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<RawOutput> {
        let child = self.spawn(config, command)?;
        // Dropping the wait future drops the child, and kill_on_drop terminates it.
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|e| VagrantMcpError::failed("ssh", e))?,
            _ = cancel.cancelled() => return Err(VagrantMcpError::Cancelled),
        };
        Ok(RawOutput {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn spawn(&self, config: &SshConfig, command: &str) -> Result<Child> {
        debug!(host = %config.host_name, port = config.port, command, "running remote command");
        Command::new(&self.binary)
            .args(Self::args(config, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VagrantMcpError::DependencyMissing(format!(
                        "{} not found",
                        self.binary.display()
                    ))
                } else {
                    VagrantMcpError::failed("ssh", e)
                }
            })
    }
}

async fn read_lines<R>(pipe: Option<R>, is_stderr: bool, on_output: Option<&OutputCallback>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(pipe) = pipe else {
        return captured;
    };

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                captured.push_str(line);
                captured.push('\n');
                if let Some(callback) = on_output {
                    callback(line.to_string(), is_stderr);
                }
            }
            Err(e) => {
                debug!(error = %e, is_stderr, "stopped reading remote output");
                break;
            }
        }
    }
    captured
}
