use crate::error::{Result, VagrantMcpError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Captured output of one provisioner invocation.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Thin driver over the `vagrant` CLI. Every call runs inside a VM directory.
///
/// Clones share one lock: at most one `vagrant` process runs at a time,
/// whichever tool, sync flush or resource started it.
#[derive(Debug, Clone)]
pub struct Vagrant {
    binary: PathBuf,
    timeout: Duration,
    lock: Arc<Mutex<()>>,
}

impl Vagrant {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Check if the vagrant binary can be found
    pub fn is_installed(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    /// Run `vagrant <args>` in `dir`. A non-zero exit is returned, not raised.
    pub async fn run(
        &self,
        dir: &Path,
        args: &[&str],
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let operation = format!("vagrant {}", args.first().copied().unwrap_or_default());
        let timeout = timeout.unwrap_or(self.timeout);

        let _guard = tokio::select! {
            guard = self.lock.lock() => guard,
            _ = cancel.cancelled() => return Err(VagrantMcpError::Cancelled),
        };
        debug!(dir = %dir.display(), ?args, "running vagrant");

        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    VagrantMcpError::DependencyMissing(format!(
                        "{} not found. Install from https://developer.hashicorp.com/vagrant/install",
                        self.binary.display()
                    ))
                } else {
                    VagrantMcpError::failed(&operation, e)
                }
            })?;

        // Dropping the wait future drops the child, and kill_on_drop terminates it.
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|e| VagrantMcpError::failed(&operation, e))?,
            _ = cancel.cancelled() => return Err(VagrantMcpError::Cancelled),
            _ = tokio::time::sleep(timeout) => {
                return Err(VagrantMcpError::Timeout { operation, after: timeout })
            }
        };

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run and turn a non-zero exit into `OperationFailed` carrying stderr.
    async fn run_checked(
        &self,
        dir: &Path,
        args: &[&str],
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let output = self.run(dir, args, None, cancel).await?;
        if !output.success() {
            return Err(VagrantMcpError::failed(
                format!("vagrant {}", args.join(" ")),
                failure_message(&output),
            ));
        }
        Ok(output)
    }

    /// Boot the machine, creating the directory first if needed
    pub async fn up(&self, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        self.run_checked(dir, &["up"], cancel).await.map(|_| ())
    }

    pub async fn halt(&self, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        self.run_checked(dir, &["halt"], cancel).await.map(|_| ())
    }

    pub async fn destroy_forced(&self, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        self.run_checked(dir, &["destroy", "-f"], cancel)
            .await
            .map(|_| ())
    }

    /// Raw `status --machine-readable` output
    pub async fn status_machine_readable(
        &self,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.run_checked(dir, &["status", "--machine-readable"], cancel)
            .await
            .map(|o| o.stdout)
    }

    /// Raw `ssh-config` output
    pub async fn ssh_config(&self, dir: &Path, cancel: &CancellationToken) -> Result<String> {
        self.run_checked(dir, &["ssh-config"], cancel)
            .await
            .map(|o| o.stdout)
    }

    pub async fn rsync(&self, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        self.run_checked(dir, &["rsync"], cancel).await.map(|_| ())
    }

    pub async fn rsync_back(&self, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        self.run_checked(dir, &["rsync-back"], cancel)
            .await
            .map(|_| ())
    }

    /// Copy a host file or directory to `destination` on the guest
    pub async fn upload(
        &self,
        dir: &Path,
        source: &Path,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let source = source.to_string_lossy();
        self.run_checked(dir, &["upload", &source, destination], cancel)
            .await
            .map(|_| ())
    }

    /// Check the Vagrantfile in `dir`; a rejection is `ValidationFailed`.
    pub async fn validate(&self, dir: &Path, cancel: &CancellationToken) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let output = self.run(dir, &["validate"], None, cancel).await?;
        if !output.success() {
            return Err(VagrantMcpError::ValidationFailed(failure_message(&output)));
        }
        Ok(())
    }
}

fn failure_message(output: &ProcessOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("exit code {}", output.exit_code)
    } else {
        stderr.to_string()
    }
}
