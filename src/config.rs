use crate::cli::{Cli, Transport};
use crate::error::{Result, VagrantMcpError};
use std::path::PathBuf;
use std::time::Duration;

/// Default ceiling for a single provisioner invocation.
pub const DEFAULT_PROVISIONER_TIMEOUT: Duration = Duration::from_secs(600);

/// Process-wide settings, read once at startup and passed to constructors.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub transport: Transport,
    pub port: u16,
    pub log_level: String,

    /// Provisioner executable (not configurable from the environment)
    pub vagrant_bin: PathBuf,

    /// Remote shell client executable
    pub ssh_bin: PathBuf,

    pub provisioner_timeout: Duration,
}

impl Settings {
    /// Settings with defaults for everything except the base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            transport: Transport::Stdio,
            port: 8080,
            log_level: "info".to_string(),
            vagrant_bin: PathBuf::from("vagrant"),
            ssh_bin: PathBuf::from("ssh"),
            provisioner_timeout: DEFAULT_PROVISIONER_TIMEOUT,
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let base_dir = match &cli.base_dir {
            Some(dir) => dir.clone(),
            None => default_base_dir()?,
        };

        let mut settings = Self::new(base_dir);
        settings.transport = cli.transport;
        settings.port = cli.port;
        settings.log_level = cli.log_level.clone();
        Ok(settings)
    }
}

/// `$HOME/.vagrant-mcp/vms`
pub fn default_base_dir() -> Result<PathBuf> {
    home_dir()
        .map(|home| home.join(".vagrant-mcp").join("vms"))
        .ok_or_else(|| {
            VagrantMcpError::InvalidInput(
                "HOME is not set; pass --base-dir or set VM_BASE_DIR".to_string(),
            )
        })
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
