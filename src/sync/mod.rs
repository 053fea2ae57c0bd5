//! Host/guest file synchronization.
//!
//! The engine keeps one [`SyncConfig`] and [`SyncStatus`] per registered VM and
//! moves files through a [`SyncBackend`], which the VM manager implements.

pub mod engine;
pub mod merge;
pub mod search;
pub mod watcher;

pub use engine::SyncEngine;

use crate::error::{Result, VagrantMcpError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default guest directory the project is mounted at.
pub const GUEST_MOUNT: &str = "/vagrant";

pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Transport used to move files between host and guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMethod {
    #[default]
    Rsync,
    Nfs,
    Smb,
    #[serde(alias = "virtualbox")]
    Shared,
}

impl SyncMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMethod::Rsync => "rsync",
            SyncMethod::Nfs => "nfs",
            SyncMethod::Smb => "smb",
            SyncMethod::Shared => "shared",
        }
    }
}

impl FromStr for SyncMethod {
    type Err = VagrantMcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rsync" => Ok(SyncMethod::Rsync),
            "nfs" => Ok(SyncMethod::Nfs),
            "smb" => Ok(SyncMethod::Smb),
            "shared" | "virtualbox" => Ok(SyncMethod::Shared),
            other => Err(VagrantMcpError::InvalidInput(format!(
                "unknown sync method: {} (expected rsync, nfs, smb or shared)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    ToVm,
    FromVm,
    #[default]
    Bidirectional,
}

impl FromStr for SyncDirection {
    type Err = VagrantMcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "to_vm" | "to-vm" | "to_guest" => Ok(SyncDirection::ToVm),
            "from_vm" | "from-vm" | "from_guest" => Ok(SyncDirection::FromVm),
            "bidirectional" | "both" => Ok(SyncDirection::Bidirectional),
            other => Err(VagrantMcpError::InvalidInput(format!(
                "unknown sync direction: {}",
                other
            ))),
        }
    }
}

/// Per-VM sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub vm_name: String,
    pub project_path: PathBuf,
    #[serde(default)]
    pub method: SyncMethod,
    #[serde(default)]
    pub direction: SyncDirection,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub watch_enabled: bool,
    #[serde(default = "default_watch_interval", with = "duration_ms")]
    pub watch_interval: Duration,
    /// Guest directory mirroring `project_path`; `/vagrant` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_path: Option<String>,
}

impl SyncConfig {
    pub fn new(vm_name: impl Into<String>, project_path: impl Into<PathBuf>) -> Self {
        Self {
            vm_name: vm_name.into(),
            project_path: project_path.into(),
            method: SyncMethod::default(),
            direction: SyncDirection::default(),
            exclude_patterns: Vec::new(),
            watch_enabled: false,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            guest_path: None,
        }
    }

    pub fn guest_mount(&self) -> &str {
        self.guest_path.as_deref().unwrap_or(GUEST_MOUNT)
    }

    /// Guest location of a host path under the project, if it is under it.
    pub fn guest_path_for(&self, host_path: &Path) -> Option<String> {
        let relative = host_path.strip_prefix(&self.project_path).ok()?;
        let relative = relative.to_string_lossy();
        if relative.is_empty() {
            Some(self.guest_mount().to_string())
        } else {
            Some(format!("{}/{}", self.guest_mount().trim_end_matches('/'), relative))
        }
    }

    /// True when the base name of `path` matches one of the exclude globs.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.exclude_patterns
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, name))
    }
}

fn default_watch_interval() -> Duration {
    DEFAULT_WATCH_INTERVAL
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Modification,
    Deletion,
    Creation,
}

/// A path whose host and guest copies diverged since the last sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub path: PathBuf,
    pub host_mod_time: Option<DateTime<Utc>>,
    pub guest_mod_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_content: Option<String>,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub last_sync_time: DateTime<Utc>,
    pub in_progress: bool,
    pub conflicts: Vec<SyncConflict>,
    pub synchronized_files: usize,
    pub error: Option<String>,
    pub last_sync_to_vm: Option<DateTime<Utc>>,
    pub last_sync_from_vm: Option<DateTime<Utc>>,
    pub total_syncs: u64,
    pub total_files_synced: u64,
    pub total_sync_time_ms: u64,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self {
            last_sync_time: Utc::now(),
            in_progress: false,
            conflicts: Vec::new(),
            synchronized_files: 0,
            error: None,
            last_sync_to_vm: None,
            last_sync_from_vm: None,
            total_syncs: 0,
            total_files_synced: 0,
            total_sync_time_ms: 0,
        }
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub synced_files: Vec<String>,
    pub sync_time_ms: u64,
}

/// How to settle a recorded conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    UseHost,
    UseGuest,
    Merge,
    KeepBoth,
}

impl FromStr for ResolutionStrategy {
    type Err = VagrantMcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "use_host" => Ok(ResolutionStrategy::UseHost),
            "use_vm" | "use_guest" => Ok(ResolutionStrategy::UseGuest),
            "merge" => Ok(ResolutionStrategy::Merge),
            "keep_both" => Ok(ResolutionStrategy::KeepBoth),
            other => Err(VagrantMcpError::InvalidInput(format!(
                "invalid resolution: {} (must be 'use_host', 'use_vm', 'merge', or 'keep_both')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    Resolved,
    /// Merge produced conflict markers; the file was written and synced anyway.
    ConflictsRetained,
}

/// File transport the engine drives. Implemented by the VM manager.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    fn base_dir(&self) -> &Path;

    async fn sync_to_vm(
        &self,
        name: &str,
        source: &Path,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn sync_from_vm(
        &self,
        name: &str,
        source: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
