use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a VM as reported by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    NotCreated,
    Running,
    Stopped,
    Suspended,
    Error,
    Unknown,
}

impl VmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmState::NotCreated => "not_created",
            VmState::Running => "running",
            VmState::Stopped => "stopped",
            VmState::Suspended => "suspended",
            VmState::Error => "error",
            VmState::Unknown => "unknown",
        }
    }

    /// Map a provisioner state value (`running`, `poweroff`, ...) to a state
    pub fn from_provider_value(value: &str) -> Self {
        match value.trim() {
            "running" => VmState::Running,
            "poweroff" | "aborted" => VmState::Stopped,
            "saved" => VmState::Suspended,
            "not_created" => VmState::NotCreated,
            _ => VmState::Unknown,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse `vagrant status --machine-readable` output.
///
/// Records look like `timestamp,target,field,value`; only the first `state`
/// row is considered. No state row at all yields `VmState::Error`.
pub fn parse_machine_readable(output: &str) -> VmState {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.trim().splitn(4, ',').collect();
            (parts.len() == 4 && parts[2] == "state").then(|| parts[3])
        })
        .next()
        .map(VmState::from_provider_value)
        .unwrap_or(VmState::Error)
}
