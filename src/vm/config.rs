use crate::error::{Result, VagrantMcpError};
use crate::sync::{SyncMethod, GUEST_MOUNT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_BOX: &str = "ubuntu/focal64";
pub const DEFAULT_CPU: u32 = 2;
pub const DEFAULT_MEMORY_MB: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForward {
    pub guest: u16,
    pub host: u16,
}

/// Declarative VM definition, persisted as `vm.json` in the VM directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmConfig {
    pub name: String,
    #[serde(rename = "box")]
    pub box_name: String,
    pub cpu: u32,
    pub memory: u32,
    pub project_path: String,
    pub sync_type: SyncMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_path: Option<String>,
    #[serde(default)]
    pub sync_exclude_patterns: Vec<String>,
    #[serde(default)]
    pub ports: Vec<PortForward>,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub provisioners: Vec<String>,
}

impl VmConfig {
    pub fn new(name: impl Into<String>, project_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            box_name: DEFAULT_BOX.to_string(),
            cpu: DEFAULT_CPU,
            memory: DEFAULT_MEMORY_MB,
            project_path: project_path.into(),
            sync_type: SyncMethod::Rsync,
            host_path: None,
            guest_path: None,
            sync_exclude_patterns: default_excludes(),
            ports: Vec::new(),
            environment: Vec::new(),
            provisioners: Vec::new(),
        }
    }

    /// Build a config from a loosely-typed parameter map.
    ///
    /// Numbers may arrive as integers or floats. Unknown keys are ignored;
    /// a key of the wrong type is `InvalidInput`.
    pub fn from_params(name: &str, project_path: &str, params: &Map<String, Value>) -> Result<Self> {
        let mut config = Self::new(name, project_path);

        if let Some(v) = params.get("box") {
            config.box_name = as_string("box", v)?;
        }
        if let Some(v) = params.get("cpu") {
            config.cpu = as_u32("cpu", v)?;
        }
        if let Some(v) = params.get("memory") {
            config.memory = as_u32("memory", v)?;
        }
        if let Some(v) = params.get("sync_type") {
            config.sync_type = as_string("sync_type", v)?.parse()?;
        }
        if let Some(v) = params.get("host_path") {
            config.host_path = Some(as_string("host_path", v)?);
        }
        if let Some(v) = params.get("guest_path") {
            config.guest_path = Some(as_string("guest_path", v)?);
        }
        for key in ["exclude_patterns", "sync_exclude_patterns"] {
            if let Some(v) = params.get(key) {
                config.sync_exclude_patterns = as_string_list(key, v)?;
            }
        }
        if let Some(v) = params.get("ports") {
            config.ports = as_ports(v)?;
        }
        if let Some(v) = params.get("environment") {
            config.environment = as_string_list("environment", v)?;
        }
        if let Some(v) = params.get("provisioners") {
            config.provisioners = as_string_list("provisioners", v)?;
        }

        if config.cpu == 0 || config.memory == 0 {
            return Err(VagrantMcpError::InvalidInput(
                "cpu and memory must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn guest_mount(&self) -> &str {
        self.guest_path.as_deref().unwrap_or(GUEST_MOUNT)
    }

    /// Host directory shared with the guest
    pub fn host_mount(&self) -> &str {
        self.host_path.as_deref().unwrap_or(&self.project_path)
    }
}

fn default_excludes() -> Vec<String> {
    [".git", "node_modules", ".vagrant"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn type_error(key: &str, expected: &str) -> VagrantMcpError {
    VagrantMcpError::InvalidInput(format!("'{}' must be {}", key, expected))
}

fn as_string(key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| type_error(key, "a string"))
}

fn as_u32(key: &str, value: &Value) -> Result<u32> {
    let n = value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .ok_or_else(|| type_error(key, "a non-negative number"))?;
    u32::try_from(n).map_err(|_| type_error(key, "a 32-bit number"))
}

fn as_port(key: &str, value: &Value) -> Result<u16> {
    let n = as_u32(key, value)?;
    u16::try_from(n).map_err(|_| type_error(key, "a valid port number"))
}

fn as_string_list(key: &str, value: &Value) -> Result<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| type_error(key, "a list of strings"))?
        .iter()
        .map(|item| as_string(key, item))
        .collect()
}

fn as_ports(value: &Value) -> Result<Vec<PortForward>> {
    value
        .as_array()
        .ok_or_else(|| type_error("ports", "a list of {guest, host} objects"))?
        .iter()
        .map(|item| {
            let guest = item
                .get("guest")
                .ok_or_else(|| type_error("ports", "a list of {guest, host} objects"))?;
            // A bare guest port forwards to the same host port.
            let host = item.get("host").unwrap_or(guest);
            Ok(PortForward {
                guest: as_port("ports.guest", guest)?,
                host: as_port("ports.host", host)?,
            })
        })
        .collect()
}
