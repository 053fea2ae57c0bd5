use crate::error::{Result, VagrantMcpError};
use serde::Serialize;
use std::collections::BTreeMap;

const REQUIRED_KEYS: [&str; 4] = ["HostName", "User", "Port", "IdentityFile"];

/// Connection parameters extracted from `vagrant ssh-config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshConfig {
    pub host_name: String,
    pub user: String,
    pub port: u16,
    pub identity_file: String,

    /// Every key seen, including the required ones
    pub entries: BTreeMap<String, String>,
}

impl SshConfig {
    /// Parse line-oriented `Key Value` output.
    pub fn parse(output: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once(char::is_whitespace) {
                entries.insert(key.to_string(), unquote(value.trim()).to_string());
            }
        }

        if let Some(missing) = REQUIRED_KEYS.iter().find(|k| !entries.contains_key(**k)) {
            return Err(VagrantMcpError::ValidationFailed(format!(
                "ssh-config output is missing {}",
                missing
            )));
        }

        let port = entries["Port"].parse::<u16>().map_err(|_| {
            VagrantMcpError::ValidationFailed(format!("invalid ssh port: {}", entries["Port"]))
        })?;

        Ok(Self {
            host_name: entries["HostName"].clone(),
            user: entries["User"].clone(),
            port,
            identity_file: entries["IdentityFile"].clone(),
            entries,
        })
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
