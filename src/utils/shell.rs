use crate::error::{Result, VagrantMcpError};
use std::collections::BTreeMap;

/// Quote a string for POSIX `sh` using single quotes.
///
/// ```
/// use vagrant_mcp::utils::shell::escape;
///
/// assert_eq!(escape("hello world"), "'hello world'");
/// assert_eq!(escape("it's"), "'it'\\''s'");
/// ```
pub fn escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// `export K='V'; ` for every entry, in key order. Empty for an empty map.
pub fn export_prefix(env_vars: &BTreeMap<String, String>) -> Result<String> {
    let mut prefix = String::new();
    for (key, value) in env_vars {
        if !is_valid_name(key) {
            return Err(VagrantMcpError::InvalidInput(format!(
                "invalid environment variable name: {}",
                key
            )));
        }
        prefix.push_str(&format!("export {}={}; ", key, escape(value)));
    }
    Ok(prefix)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
