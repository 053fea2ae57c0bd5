//! `devvm://` resources, resolved by longest static template prefix.

use super::Services;
use crate::error::{Result, VagrantMcpError};
use crate::exec::ExecutionContext;
use crate::utils::shell::escape;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const SCHEME: &str = "devvm://";

/// Largest guest file served through the files resource.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

pub type ResourceGetter = fn(Arc<Services>, String, CancellationToken) -> BoxFuture<'static, Result<Value>>;

#[derive(Debug)]
pub struct Resource {
    pub uri_template: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub getter: ResourceGetter,
}

impl Resource {
    /// Template text before the first placeholder.
    pub fn static_prefix(&self) -> &'static str {
        match self.uri_template.find('{') {
            Some(i) => &self.uri_template[..i],
            None => self.uri_template,
        }
    }
}

#[derive(Default)]
pub struct ResourceRegistry {
    by_scheme: BTreeMap<String, Vec<Arc<Resource>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: Resource) -> Result<()> {
        let scheme = scheme_of(resource.uri_template)?.to_string();
        self.by_scheme
            .entry(scheme)
            .or_default()
            .push(Arc::new(resource));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.by_scheme.values().flatten()
    }

    /// The resource serving `uri` and the part of the URI after its static prefix.
    pub fn resolve(&self, uri: &str) -> Result<(Arc<Resource>, String)> {
        let scheme = scheme_of(uri)?;
        let candidates = self.by_scheme.get(scheme).ok_or_else(|| {
            VagrantMcpError::NotFound(format!("no resources registered for scheme {}", scheme))
        })?;
        let resource = candidates
            .iter()
            .filter(|r| uri.starts_with(r.static_prefix()))
            .max_by_key(|r| r.static_prefix().len())
            .ok_or_else(|| VagrantMcpError::NotFound(format!("resource {}", uri)))?;
        let rest = uri[resource.static_prefix().len()..].to_string();
        Ok((Arc::clone(resource), rest))
    }
}

fn scheme_of(uri: &str) -> Result<&str> {
    uri.find("://")
        .map(|i| &uri[..i + 3])
        .ok_or_else(|| VagrantMcpError::InvalidInput(format!("invalid resource URI: {}", uri)))
}

pub fn register_all(registry: &mut ResourceRegistry) -> Result<()> {
    registry.register(Resource {
        uri_template: "devvm://vms/{name}/state",
        name: "VM state",
        description: "Current state and sync status of a development VM",
        getter: |s, rest, c| Box::pin(vm_state(s, rest, c)),
    })?;
    registry.register(Resource {
        uri_template: "devvm://files/{name}/{path}",
        name: "VM files",
        description: "Contents of a file, or the listing of a directory, inside a running VM",
        getter: |s, rest, c| Box::pin(vm_file(s, rest, c)),
    })?;
    Ok(())
}

async fn vm_state(services: Arc<Services>, rest: String, cancel: CancellationToken) -> Result<Value> {
    let name = rest
        .strip_suffix("/state")
        .filter(|n| !n.is_empty() && !n.contains('/'))
        .ok_or_else(|| VagrantMcpError::InvalidInput(format!("invalid VM state URI: {}vms/{}", SCHEME, rest)))?;

    let state = services.vms.get_vm_state(name, &cancel).await?;
    let sync = match services.sync.get_sync_status(name).await {
        Ok(status) => serde_json::to_value(status)?,
        Err(_) => Value::Null,
    };
    Ok(json!({
        "name": name,
        "state": state,
        "sync_status": sync,
    }))
}

async fn vm_file(services: Arc<Services>, rest: String, cancel: CancellationToken) -> Result<Value> {
    let (name, path) = match rest.split_once('/') {
        Some((name, path)) => (name.to_string(), format!("/{}", path)),
        None => (rest.clone(), "/".to_string()),
    };
    if name.is_empty() {
        return Err(VagrantMcpError::InvalidInput(format!(
            "invalid VM file URI: {}files/{}",
            SCHEME, rest
        )));
    }

    let ctx = ExecutionContext::new(&name);
    let quoted = escape(&path);

    let stat = services
        .executor
        .execute_command(&format!("stat -c '%F:%s' -- {}", quoted), &ctx, &cancel, None)
        .await?;
    if stat.exit_code != 0 {
        return Err(VagrantMcpError::NotFound(format!("{} on VM '{}'", path, name)));
    }
    let (kind, size) = stat
        .stdout
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| VagrantMcpError::failed("stat guest file", stat.stdout.trim()))?;

    if kind == "directory" {
        let listing = services
            .executor
            .execute_command(&format!("ls -1A -- {}", quoted), &ctx, &cancel, None)
            .await?;
        if listing.exit_code != 0 {
            return Err(VagrantMcpError::failed("list guest directory", listing.stderr.trim()));
        }
        let entries: Vec<&str> = listing.stdout.lines().filter(|l| !l.is_empty()).collect();
        return Ok(json!(entries));
    }

    let size: u64 = size
        .parse()
        .map_err(|_| VagrantMcpError::failed("stat guest file", stat.stdout.trim()))?;
    if size > MAX_FILE_BYTES {
        return Err(VagrantMcpError::InvalidInput(format!(
            "{} is {} bytes; files larger than {} bytes are not served",
            path, size, MAX_FILE_BYTES
        )));
    }

    let bytes = services.vms.read_guest_file(&name, &path, &cancel).await?;
    Ok(file_value(bytes))
}

/// UTF-8 content as a plain string; anything else base64-encoded.
fn file_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::String(text),
        Err(e) => json!({
            "encoding": "base64",
            "content": STANDARD.encode(e.as_bytes()),
        }),
    }
}
