use super::sync_config_for;
use crate::error::Result;
use crate::server::params::Params;
use crate::server::registry::{ParamKind, ParamDef, Tool};
use crate::server::Services;
use crate::sync::search::{SearchKind, DEFAULT_MAX_RESULTS};
use crate::sync::{ResolutionStrategy, SyncDirection, SyncMethod};
use crate::vm::upload::Compression;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

const VM_NAME: ParamDef = ParamDef::required("vm_name", ParamKind::String, "Name of the VM");

const CONFIGURE_PARAMS: &[ParamDef] = &[
    VM_NAME,
    ParamDef::optional("sync_type", ParamKind::String, "rsync, nfs, smb or shared"),
    ParamDef::optional("direction", ParamKind::String, "to_vm, from_vm or bidirectional"),
    ParamDef::optional("exclude_patterns", ParamKind::StringArray, "Paths excluded from sync"),
    ParamDef::optional("watch", ParamKind::Boolean, "Sync host changes automatically (default true)"),
    ParamDef::optional("watch_interval_ms", ParamKind::Integer, "Quiet period before a watched change is synced"),
];

const TO_VM_PARAMS: &[ParamDef] = &[
    VM_NAME,
    ParamDef::optional("source_path", ParamKind::String, "Host path to sync (default: the project)"),
];

const FROM_VM_PARAMS: &[ParamDef] = &[
    VM_NAME,
    ParamDef::optional("source_path", ParamKind::String, "Guest path to sync back (default: the guest mount)"),
];

const UPLOAD_PARAMS: &[ParamDef] = &[
    VM_NAME,
    ParamDef::required("source", ParamKind::String, "Host file or directory"),
    ParamDef::required("destination", ParamKind::String, "Guest destination path"),
    ParamDef::optional("compress", ParamKind::Boolean, "Upload as an archive (default false)"),
    ParamDef::optional("compression_type", ParamKind::String, "tgz, tar or zip (default tgz)"),
];

const STATUS_PARAMS: &[ParamDef] = &[VM_NAME];

const RESOLVE_PARAMS: &[ParamDef] = &[
    VM_NAME,
    ParamDef::required("path", ParamKind::String, "Conflicting file, absolute or relative to the project"),
    ParamDef::required("resolution", ParamKind::String, "use_host, use_vm, merge or keep_both"),
];

const SEARCH_PARAMS: &[ParamDef] = &[
    VM_NAME,
    ParamDef::required("query", ParamKind::String, "Text to search for"),
    ParamDef::optional("search_type", ParamKind::String, "semantic, exact or fuzzy (default semantic)"),
    ParamDef::optional("case_sensitive", ParamKind::Boolean, "Match case for exact searches (default false)"),
    ParamDef::optional("max_results", ParamKind::Integer, "Maximum number of matches (default 20)"),
];

pub fn tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "configure_sync",
            description: "Register or update file sync settings for a VM",
            params: CONFIGURE_PARAMS,
            handler: |s, p, c| Box::pin(configure_sync(s, p, c)),
        },
        Tool {
            name: "sync_to_vm",
            description: "Sync files from the host project to a VM",
            params: TO_VM_PARAMS,
            handler: |s, p, c| Box::pin(sync_to_vm(s, p, c)),
        },
        Tool {
            name: "sync_from_vm",
            description: "Sync files from a VM back to the host project",
            params: FROM_VM_PARAMS,
            handler: |s, p, c| Box::pin(sync_from_vm(s, p, c)),
        },
        Tool {
            name: "upload_to_vm",
            description: "Upload a file or directory to a VM",
            params: UPLOAD_PARAMS,
            handler: |s, p, c| Box::pin(upload_to_vm(s, p, c)),
        },
        Tool {
            name: "sync_status",
            description: "Get sync counters and pending conflicts for a VM",
            params: STATUS_PARAMS,
            handler: |s, p, c| Box::pin(sync_status(s, p, c)),
        },
        Tool {
            name: "resolve_sync_conflicts",
            description: "Resolve a recorded sync conflict",
            params: RESOLVE_PARAMS,
            handler: |s, p, c| Box::pin(resolve_sync_conflicts(s, p, c)),
        },
        Tool {
            name: "search_code",
            description: "Search the project source synced with a VM",
            params: SEARCH_PARAMS,
            handler: |s, p, c| Box::pin(search_code(s, p, c)),
        },
    ]
}

async fn configure_sync(services: Arc<Services>, params: Params, _cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("vm_name")?;
    let mut vm_config = services.vms.get_vm_config(&name)?;
    let registered = services.sync.is_registered(&name).await;

    let mut config = if registered {
        services.sync.get_sync_config(&name).await?
    } else {
        sync_config_for(&vm_config, true)
    };

    let mut vagrantfile_changed = false;
    if let Some(method) = params.optional_str("sync_type")? {
        let method: SyncMethod = method.parse()?;
        config.method = method;
        if vm_config.sync_type != method {
            vm_config.sync_type = method;
            vagrantfile_changed = services.vms.update_vm_config(&name, vm_config)?;
        }
    }
    if let Some(direction) = params.optional_str("direction")? {
        config.direction = direction.parse::<SyncDirection>()?;
    }
    if let Some(patterns) = params.string_list("exclude_patterns")? {
        config.exclude_patterns = patterns;
    }
    config.watch_enabled = params.bool_or("watch", true)?;
    if params.has("watch_interval_ms") {
        config.watch_interval = Duration::from_millis(params.u64_or("watch_interval_ms", 0)?);
    }

    if registered {
        services.sync.update_sync_config(&name, config).await?;
    } else {
        services.sync.register_vm(&name, config).await?;
    }
    info!(vm = %name, "sync configured");

    Ok(json!({
        "vm_name": name,
        "config": services.sync.get_sync_config(&name).await?,
        "vagrantfile_changed": vagrantfile_changed,
    }))
}

async fn sync_to_vm(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("vm_name")?;
    let source = params.optional_str("source_path")?.map(PathBuf::from);
    let result = services
        .sync
        .sync_to_vm(&name, source.as_deref(), &cancel)
        .await?;
    Ok(serde_json::to_value(result)?)
}

async fn sync_from_vm(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("vm_name")?;
    let source = params.optional_str("source_path")?;
    let result = services
        .sync
        .sync_from_vm(&name, source.as_deref(), &cancel)
        .await?;
    Ok(serde_json::to_value(result)?)
}

async fn upload_to_vm(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("vm_name")?;
    let source = params.required_str("source")?;
    let destination = params.required_str("destination")?;
    let compression = if params.bool_or("compress", false)? {
        Some(match params.optional_str("compression_type")? {
            Some(kind) => kind.parse::<Compression>()?,
            None => Compression::default(),
        })
    } else {
        None
    };

    services
        .vms
        .upload_to_vm(&name, Path::new(&source), &destination, compression, &cancel)
        .await?;
    Ok(json!({
        "vm_name": name,
        "source": source,
        "destination": destination,
        "compressed": compression.is_some(),
    }))
}

async fn sync_status(services: Arc<Services>, params: Params, _cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("vm_name")?;
    let status = services.sync.get_sync_status(&name).await?;
    Ok(serde_json::to_value(status)?)
}

async fn resolve_sync_conflicts(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("vm_name")?;
    let path = params.required_str("path")?;
    let strategy: ResolutionStrategy = params.required_str("resolution")?.parse()?;

    let mut host_path = PathBuf::from(&path);
    if host_path.is_relative() {
        host_path = services.sync.get_sync_config(&name).await?.project_path.join(host_path);
    }
    let outcome = services
        .sync
        .resolve_sync_conflict(&name, &host_path, strategy, &cancel)
        .await?;
    Ok(json!({
        "vm_name": name,
        "path": host_path,
        "outcome": outcome,
    }))
}

async fn search_code(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("vm_name")?;
    let query = params.required_str("query")?;
    let kind = match params.optional_str("search_type")? {
        Some(kind) => kind.parse()?,
        None => SearchKind::Semantic,
    };
    let case_sensitive = params.bool_or("case_sensitive", false)?;
    let max_results = params.u64_or("max_results", DEFAULT_MAX_RESULTS as u64)? as usize;

    let results = services
        .sync
        .search(&name, kind, &query, case_sensitive, max_results, &cancel)
        .await?;
    Ok(json!({
        "query": query,
        "search_type": kind,
        "count": results.len(),
        "results": results,
    }))
}
