use super::sync_config_for;
use crate::error::{Result, VagrantMcpError};
use crate::server::params::Params;
use crate::server::registry::{ParamKind, ParamDef, Tool};
use crate::server::Services;
use crate::vm::{VmConfig, VmState};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const NAME: ParamDef = ParamDef::required("name", ParamKind::String, "Name of the VM");

const CREATE_PARAMS: &[ParamDef] = &[
    NAME,
    ParamDef::required("project_path", ParamKind::String, "Host project directory to sync"),
    ParamDef::optional("cpu", ParamKind::Integer, "Number of CPUs (default 2)"),
    ParamDef::optional("memory", ParamKind::Integer, "Memory in MB (default 2048)"),
    ParamDef::optional("box", ParamKind::String, "Base box (default ubuntu/focal64)"),
    ParamDef::optional("sync_type", ParamKind::String, "rsync, nfs, smb or shared"),
    ParamDef::optional("ports", ParamKind::PortArray, "Ports to forward"),
    ParamDef::optional("environment", ParamKind::StringArray, "Setup commands run at provision time"),
    ParamDef::optional("provisioners", ParamKind::StringArray, "Provisioning scripts"),
    ParamDef::optional("exclude_patterns", ParamKind::StringArray, "Paths excluded from sync"),
];

const ENSURE_PARAMS: &[ParamDef] = &[
    NAME,
    ParamDef::optional("project_path", ParamKind::String, "Host project directory, needed when the VM does not exist yet"),
];

const NAME_ONLY: &[ParamDef] = &[NAME];

pub fn tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "create_dev_vm",
            description: "Create and start a development VM for a project",
            params: CREATE_PARAMS,
            handler: |s, p, c| Box::pin(create_dev_vm(s, p, c)),
        },
        Tool {
            name: "ensure_dev_vm",
            description: "Make sure a development VM exists, is running and is registered for sync",
            params: ENSURE_PARAMS,
            handler: |s, p, c| Box::pin(ensure_dev_vm(s, p, c)),
        },
        Tool {
            name: "start_dev_vm",
            description: "Start a stopped development VM",
            params: NAME_ONLY,
            handler: |s, p, c| Box::pin(start_dev_vm(s, p, c)),
        },
        Tool {
            name: "stop_dev_vm",
            description: "Stop a running development VM",
            params: NAME_ONLY,
            handler: |s, p, c| Box::pin(stop_dev_vm(s, p, c)),
        },
        Tool {
            name: "destroy_dev_vm",
            description: "Destroy a development VM and remove its files",
            params: NAME_ONLY,
            handler: |s, p, c| Box::pin(destroy_dev_vm(s, p, c)),
        },
        Tool {
            name: "get_vm_status",
            description: "Get the state, configuration and sync status of a VM",
            params: NAME_ONLY,
            handler: |s, p, c| Box::pin(get_vm_status(s, p, c)),
        },
        Tool {
            name: "list_dev_vms",
            description: "List all development VMs with their state",
            params: &[],
            handler: |s, p, c| Box::pin(list_dev_vms(s, p, c)),
        },
    ]
}

fn project_dir(path: &str) -> Result<()> {
    if !Path::new(path).is_dir() {
        return Err(VagrantMcpError::InvalidInput(format!(
            "project path is not a directory: {}",
            path
        )));
    }
    Ok(())
}

async fn register_sync(services: &Services, config: &VmConfig) -> Result<()> {
    if services.sync.is_registered(&config.name).await {
        debug!(vm = %config.name, "already registered for sync");
        return Ok(());
    }
    services
        .sync
        .register_vm(&config.name, sync_config_for(config, true))
        .await
}

async fn create_dev_vm(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("name")?;
    let project_path = params.required_str("project_path")?;
    project_dir(&project_path)?;
    let config = VmConfig::from_params(&name, &project_path, params.as_map())?;

    let config = services
        .vms
        .create_vm(&name, &project_path, config, &cancel)
        .await?;
    services.vms.start_vm(&name, &cancel).await?;
    register_sync(&services, &config).await?;

    info!(vm = %name, "development VM ready");
    Ok(json!({
        "name": name,
        "state": VmState::Running,
        "config": config,
    }))
}

async fn ensure_dev_vm(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("name")?;
    let project_path = params.optional_str("project_path")?;

    let mut created = false;
    let mut started = false;
    let mut state = services.vms.get_vm_state(&name, &cancel).await?;

    if state == VmState::NotCreated {
        let project_path = project_path.ok_or_else(|| {
            VagrantMcpError::InvalidInput(format!(
                "VM '{}' does not exist; project_path is required to create it",
                name
            ))
        })?;
        project_dir(&project_path)?;
        let config = VmConfig::from_params(&name, &project_path, params.as_map())?;
        services
            .vms
            .create_vm(&name, &project_path, config, &cancel)
            .await?;
        created = true;
        state = VmState::Stopped;
    }

    if state != VmState::Running {
        services.vms.start_vm(&name, &cancel).await?;
        started = true;
        state = VmState::Running;
    }

    let config = services.vms.get_vm_config(&name)?;
    register_sync(&services, &config).await?;

    Ok(json!({
        "name": name,
        "state": state,
        "created": created,
        "started": started,
    }))
}

async fn start_dev_vm(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("name")?;
    services.vms.start_vm(&name, &cancel).await?;
    let state = services.vms.get_vm_state(&name, &cancel).await?;
    Ok(json!({"name": name, "state": state}))
}

async fn stop_dev_vm(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("name")?;
    services.vms.stop_vm(&name, &cancel).await?;
    let state = services.vms.get_vm_state(&name, &cancel).await?;
    Ok(json!({"name": name, "state": state}))
}

async fn destroy_dev_vm(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("name")?;
    services.vms.destroy_vm(&name, &cancel).await?;
    if services.sync.is_registered(&name).await {
        services.sync.unregister_vm(&name).await?;
    }
    Ok(json!({"name": name, "destroyed": true}))
}

async fn get_vm_status(services: Arc<Services>, params: Params, cancel: CancellationToken) -> Result<Value> {
    let name = params.required_str("name")?;
    let state = services.vms.get_vm_state(&name, &cancel).await?;
    let config = match state {
        VmState::NotCreated => Value::Null,
        _ => serde_json::to_value(services.vms.get_vm_config(&name)?)?,
    };
    let sync = match services.sync.get_sync_status(&name).await {
        Ok(status) => serde_json::to_value(status)?,
        Err(_) => Value::Null,
    };
    Ok(json!({
        "name": name,
        "state": state,
        "config": config,
        "sync_status": sync,
    }))
}

async fn list_dev_vms(services: Arc<Services>, _params: Params, cancel: CancellationToken) -> Result<Value> {
    let mut vms = Vec::new();
    for name in services.vms.list_vms()? {
        let state = services.vms.get_vm_state(&name, &cancel).await?;
        vms.push(json!({"name": name, "state": state}));
    }
    Ok(json!({ "vms": vms }))
}
