//! Tool catalog. Each submodule owns the tools for one core component.

mod exec;
mod sync;
mod vm;

use super::registry::ToolRegistry;
use crate::sync::SyncConfig;
use crate::vm::VmConfig;

pub fn register_all(registry: &mut ToolRegistry) {
    for tool in vm::tools().into_iter().chain(exec::tools()).chain(sync::tools()) {
        registry.register(tool);
    }
}

/// Sync settings derived from a VM definition.
pub(crate) fn sync_config_for(config: &VmConfig, watch: bool) -> SyncConfig {
    let mut sync = SyncConfig::new(&config.name, config.host_mount());
    sync.method = config.sync_type;
    sync.exclude_patterns = config.sync_exclude_patterns.clone();
    sync.guest_path = config.guest_path.clone();
    sync.watch_enabled = watch;
    sync
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncMethod;

    #[test]
    fn test_catalog_names() {
        let mut registry = ToolRegistry::new();
        register_all(&mut registry);
        let names: Vec<&str> = registry.iter().map(|t| t.name).collect();
        for expected in [
            "create_dev_vm",
            "ensure_dev_vm",
            "start_dev_vm",
            "stop_dev_vm",
            "destroy_dev_vm",
            "get_vm_status",
            "list_dev_vms",
            "exec_in_vm",
            "exec_with_sync",
            "run_background_task",
            "configure_sync",
            "sync_to_vm",
            "sync_from_vm",
            "upload_to_vm",
            "sync_status",
            "resolve_sync_conflicts",
            "search_code",
        ] {
            assert!(names.contains(&expected), "missing tool {}", expected);
        }
        assert_eq!(registry.len(), 17);
    }

    #[test]
    fn test_sync_config_follows_vm() {
        let mut vm = VmConfig::new("t1", "/projects/app");
        vm.sync_type = SyncMethod::Nfs;
        vm.guest_path = Some("/srv/app".to_string());
        let sync = sync_config_for(&vm, true);
        assert_eq!(sync.vm_name, "t1");
        assert_eq!(sync.project_path, std::path::PathBuf::from("/projects/app"));
        assert_eq!(sync.method, SyncMethod::Nfs);
        assert_eq!(sync.guest_mount(), "/srv/app");
        assert!(sync.watch_enabled);
    }
}
