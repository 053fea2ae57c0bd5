use crate::config::Settings;
use crate::error::{Result, VagrantMcpError};
use crate::sync::{SyncBackend, SyncMethod};
use crate::utils::shell::escape;
use crate::vm::config::VmConfig;
use crate::vm::ssh::{RemoteOutput, RemoteShell};
use crate::vm::ssh_config::SshConfig;
use crate::vm::state::{parse_machine_readable, VmState};
use crate::vm::upload::Compression;
use crate::vm::vagrant::Vagrant;
use crate::vm::vagrantfile;
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-VM config file inside the VM directory.
pub const CONFIG_FILE: &str = "vm.json";

/// Owns `<base>/<name>/` for every VM and drives vagrant inside it.
#[derive(Debug)]
pub struct VmManager {
    base_dir: PathBuf,
    vagrant: Vagrant,
    shell: RemoteShell,
}

impl VmManager {
    pub fn new(settings: &Settings) -> Result<Self> {
        fs::create_dir_all(&settings.base_dir)?;
        Ok(Self {
            base_dir: settings.base_dir.clone(),
            vagrant: Vagrant::new(&settings.vagrant_bin, settings.provisioner_timeout),
            shell: RemoteShell::new(&settings.ssh_bin),
        })
    }

    pub fn vagrant(&self) -> &Vagrant {
        &self.vagrant
    }

    pub fn vm_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// VM directory, or `NotFound` when the VM was never created.
    fn existing_vm_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let dir = self.vm_dir(name);
        if !dir.is_dir() {
            return Err(VagrantMcpError::NotFound(format!("VM '{}'", name)));
        }
        Ok(dir)
    }

    /// Define a new VM: write its Vagrantfile and config, then `vagrant validate`.
    ///
    /// Files are staged in a hidden sibling directory that is renamed into
    /// place only after validation passes, so a VM directory is never seen
    /// without its config.
    pub async fn create_vm(
        &self,
        name: &str,
        project_path: &str,
        mut config: VmConfig,
        cancel: &CancellationToken,
    ) -> Result<VmConfig> {
        validate_name(name)?;
        let dir = self.vm_dir(name);
        if dir.exists() {
            return Err(VagrantMcpError::AlreadyExists(format!("VM '{}'", name)));
        }

        config.name = name.to_string();
        config.project_path = project_path.to_string();

        fs::create_dir_all(&self.base_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}-", name))
            .tempdir_in(&self.base_dir)?;

        write_atomic(
            staging.path(),
            vagrantfile::FILE_NAME,
            vagrantfile::render(&config).as_bytes(),
        )?;
        write_atomic(staging.path(), CONFIG_FILE, &serde_json::to_vec_pretty(&config)?)?;

        if let Err(e) = self.vagrant.validate(staging.path(), cancel).await {
            warn!(vm = name, error = %e, "generated Vagrantfile rejected");
            return Err(e);
        }

        if dir.exists() {
            return Err(VagrantMcpError::AlreadyExists(format!("VM '{}'", name)));
        }
        fs::rename(staging.path(), &dir).map_err(|e| {
            if dir.exists() {
                VagrantMcpError::AlreadyExists(format!("VM '{}'", name))
            } else {
                VagrantMcpError::Io(e)
            }
        })?;

        info!(vm = name, project = project_path, "created VM");
        Ok(config)
    }

    pub async fn start_vm(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let dir = self.existing_vm_dir(name)?;
        info!(vm = name, "starting VM");
        self.vagrant.up(&dir, cancel).await
    }

    pub async fn stop_vm(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let dir = self.existing_vm_dir(name)?;
        info!(vm = name, "stopping VM");
        self.vagrant.halt(&dir, cancel).await
    }

    /// Force-destroy the machine, then remove its directory.
    /// A failed destroy leaves the directory in place.
    pub async fn destroy_vm(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let dir = self.existing_vm_dir(name)?;
        info!(vm = name, "destroying VM");
        self.vagrant.destroy_forced(&dir, cancel).await?;
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    pub async fn get_vm_state(&self, name: &str, cancel: &CancellationToken) -> Result<VmState> {
        validate_name(name)?;
        let dir = self.vm_dir(name);
        if !dir.is_dir() {
            return Ok(VmState::NotCreated);
        }

        let output = match self.vagrant.status_machine_readable(&dir, cancel).await {
            Ok(output) => output,
            Err(e @ VagrantMcpError::OperationFailed { .. }) => {
                warn!(vm = name, error = %e, "vagrant status failed");
                return Ok(VmState::Error);
            }
            Err(e) => return Err(e),
        };

        let state = match parse_machine_readable(&output) {
            // Defined here but never booted.
            VmState::NotCreated => VmState::Stopped,
            VmState::Error => {
                warn!(vm = name, raw = %output, "no state in vagrant status output");
                VmState::Error
            }
            state => state,
        };
        debug!(vm = name, %state, "queried VM state");
        Ok(state)
    }

    pub async fn get_ssh_config(&self, name: &str, cancel: &CancellationToken) -> Result<SshConfig> {
        let dir = self.existing_vm_dir(name)?;
        let output = self.vagrant.ssh_config(&dir, cancel).await?;
        SshConfig::parse(&output)
    }

    /// Run a command on the guest without any sync around it.
    pub async fn run_remote(
        &self,
        name: &str,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput> {
        let ssh = self.get_ssh_config(name, cancel).await?;
        self.shell.run(&ssh, command, cancel, None).await
    }

    /// Copy `source` to `destination` on a running guest, optionally as an archive.
    pub async fn upload_to_vm(
        &self,
        name: &str,
        source: &Path,
        destination: &str,
        compression: Option<Compression>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let dir = self.existing_vm_dir(name)?;
        let state = self.get_vm_state(name, cancel).await?;
        if state != VmState::Running {
            return Err(VagrantMcpError::InvalidState(format!(
                "VM is not running (current state: {})",
                state
            )));
        }
        if !source.exists() {
            return Err(VagrantMcpError::NotFound(format!(
                "upload source {}",
                source.display()
            )));
        }

        let Some(compression) = compression else {
            return self.vagrant.upload(&dir, source, destination, cancel).await;
        };

        // Removed on drop, whichever way this returns.
        let staging = tempfile::tempdir()?;
        let archive_name = format!(
            "vagrant-mcp-upload-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            compression.extension()
        );
        let archive = staging.path().join(&archive_name);
        compression.pack(source, &archive).await?;

        let remote_archive = format!("/tmp/{}", archive_name);
        self.vagrant
            .upload(&dir, &archive, &remote_archive, cancel)
            .await?;

        let output = self
            .run_remote(name, &compression.unpack_command(&remote_archive, destination), cancel)
            .await?;
        if output.exit_code != 0 {
            return Err(VagrantMcpError::failed("unpack upload", output.stderr.trim()));
        }
        info!(vm = name, destination, "uploaded archive");
        Ok(())
    }

    /// Names of every VM directory, sorted.
    pub fn list_vms(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        // Entries may vanish mid-listing; skip anything unreadable.
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn get_vm_config(&self, name: &str) -> Result<VmConfig> {
        let dir = self.existing_vm_dir(name)?;
        let data = fs::read(dir.join(CONFIG_FILE)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                VagrantMcpError::NotFound(format!("config for VM '{}'", name))
            }
            _ => VagrantMcpError::Io(e),
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Persist `config`; the Vagrantfile is rewritten only when its rendering changed.
    /// Returns whether the Vagrantfile was rewritten.
    pub fn update_vm_config(&self, name: &str, mut config: VmConfig) -> Result<bool> {
        let dir = self.existing_vm_dir(name)?;
        config.name = name.to_string();

        let rendered = vagrantfile::render(&config);
        let current = fs::read(dir.join(vagrantfile::FILE_NAME)).unwrap_or_default();
        let changed = md5::compute(rendered.as_bytes()) != md5::compute(&current);
        if changed {
            write_atomic(&dir, vagrantfile::FILE_NAME, rendered.as_bytes())?;
        }
        write_atomic(&dir, CONFIG_FILE, &serde_json::to_vec_pretty(&config)?)?;

        debug!(vm = name, vagrantfile_changed = changed, "updated VM config");
        Ok(changed)
    }

    /// Read a guest file through the remote shell, byte for byte.
    pub async fn read_guest_file(
        &self,
        name: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let ssh = self.get_ssh_config(name, cancel).await?;
        let output = self
            .shell
            .run_raw(&ssh, &format!("cat -- {}", escape(path)), cancel)
            .await?;
        if output.exit_code != 0 {
            return Err(VagrantMcpError::failed(
                format!("read {} on guest", path),
                output.stderr.trim(),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl SyncBackend for VmManager {
    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn sync_to_vm(
        &self,
        name: &str,
        source: &Path,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let config = self.get_vm_config(name)?;
        if config.sync_type != SyncMethod::Rsync {
            debug!(vm = name, method = config.sync_type.as_str(), "mounted folder, nothing to push");
            return Ok(());
        }

        let dir = self.vm_dir(name);
        if tokio::fs::metadata(source).await?.is_dir() {
            self.vagrant.rsync(&dir, cancel).await
        } else {
            self.vagrant.upload(&dir, source, destination, cancel).await
        }
    }

    async fn sync_from_vm(
        &self,
        name: &str,
        source: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let config = self.get_vm_config(name)?;
        if config.sync_type != SyncMethod::Rsync {
            debug!(vm = name, method = config.sync_type.as_str(), "mounted folder, nothing to pull");
            return Ok(());
        }

        if source.trim_end_matches('/') == config.guest_mount().trim_end_matches('/') {
            return self.vagrant.rsync_back(&self.vm_dir(name), cancel).await;
        }

        let contents = self.read_guest_file(name, source, cancel).await?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, contents).await?;
        Ok(())
    }
}

/// VM names become directory names: one plain path component.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(VagrantMcpError::InvalidInput(format!(
            "invalid VM name '{}': use letters, digits, '-', '_' or '.'",
            name
        )));
    }
    Ok(())
}

fn write_atomic(dir: &Path, file_name: &str, contents: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(file_name)).map_err(|e| e.error)?;
    Ok(())
}
