use crate::error::{Result, VagrantMcpError};
use crate::sync::merge;
use crate::sync::search::{self, SearchKind, SearchRequest, SearchResult};
use crate::sync::watcher::{self, WatcherHandle};
use crate::sync::{
    ResolutionStrategy, ResolveOutcome, SyncBackend, SyncConfig, SyncConflict, SyncResult,
    SyncStatus, DEFAULT_WATCH_INTERVAL,
};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything the engine tracks, behind one lock.
#[derive(Default)]
struct EngineState {
    configs: HashMap<String, SyncConfig>,
    statuses: HashMap<String, SyncStatus>,
    watchers: HashMap<String, WatcherHandle>,
    /// Paths reported by a watcher and not yet pushed to the guest
    pending: HashMap<String, BTreeSet<PathBuf>>,
}

impl EngineState {
    fn config(&self, name: &str) -> Result<SyncConfig> {
        self.configs
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered(name))
    }

    fn status_mut(&mut self, name: &str) -> &mut SyncStatus {
        self.statuses.entry(name.to_string()).or_default()
    }

    fn record_failure(&mut self, name: &str, error: &VagrantMcpError) {
        let status = self.status_mut(name);
        status.in_progress = false;
        status.error = Some(error.to_string());
    }
}

struct Inner {
    backend: Arc<dyn SyncBackend>,
    state: RwLock<EngineState>,
    shutdown: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToVm,
    FromVm,
}

/// Keeps registered VMs' project trees in step with their guests.
///
/// Cloning is cheap; clones share state. A running sync holds the write
/// lock for its whole dispatch, so syncs never overlap.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn SyncBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                state: RwLock::new(EngineState::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn base_dir(&self) -> &Path {
        self.inner.backend.base_dir()
    }

    pub async fn register_vm(&self, name: &str, mut config: SyncConfig) -> Result<()> {
        if name.is_empty() {
            return Err(VagrantMcpError::InvalidInput("VM name is empty".to_string()));
        }
        normalize(name, &mut config);

        let mut state = self.inner.state.write().await;
        if state.configs.contains_key(name) {
            return Err(VagrantMcpError::AlreadyExists(format!(
                "VM '{}' is already registered for sync",
                name
            )));
        }

        if let Some(handle) = self.start_watcher(&config) {
            state.watchers.insert(name.to_string(), handle);
        }
        state.configs.insert(name.to_string(), config);
        state.statuses.insert(name.to_string(), SyncStatus::new());
        info!(vm = name, "registered VM for sync");
        Ok(())
    }

    pub async fn unregister_vm(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.write().await;
        state.configs.remove(name).ok_or_else(|| not_registered(name))?;
        state.statuses.remove(name);
        state.pending.remove(name);
        if let Some(handle) = state.watchers.remove(name) {
            handle.stop();
        }
        info!(vm = name, "unregistered VM from sync");
        Ok(())
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.inner.state.read().await.configs.contains_key(name)
    }

    pub async fn get_sync_status(&self, name: &str) -> Result<SyncStatus> {
        self.inner
            .state
            .read()
            .await
            .statuses
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered(name))
    }

    pub async fn get_sync_config(&self, name: &str) -> Result<SyncConfig> {
        self.inner.state.read().await.config(name)
    }

    /// Replace a VM's config. Status counters survive; the watcher is
    /// restarted to match the new settings.
    pub async fn update_sync_config(&self, name: &str, mut config: SyncConfig) -> Result<()> {
        normalize(name, &mut config);

        let mut state = self.inner.state.write().await;
        if !state.configs.contains_key(name) {
            return Err(not_registered(name));
        }
        if let Some(handle) = state.watchers.remove(name) {
            handle.stop();
        }
        state.pending.remove(name);
        if let Some(handle) = self.start_watcher(&config) {
            state.watchers.insert(name.to_string(), handle);
        }
        state.configs.insert(name.to_string(), config);
        debug!(vm = name, "updated sync config");
        Ok(())
    }

    /// Record a conflict, replacing any earlier one for the same path.
    pub async fn record_conflict(&self, name: &str, conflict: SyncConflict) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if !state.configs.contains_key(name) {
            return Err(not_registered(name));
        }
        let status = state.status_mut(name);
        status.conflicts.retain(|c| c.path != conflict.path);
        status.conflicts.push(conflict);
        Ok(())
    }

    /// Push `source` (default: the whole project) to the guest.
    pub async fn sync_to_vm(
        &self,
        name: &str,
        source: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let mut state = self.inner.state.write().await;
        let config = state.config(name)?;
        state.status_mut(name).in_progress = true;

        let source = source
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.project_path.clone());
        if tokio::fs::metadata(&source).await.is_err() {
            let err = VagrantMcpError::failed(
                "sync to VM",
                format!("source path does not exist: {}", source.display()),
            );
            state.record_failure(name, &err);
            return Err(err);
        }

        let destination = config
            .guest_path_for(&source)
            .unwrap_or_else(|| config.guest_mount().to_string());
        self.dispatch(&mut state, name, Direction::ToVm, vec![(source, destination)], cancel)
            .await
    }

    /// Pull `source` (default: the guest mount) back into the project.
    pub async fn sync_from_vm(
        &self,
        name: &str,
        source: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let mut state = self.inner.state.write().await;
        let config = state.config(name)?;
        state.status_mut(name).in_progress = true;

        let source = source.unwrap_or(config.guest_mount()).to_string();
        let destination = host_path_for(&config, &source);
        self.dispatch(
            &mut state,
            name,
            Direction::FromVm,
            vec![(destination, source)],
            cancel,
        )
        .await
    }

    /// Settle the conflict recorded for `path`.
    pub async fn resolve_sync_conflict(
        &self,
        name: &str,
        path: &Path,
        strategy: ResolutionStrategy,
        cancel: &CancellationToken,
    ) -> Result<ResolveOutcome> {
        let mut state = self.inner.state.write().await;
        let config = state.config(name)?;
        let conflict = state
            .status_mut(name)
            .conflicts
            .iter()
            .find(|c| c.path == path)
            .cloned()
            .ok_or_else(|| {
                VagrantMcpError::NotFound(format!(
                    "no conflict recorded for {} on VM '{}'",
                    path.display(),
                    name
                ))
            })?;

        let outcome = self
            .apply_resolution(&mut state, &config, &conflict, strategy, cancel)
            .await;

        match outcome {
            Ok((ResolveOutcome::Resolved, _)) => {
                state.status_mut(name).conflicts.retain(|c| c.path != path);
                info!(vm = name, path = %path.display(), ?strategy, "resolved conflict");
                Ok(ResolveOutcome::Resolved)
            }
            Ok((ResolveOutcome::ConflictsRetained, merged)) => {
                if let Some(c) = state
                    .status_mut(name)
                    .conflicts
                    .iter_mut()
                    .find(|c| c.path == path)
                {
                    c.host_content = merged;
                    c.host_mod_time = Some(Utc::now());
                }
                warn!(vm = name, path = %path.display(), "merge left conflict markers");
                Ok(ResolveOutcome::ConflictsRetained)
            }
            Err(e) => {
                state.record_failure(name, &e);
                Err(e)
            }
        }
    }

    async fn apply_resolution(
        &self,
        state: &mut EngineState,
        config: &SyncConfig,
        conflict: &SyncConflict,
        strategy: ResolutionStrategy,
        cancel: &CancellationToken,
    ) -> Result<(ResolveOutcome, Option<String>)> {
        let name = config.vm_name.as_str();
        let path = conflict.path.as_path();
        let guest_path = config.guest_path_for(path).ok_or_else(|| {
            VagrantMcpError::InvalidInput(format!(
                "{} is outside the project {}",
                path.display(),
                config.project_path.display()
            ))
        })?;

        match strategy {
            ResolutionStrategy::UseHost => {
                let pair = vec![(path.to_path_buf(), guest_path)];
                self.dispatch(state, name, Direction::ToVm, pair, cancel).await?;
                Ok((ResolveOutcome::Resolved, None))
            }
            ResolutionStrategy::UseGuest => {
                let pair = vec![(path.to_path_buf(), guest_path)];
                self.dispatch(state, name, Direction::FromVm, pair, cancel).await?;
                Ok((ResolveOutcome::Resolved, None))
            }
            ResolutionStrategy::Merge => {
                let host = match &conflict.host_content {
                    Some(content) => content.clone(),
                    None => tokio::fs::read_to_string(path).await?,
                };
                let guest = self.guest_content(name, conflict, &guest_path, cancel).await?;
                let merged = merge::three_way(&host, &guest, cancel).await?;
                tokio::fs::write(path, &merged.text).await?;

                let pair = vec![(path.to_path_buf(), guest_path)];
                self.dispatch(state, name, Direction::ToVm, pair, cancel).await?;
                if merged.clean {
                    Ok((ResolveOutcome::Resolved, None))
                } else {
                    Ok((ResolveOutcome::ConflictsRetained, Some(merged.text)))
                }
            }
            ResolutionStrategy::KeepBoth => {
                let guest = self.guest_content(name, conflict, &guest_path, cancel).await?;
                let mut sibling = path.as_os_str().to_owned();
                sibling.push(".vm");
                let sibling = PathBuf::from(sibling);
                tokio::fs::write(&sibling, guest).await?;

                let pair = vec![(sibling, format!("{}.vm", guest_path))];
                self.dispatch(state, name, Direction::ToVm, pair, cancel).await?;
                Ok((ResolveOutcome::Resolved, None))
            }
        }
    }

    /// Guest copy of a conflicted file: recorded content, else fetched.
    async fn guest_content(
        &self,
        name: &str,
        conflict: &SyncConflict,
        guest_path: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if let Some(content) = &conflict.guest_content {
            return Ok(content.clone());
        }
        let scratch = tempfile::tempdir()?;
        let local = scratch.path().join("guest");
        self.inner
            .backend
            .sync_from_vm(name, guest_path, &local, cancel)
            .await?;
        Ok(tokio::fs::read_to_string(&local).await?)
    }

    /// Queue watcher-reported paths for the next debounced pass.
    pub(crate) async fn queue_changes(&self, name: &str, paths: Vec<PathBuf>) {
        let mut state = self.inner.state.write().await;
        if state.configs.contains_key(name) {
            state
                .pending
                .entry(name.to_string())
                .or_default()
                .extend(paths);
        }
    }

    /// Push everything queued for `name`. Nothing queued is not an error.
    pub(crate) async fn flush_pending(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<SyncResult>> {
        let mut state = self.inner.state.write().await;
        let Ok(config) = state.config(name) else {
            return Ok(None);
        };
        let paths = state.pending.remove(name).unwrap_or_default();

        let pairs: Vec<(PathBuf, String)> = paths
            .into_iter()
            .filter(|p| p.exists())
            .filter_map(|p| config.guest_path_for(&p).map(|guest| (p, guest)))
            .collect();
        if pairs.is_empty() {
            return Ok(None);
        }

        state.status_mut(name).in_progress = true;
        self.dispatch(&mut state, name, Direction::ToVm, pairs, cancel)
            .await
            .map(Some)
    }

    /// Move each `(host, guest)` pair through the backend and record the
    /// outcome. Called with the write lock held.
    async fn dispatch(
        &self,
        state: &mut EngineState,
        name: &str,
        direction: Direction,
        pairs: Vec<(PathBuf, String)>,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let started = Instant::now();
        state.status_mut(name).in_progress = true;

        let mut synced = Vec::with_capacity(pairs.len());
        for (host, guest) in pairs {
            let outcome = match direction {
                Direction::ToVm => {
                    self.inner
                        .backend
                        .sync_to_vm(name, &host, &guest, cancel)
                        .await
                }
                Direction::FromVm => {
                    self.inner
                        .backend
                        .sync_from_vm(name, &guest, &host, cancel)
                        .await
                }
            };

            if let Err(e) = outcome {
                let err = match e {
                    VagrantMcpError::Cancelled => VagrantMcpError::Cancelled,
                    other => VagrantMcpError::failed(direction.operation(), other),
                };
                state.record_failure(name, &err);
                warn!(vm = name, error = %err, "sync failed");
                return Err(err);
            }

            synced.push(match direction {
                Direction::ToVm => host.display().to_string(),
                Direction::FromVm => guest,
            });
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let now = Utc::now();
        let status = state.status_mut(name);
        status.in_progress = false;
        status.error = None;
        status.last_sync_time = now;
        match direction {
            Direction::ToVm => status.last_sync_to_vm = Some(now),
            Direction::FromVm => status.last_sync_from_vm = Some(now),
        }
        status.synchronized_files = synced.len();
        status.total_syncs += 1;
        status.total_files_synced += synced.len() as u64;
        status.total_sync_time_ms += elapsed_ms;

        info!(vm = name, files = synced.len(), elapsed_ms, "{}", direction.operation());
        Ok(SyncResult {
            synced_files: synced,
            sync_time_ms: elapsed_ms,
        })
    }

    pub async fn search(
        &self,
        name: &str,
        kind: SearchKind,
        query: &str,
        case_sensitive: bool,
        max_results: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        // Clone and release the lock: searches never touch sync state.
        let config = self.get_sync_config(name).await?;
        let request = SearchRequest {
            root: &config.project_path,
            query,
            case_sensitive,
            max_results,
            exclude_dirs: &config.exclude_patterns,
        };
        search::run(kind, &request, cancel).await
    }

    /// Stop every watcher and cancel in-flight watcher syncs.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.write().await;
        for (name, handle) in state.watchers.drain() {
            debug!(vm = %name, "stopping watcher");
            handle.stop();
        }
        self.inner.shutdown.cancel();
    }

    fn start_watcher(&self, config: &SyncConfig) -> Option<WatcherHandle> {
        if !config.watch_enabled {
            return None;
        }
        match watcher::spawn(self.clone(), config.clone(), self.inner.shutdown.child_token()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(vm = %config.vm_name, error = %e, "file watcher not started");
                None
            }
        }
    }
}

impl Direction {
    fn operation(&self) -> &'static str {
        match self {
            Direction::ToVm => "sync to VM",
            Direction::FromVm => "sync from VM",
        }
    }
}

fn normalize(name: &str, config: &mut SyncConfig) {
    config.vm_name = name.to_string();
    if config.watch_interval.is_zero() {
        config.watch_interval = DEFAULT_WATCH_INTERVAL;
    }
}

fn not_registered(name: &str) -> VagrantMcpError {
    VagrantMcpError::NotFound(format!("VM not registered with sync engine: {}", name))
}

/// Host location for a guest path: mirrored under the project when it is
/// under the guest mount, else the project root plus the base name.
fn host_path_for(config: &SyncConfig, guest: &str) -> PathBuf {
    let mount = config.guest_mount().trim_end_matches('/');
    match guest.strip_prefix(mount) {
        Some("") | Some("/") => config.project_path.clone(),
        Some(rest) if rest.starts_with('/') => config.project_path.join(rest.trim_start_matches('/')),
        _ => {
            let base = Path::new(guest).file_name().unwrap_or_default();
            config.project_path.join(base)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ConflictKind;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        To(PathBuf, String),
        From(String, PathBuf),
    }

    struct FakeBackend {
        base: PathBuf,
        calls: Mutex<Vec<Call>>,
        fail: bool,
        /// Guest path -> content written out on a pull
        guest_files: Mutex<BTreeMap<String, String>>,
    }

    impl FakeBackend {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                base: PathBuf::from("/tmp/vms"),
                calls: Mutex::new(Vec::new()),
                fail,
                guest_files: Mutex::new(BTreeMap::new()),
            })
        }

        fn put_guest_file(&self, path: &str, content: &str) {
            self.guest_files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.to_string());
        }
    }

    #[async_trait]
    impl SyncBackend for FakeBackend {
        fn base_dir(&self) -> &Path {
            &self.base
        }

        async fn sync_to_vm(&self, _: &str, source: &Path, dest: &str, _: &CancellationToken) -> Result<()> {
            self.calls.lock().unwrap().push(Call::To(source.to_path_buf(), dest.to_string()));
            if self.fail {
                return Err(VagrantMcpError::failed("vagrant rsync", "connection refused"));
            }
            Ok(())
        }

        async fn sync_from_vm(&self, _: &str, source: &str, dest: &Path, _: &CancellationToken) -> Result<()> {
            self.calls.lock().unwrap().push(Call::From(source.to_string(), dest.to_path_buf()));
            if self.fail {
                return Err(VagrantMcpError::failed("vagrant rsync-back", "connection refused"));
            }
            let content = self.guest_files.lock().unwrap().get(source).cloned();
            if let Some(content) = content {
                std::fs::write(dest, content)?;
            }
            Ok(())
        }
    }

    fn conflict(path: &Path, guest: Option<&str>) -> SyncConflict {
        SyncConflict {
            path: path.to_path_buf(),
            host_mod_time: None,
            guest_mod_time: None,
            host_content: None,
            guest_content: guest.map(str::to_string),
            kind: ConflictKind::Modification,
        }
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let engine = SyncEngine::new(FakeBackend::new(false));
        engine.register_vm("t1", SyncConfig::new("t1", "/p")).await.unwrap();
        let err = engine.register_vm("t1", SyncConfig::new("t1", "/p")).await.unwrap_err();
        assert!(matches!(err, VagrantMcpError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_unregister_twice_is_not_found() {
        let engine = SyncEngine::new(FakeBackend::new(false));
        engine.register_vm("t1", SyncConfig::new("t1", "/p")).await.unwrap();
        engine.unregister_vm("t1").await.unwrap();
        let err = engine.unregister_vm("t1").await.unwrap_err();
        assert!(matches!(err, VagrantMcpError::NotFound(_)));
        assert!(err.to_string().contains("VM not registered"));
    }

    #[tokio::test]
    async fn test_defaults_applied() {
        let engine = SyncEngine::new(FakeBackend::new(false));
        let mut config = SyncConfig::new("other", "/p");
        config.watch_interval = std::time::Duration::ZERO;
        engine.register_vm("t1", config).await.unwrap();

        let stored = engine.get_sync_config("t1").await.unwrap();
        assert_eq!(stored.vm_name, "t1");
        assert_eq!(stored.watch_interval, DEFAULT_WATCH_INTERVAL);
        assert_eq!(stored.method, crate::sync::SyncMethod::Rsync);
        assert_eq!(stored.direction, crate::sync::SyncDirection::Bidirectional);
    }

    #[tokio::test]
    async fn test_sync_to_vm_updates_counters() {
        let project = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new(false);
        let engine = SyncEngine::new(backend.clone());
        engine
            .register_vm("t1", SyncConfig::new("t1", project.path()))
            .await
            .unwrap();

        let result = engine.sync_to_vm("t1", None, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.synced_files.len(), 1);

        let status = engine.get_sync_status("t1").await.unwrap();
        assert!(!status.in_progress);
        assert_eq!(status.total_syncs, 1);
        assert_eq!(status.synchronized_files, 1);
        assert!(status.last_sync_to_vm.is_some());
        assert!(status.error.is_none());

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![Call::To(project.path().to_path_buf(), "/vagrant".to_string())]);
    }

    #[tokio::test]
    async fn test_missing_source_records_error() {
        let backend = FakeBackend::new(false);
        let engine = SyncEngine::new(backend.clone());
        engine
            .register_vm("t1", SyncConfig::new("t1", "/definitely/not/here"))
            .await
            .unwrap();

        let err = engine.sync_to_vm("t1", None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, VagrantMcpError::OperationFailed { .. }));

        let status = engine.get_sync_status("t1").await.unwrap();
        assert!(!status.in_progress);
        assert!(status.error.unwrap().contains("does not exist"));
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_registration() {
        let project = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(FakeBackend::new(true));
        engine
            .register_vm("t1", SyncConfig::new("t1", project.path()))
            .await
            .unwrap();

        let err = engine.sync_from_vm("t1", None, &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(engine.is_registered("t1").await);
        let status = engine.get_sync_status("t1").await.unwrap();
        assert!(status.error.is_some());
        assert_eq!(status.total_syncs, 0);
    }

    #[tokio::test]
    async fn test_sync_from_vm_defaults_to_guest_mount() {
        let backend = FakeBackend::new(false);
        let engine = SyncEngine::new(backend.clone());
        engine.register_vm("t1", SyncConfig::new("t1", "/p")).await.unwrap();

        engine.sync_from_vm("t1", None, &CancellationToken::new()).await.unwrap();
        engine
            .sync_from_vm("t1", Some("/vagrant/src/lib.rs"), &CancellationToken::new())
            .await
            .unwrap();

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                Call::From("/vagrant".to_string(), PathBuf::from("/p")),
                Call::From("/vagrant/src/lib.rs".to_string(), PathBuf::from("/p/src/lib.rs")),
            ]
        );
        let status = engine.get_sync_status("t1").await.unwrap();
        assert_eq!(status.total_syncs, 2);
        assert!(status.last_sync_from_vm.is_some());
    }

    #[tokio::test]
    async fn test_keep_both_writes_sibling() {
        let project = tempfile::tempdir().unwrap();
        let file = project.path().join("a.txt");
        std::fs::write(&file, "H").unwrap();

        let backend = FakeBackend::new(false);
        let engine = SyncEngine::new(backend.clone());
        engine
            .register_vm("t1", SyncConfig::new("t1", project.path()))
            .await
            .unwrap();
        engine.record_conflict("t1", conflict(&file, Some("G"))).await.unwrap();

        let outcome = engine
            .resolve_sync_conflict("t1", &file, ResolutionStrategy::KeepBoth, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::Resolved);
        assert_eq!(std::fs::read_to_string(project.path().join("a.txt.vm")).unwrap(), "G");
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "H");

        let status = engine.get_sync_status("t1").await.unwrap();
        assert!(status.conflicts.is_empty());
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![Call::To(project.path().join("a.txt.vm"), "/vagrant/a.txt.vm".to_string())]
        );
    }

    #[tokio::test]
    async fn test_use_host_syncs_single_path() {
        let project = tempfile::tempdir().unwrap();
        let file = project.path().join("src").join("main.rs");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "fn main() {}").unwrap();

        let backend = FakeBackend::new(false);
        let engine = SyncEngine::new(backend.clone());
        engine
            .register_vm("t1", SyncConfig::new("t1", project.path()))
            .await
            .unwrap();
        engine.record_conflict("t1", conflict(&file, None)).await.unwrap();

        engine
            .resolve_sync_conflict("t1", &file, ResolutionStrategy::UseHost, &CancellationToken::new())
            .await
            .unwrap();
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![Call::To(file.clone(), "/vagrant/src/main.rs".to_string())]);
    }

    #[tokio::test]
    async fn test_use_guest_pulls_single_path() {
        let project = tempfile::tempdir().unwrap();
        let file = project.path().join("a.txt");
        std::fs::write(&file, "host\n").unwrap();

        let backend = FakeBackend::new(false);
        backend.put_guest_file("/vagrant/a.txt", "guest\n");
        let engine = SyncEngine::new(backend.clone());
        engine
            .register_vm("t1", SyncConfig::new("t1", project.path()))
            .await
            .unwrap();
        engine.record_conflict("t1", conflict(&file, None)).await.unwrap();

        let outcome = engine
            .resolve_sync_conflict("t1", &file, ResolutionStrategy::UseGuest, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::Resolved);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "guest\n");

        let status = engine.get_sync_status("t1").await.unwrap();
        assert!(status.conflicts.is_empty());
        assert!(status.last_sync_from_vm.is_some());
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![Call::From("/vagrant/a.txt".to_string(), file.clone())]);
    }

    #[tokio::test]
    async fn test_merge_clean_resolves() {
        if which::which("diff3").is_err() {
            return;
        }
        let project = tempfile::tempdir().unwrap();
        let file = project.path().join("notes.txt");
        std::fs::write(&file, "one\ntwo\n").unwrap();

        let backend = FakeBackend::new(false);
        let engine = SyncEngine::new(backend.clone());
        engine
            .register_vm("t1", SyncConfig::new("t1", project.path()))
            .await
            .unwrap();
        engine
            .record_conflict("t1", conflict(&file, Some("one\ntwo\nthree\n")))
            .await
            .unwrap();

        let outcome = engine
            .resolve_sync_conflict("t1", &file, ResolutionStrategy::Merge, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::Resolved);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "one\ntwo\nthree\n");

        let status = engine.get_sync_status("t1").await.unwrap();
        assert!(status.conflicts.is_empty());
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![Call::To(file.clone(), "/vagrant/notes.txt".to_string())]);
    }

    #[tokio::test]
    async fn test_merge_with_markers_keeps_conflict() {
        if which::which("diff3").is_err() {
            return;
        }
        let project = tempfile::tempdir().unwrap();
        let file = project.path().join("notes.txt");
        std::fs::write(&file, "a\nHOST\nc\n").unwrap();

        let backend = FakeBackend::new(false);
        let engine = SyncEngine::new(backend.clone());
        engine
            .register_vm("t1", SyncConfig::new("t1", project.path()))
            .await
            .unwrap();
        engine
            .record_conflict("t1", conflict(&file, Some("a\nGUEST\nc\n")))
            .await
            .unwrap();

        let outcome = engine
            .resolve_sync_conflict("t1", &file, ResolutionStrategy::Merge, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::ConflictsRetained);

        let merged = std::fs::read_to_string(&file).unwrap();
        assert!(merged.contains("<<<<<<< host"), "{}", merged);
        assert!(merged.contains("HOST") && merged.contains("GUEST"));

        let status = engine.get_sync_status("t1").await.unwrap();
        assert_eq!(status.conflicts.len(), 1);
        assert_eq!(status.conflicts[0].host_content.as_deref(), Some(merged.as_str()));
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![Call::To(file.clone(), "/vagrant/notes.txt".to_string())]);
    }

    #[tokio::test]
    async fn test_resolve_unknown_conflict_is_not_found() {
        let engine = SyncEngine::new(FakeBackend::new(false));
        engine.register_vm("t1", SyncConfig::new("t1", "/p")).await.unwrap();
        let err = engine
            .resolve_sync_conflict("t1", Path::new("/p/x"), ResolutionStrategy::UseHost, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VagrantMcpError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_config_preserves_status() {
        let project = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(FakeBackend::new(false));
        engine
            .register_vm("t1", SyncConfig::new("t1", project.path()))
            .await
            .unwrap();
        engine.sync_to_vm("t1", None, &CancellationToken::new()).await.unwrap();

        let mut config = engine.get_sync_config("t1").await.unwrap();
        config.exclude_patterns = vec!["target".to_string()];
        engine.update_sync_config("t1", config).await.unwrap();

        assert_eq!(engine.get_sync_status("t1").await.unwrap().total_syncs, 1);
        assert_eq!(
            engine.get_sync_config("t1").await.unwrap().exclude_patterns,
            vec!["target".to_string()]
        );
    }

    #[tokio::test]
    async fn test_concurrent_syncs_never_overlap() {
        let project = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(FakeBackend::new(false));
        engine
            .register_vm("t1", SyncConfig::new("t1", project.path()))
            .await
            .unwrap();

        let a = engine.clone();
        let b = engine.clone();
        let (ra, rb) = tokio::join!(
            async move { a.sync_to_vm("t1", None, &CancellationToken::new()).await },
            async move { b.sync_from_vm("t1", None, &CancellationToken::new()).await },
        );
        ra.unwrap();
        rb.unwrap();

        let status = engine.get_sync_status("t1").await.unwrap();
        assert_eq!(status.total_syncs, 2);
        assert!(!status.in_progress);
    }

    #[test]
    fn test_host_path_for() {
        let config = SyncConfig::new("t1", "/p");
        assert_eq!(host_path_for(&config, "/vagrant"), PathBuf::from("/p"));
        assert_eq!(host_path_for(&config, "/vagrant/"), PathBuf::from("/p"));
        assert_eq!(host_path_for(&config, "/vagrant/a/b.txt"), PathBuf::from("/p/a/b.txt"));
        assert_eq!(host_path_for(&config, "/etc/hosts"), PathBuf::from("/p/hosts"));
        assert_eq!(host_path_for(&config, "/vagrantfoo"), PathBuf::from("/p/vagrantfoo"));
    }
}
