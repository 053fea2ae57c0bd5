//! Per-VM project watcher feeding debounced sync-to-VM passes.

use crate::error::{Result, VagrantMcpError};
use crate::sync::{SyncConfig, SyncEngine};
use notify::event::CreateKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct WatcherHandle {
    stop: CancellationToken,
    _task: JoinHandle<()>,
}

impl WatcherHandle {
    pub(crate) fn stop(self) {
        self.stop.cancel();
    }
}

/// Watch `config.project_path` and push changed files after each quiet spell.
pub(crate) fn spawn(
    engine: SyncEngine,
    config: SyncConfig,
    stop: CancellationToken,
) -> Result<WatcherHandle> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })
    .map_err(|e| VagrantMcpError::failed("start file watcher", e))?;

    watcher
        .watch(&config.project_path, RecursiveMode::NonRecursive)
        .map_err(|e| VagrantMcpError::failed("start file watcher", e))?;
    watch_subdirectories(&mut watcher, &config, &config.project_path);

    debug!(vm = %config.vm_name, path = %config.project_path.display(), "watching project");
    let task = tokio::spawn(run(engine, config, watcher, rx, stop.clone()));
    Ok(WatcherHandle { stop, _task: task })
}

/// Add every non-excluded directory below `dir`. Failures are logged and skipped.
fn watch_subdirectories(watcher: &mut RecommendedWatcher, config: &SyncConfig, dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "cannot list directory");
            return;
        }
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir || config.is_excluded(&path) {
            continue;
        }
        if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
            warn!(path = %path.display(), error = %e, "cannot watch directory");
            continue;
        }
        watch_subdirectories(watcher, config, &path);
    }
}

async fn run(
    engine: SyncEngine,
    config: SyncConfig,
    mut watcher: RecommendedWatcher,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    stop: CancellationToken,
) {
    let name = config.vm_name.clone();
    // Armed by the first change of a batch; later changes join that batch.
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(vm = %name, error = %e, "watch error");
                        continue;
                    }
                };
                let changed = changed_files(&mut watcher, &config, event);
                if !changed.is_empty() {
                    engine.queue_changes(&name, changed).await;
                    deadline.get_or_insert_with(|| Instant::now() + config.watch_interval);
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                match engine.flush_pending(&name, &stop).await {
                    Ok(Some(result)) => debug!(vm = %name, files = result.synced_files.len(), "watcher sync done"),
                    Ok(None) => {}
                    Err(e) => warn!(vm = %name, error = %e, "watcher sync failed"),
                }
            }
        }
    }
    debug!(vm = %name, "watcher stopped");
}

/// Files touched by a create or write event. New directories are watched
/// and do not count as changes themselves.
fn changed_files(watcher: &mut RecommendedWatcher, config: &SyncConfig, event: Event) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }

    let mut changed = Vec::new();
    for path in event.paths {
        if config.is_excluded(&path) {
            continue;
        }
        if matches!(event.kind, EventKind::Create(CreateKind::Folder)) || path.is_dir() {
            if matches!(event.kind, EventKind::Create(_)) {
                match watcher.watch(&path, RecursiveMode::NonRecursive) {
                    Ok(()) => watch_subdirectories(watcher, config, &path),
                    Err(e) => warn!(path = %path.display(), error = %e, "cannot watch new directory"),
                }
            }
            continue;
        }
        changed.push(path);
    }
    changed
}
