/// File watcher using notify-debouncer-full.
///
/// Watches the parent directories of tracked files and turns debounced
/// notifications for those files into `FileChangeEvent`s. Notifications caused
/// by our own writes are dropped here, before anything reaches the coordinator.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use tokio::sync::broadcast;

use super::self_write::SelfWriteTracker;
use super::types::{ChangeType, FileChangeEvent};

#[derive(Debug, Default)]
struct WatchedPaths {
    files: HashSet<PathBuf>,
    /// watched parent directories (to avoid duplicate watches)
    dirs: HashSet<PathBuf>,
}

pub struct FileWatcher {
    debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
    watched: Arc<RwLock<WatchedPaths>>,
}

impl FileWatcher {
    /// Create a watcher with the given debounce window.
    /// Returns the watcher and a broadcast receiver for its events.
    pub fn new(
        debounce: Duration,
        self_writes: Arc<Mutex<SelfWriteTracker>>,
    ) -> Result<(Self, broadcast::Receiver<FileChangeEvent>), notify::Error> {
        let (event_tx, event_rx) = broadcast::channel(256);
        let watched = Arc::new(RwLock::new(WatchedPaths::default()));

        let watched_clone = watched.clone();

        let debouncer = new_debouncer(
            debounce,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
                Ok(events) => {
                    for event in events {
                        handle_debounced_event(&event, &watched_clone, &self_writes, &event_tx);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        log::error!("[lexera.watcher.error] Watch error: {}", e);
                    }
                }
            },
        )?;

        Ok((
            Self {
                debouncer,
                watched,
            },
            event_rx,
        ))
    }

    pub fn watch(&mut self, path: &Path) -> Result<(), notify::Error> {
        let canonical = canonical(path);
        self.watched
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .files
            .insert(canonical.clone());
        self.ensure_watched(&canonical)?;
        log::info!("[lexera.watcher.file] Watching {:?}", canonical);
        Ok(())
    }

    /// Stop reporting a path. Its directory stays watched.
    pub fn unwatch(&mut self, path: &Path) {
        self.watched
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .files
            .remove(&canonical(path));
    }

    /// Make the watched set equal to `paths`.
    pub fn sync_paths(&mut self, paths: &[PathBuf]) -> Result<(), notify::Error> {
        let wanted: HashSet<PathBuf> = paths.iter().map(|p| canonical(p)).collect();
        let stale: Vec<PathBuf> = {
            let watched = self.watched.read().unwrap_or_else(|e| e.into_inner());
            watched.files.difference(&wanted).cloned().collect()
        };
        for path in stale {
            self.unwatch(&path);
        }
        for path in paths {
            if !self.is_watching(path) {
                self.watch(path)?;
            }
        }
        Ok(())
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .files
            .contains(&canonical(path))
    }

    fn ensure_watched(&mut self, file_path: &Path) -> Result<(), notify::Error> {
        if let Some(parent) = file_path.parent() {
            {
                let mut watched = self.watched.write().unwrap_or_else(|e| e.into_inner());
                if !watched.dirs.insert(parent.to_path_buf()) {
                    return Ok(());
                }
            }
            self.debouncer.watch(parent, RecursiveMode::NonRecursive)?;
        }
        Ok(())
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn change_type(kind: &EventKind) -> Option<ChangeType> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Create(_) => Some(ChangeType::Created),
        EventKind::Remove(_) => Some(ChangeType::Deleted),
        _ => Some(ChangeType::Modified),
    }
}

fn handle_debounced_event(
    event: &DebouncedEvent,
    watched: &RwLock<WatchedPaths>,
    self_writes: &Mutex<SelfWriteTracker>,
    tx: &broadcast::Sender<FileChangeEvent>,
) {
    let Some(change) = change_type(&event.kind) else {
        return;
    };

    for path in &event.paths {
        let path = canonical(path);
        if !watched
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .files
            .contains(&path)
        {
            continue;
        }

        if change != ChangeType::Deleted {
            let current = std::fs::read_to_string(&path).ok();
            let own = self_writes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .check_and_consume(&path, current.as_deref());
            if own {
                log::debug!("[lexera.watcher.self_write] Suppressed own write to {:?}", path);
                continue;
            }
        }

        if let Err(e) = tx.send(FileChangeEvent::new(path, change)) {
            log::warn!("[lexera.watcher.send] No receivers: {}", e);
        }
    }
}
