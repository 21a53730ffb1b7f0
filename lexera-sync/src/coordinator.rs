/// Reaction to "file changed on disk" notifications, for the main board and
/// its includes alike.
///
/// Per notification: decide reload vs. conflict vs. nothing, apply the
/// decision, fan the result out to listeners, leave the flags consistent.
///
/// At most one handler runs per file. A notification arriving while its file
/// is busy is coalesced into the running handler; deletions and creations are
/// replayed once it finishes. The busy marker is released by a drop guard so a
/// failing handler cannot leave a file blocked.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{broadcast, watch};

use crate::backup::BackupProvider;
use crate::config::SyncConfig;
use crate::conflict::detection::{concurrent_modification, ConflictDetector, ExternalSaveClass};
use crate::conflict::strategy::ConflictResolver;
use crate::conflict::types::{Conflict, ConflictContext, Resolution, ResolutionAction};
use crate::error::SyncError;
use crate::file::TrackedFile;
use crate::io::WriteOptions;
use crate::registry::FileRegistry;
use crate::watcher::types::{ChangeType, FileChangeEvent, SyncEvent};

const EVENT_CAPACITY: usize = 256;

/// What handling a notification ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Nothing to do (e.g. disk matches the baseline).
    NoAction,
    /// Disk content was absorbed without asking.
    Reloaded,
    /// The file is gone; local content is kept.
    Deleted,
    /// Folded into a handler already running for this file.
    Coalesced,
    /// A conflict was resolved with this action.
    Resolved(ResolutionAction),
    /// The conflict was not resolved; state is untouched.
    Cancelled,
}

#[derive(Default)]
struct ActiveEntry {
    deferred: Option<ChangeType>,
}

/// Releases a file's busy marker on drop.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashMap<PathBuf, ActiveEntry>>,
    path: PathBuf,
}

impl ActiveGuard<'_> {
    fn take_deferred(&self) -> Option<ChangeType> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.get_mut(&self.path).and_then(|e| e.deferred.take())
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.path);
    }
}

pub struct ChangeCoordinator {
    registry: Arc<FileRegistry>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    backups: Arc<dyn BackupProvider>,
    auto_backup: bool,
    active: Mutex<HashMap<PathBuf, ActiveEntry>>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: watch::Receiver<bool>,
}

impl ChangeCoordinator {
    pub fn new(
        registry: Arc<FileRegistry>,
        resolver: ConflictResolver,
        backups: Arc<dyn BackupProvider>,
        config: &SyncConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            detector: ConflictDetector::new(config.legitimate_save_threshold()),
            resolver,
            backups,
            auto_backup: config.backup.enabled && config.auto_backup_before_reload,
            active: Mutex::new(HashMap::new()),
            events,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// True while a handler (and possibly its dialog) runs for `path`.
    pub fn is_busy(&self, path: &Path) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }

    /// Look up the tracked file for `path` and handle the change.
    pub async fn handle_path_change(&self, path: &Path, change: ChangeType) -> Result<ChangeOutcome, SyncError> {
        let file = self
            .registry
            .find(path)
            .ok_or_else(|| SyncError::NotTracked(path.to_path_buf()))?;
        self.handle_external_change(&file, change).await
    }

    pub async fn handle_external_change(
        &self,
        file: &Arc<TrackedFile>,
        change: ChangeType,
    ) -> Result<ChangeOutcome, SyncError> {
        let Some(guard) = self.try_begin(file, change) else {
            return Ok(ChangeOutcome::Coalesced);
        };

        let mut change = change;
        loop {
            let outcome = self.process(file, change).await?;
            match guard.take_deferred() {
                Some(ChangeType::Modified)
                    if matches!(outcome, ChangeOutcome::Resolved(_) | ChangeOutcome::Cancelled) =>
                {
                    // the user's decision already covered it
                    return Ok(outcome);
                }
                Some(next) => {
                    log::debug!(
                        "[lexera.coordinator.defer] Replaying {:?} for {}",
                        next,
                        file.relative_path()
                    );
                    change = next;
                }
                None => return Ok(outcome),
            }
        }
    }

    /// Run detection on a file's current flags and resolve whatever is pending,
    /// e.g. a deletion that was recorded earlier.
    pub async fn resolve_pending(&self, file: &Arc<TrackedFile>) -> Result<ChangeOutcome, SyncError> {
        let Some(_guard) = self.try_begin(file, ChangeType::Modified) else {
            return Ok(ChangeOutcome::Coalesced);
        };

        let ctx = self.context_for(file);
        let conflicts = self.detector.detect(&ctx);
        if ConflictResolver::shortcut(&conflicts, &ctx).is_some() {
            let disk = file.read_from_disk().await?;
            self.auto_reload(file, disk).await?;
            return Ok(ChangeOutcome::Reloaded);
        }
        match most_severe(conflicts) {
            Some(conflict) => self.run_dialog(file, conflict, ctx).await,
            None => Ok(ChangeOutcome::NoAction),
        }
    }

    /// Consume watcher events until shutdown, one task per event.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<FileChangeEvent>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                result = events.recv() => match result {
                    Ok(event) => {
                        let this = self.clone();
                        tokio::spawn(async move {
                            match this.handle_path_change(&event.path, event.change).await {
                                Ok(outcome) => log::debug!(
                                    "[lexera.coordinator.event] {:?} {:?} -> {:?}",
                                    event.change,
                                    event.path,
                                    outcome
                                ),
                                Err(e) => log::warn!(
                                    "[lexera.coordinator.event] Handling {:?} for {:?} failed: {}",
                                    event.change,
                                    event.path,
                                    e
                                ),
                            }
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("[lexera.coordinator.event] Lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        log::info!("[lexera.coordinator.event] Event channel closed");
                        break;
                    }
                },
                _ = wait_for_shutdown(shutdown.clone()) => {
                    log::info!("[lexera.coordinator.event] Shutdown signal received");
                    break;
                }
            }
            if *shutdown.borrow_and_update() {
                break;
            }
        }
    }

    fn try_begin(&self, file: &TrackedFile, change: ChangeType) -> Option<ActiveGuard<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = active.get_mut(file.path()) {
            match change {
                ChangeType::Modified => {
                    file.mark_external_change(Utc::now());
                    entry.deferred.get_or_insert(ChangeType::Modified);
                }
                other => entry.deferred = Some(other),
            }
            log::info!(
                "[lexera.coordinator.coalesce] {:?} for {} coalesced into running handler",
                change,
                file.relative_path()
            );
            return None;
        }
        active.insert(file.path().to_path_buf(), ActiveEntry::default());
        Some(ActiveGuard {
            active: &self.active,
            path: file.path().to_path_buf(),
        })
    }

    async fn process(&self, file: &Arc<TrackedFile>, change: ChangeType) -> Result<ChangeOutcome, SyncError> {
        match change {
            ChangeType::Deleted => Ok(self.handle_deleted(file)),
            ChangeType::Created => self.handle_created(file).await,
            ChangeType::Modified => self.handle_modified(file).await,
        }
    }

    fn handle_deleted(&self, file: &Arc<TrackedFile>) -> ChangeOutcome {
        file.mark_deleted();
        log::info!(
            "[lexera.coordinator.deleted] {} was deleted, keeping local content",
            file.relative_path()
        );
        self.emit(SyncEvent::Deleted {
            path: file.path().to_path_buf(),
            kind: file.kind(),
            parent: file.parent().map(|p| p.path().to_path_buf()),
        });
        ChangeOutcome::Deleted
    }

    async fn handle_created(&self, file: &Arc<TrackedFile>) -> Result<ChangeOutcome, SyncError> {
        file.mark_created();
        if file.has_unsaved_work() {
            return self.handle_modified(file).await;
        }
        let disk = match file.read_from_disk().await {
            Ok(disk) => disk,
            Err(SyncError::FileMissing(_)) => return Ok(self.handle_deleted(file)),
            Err(e) => return Err(e),
        };
        self.auto_reload(file, disk).await?;
        Ok(ChangeOutcome::Reloaded)
    }

    async fn handle_modified(&self, file: &Arc<TrackedFile>) -> Result<ChangeOutcome, SyncError> {
        file.mark_external_change(Utc::now());

        let disk = match file.read_from_disk().await {
            Ok(disk) => disk,
            Err(SyncError::FileMissing(_)) => return Ok(self.handle_deleted(file)),
            Err(e) => return Err(e),
        };
        file.mark_created();

        if disk == file.baseline() {
            log::debug!(
                "[lexera.coordinator.modified] {} unchanged on disk",
                file.relative_path()
            );
            file.ignore_external_change();
            return Ok(ChangeOutcome::NoAction);
        }

        let ctx = self.context_for(file);
        let aggregated_unsaved = ctx.has_unsaved_changes() || ctx.is_in_edit_mode;
        if file.kind().is_main()
            && aggregated_unsaved
            && ctx.has_external_changes
            && self.detector.classify_external_save(&ctx) == ExternalSaveClass::Concurrent
        {
            log::info!(
                "[lexera.coordinator.race] {} changed on disk while the board is being edited",
                file.relative_path()
            );
            // edit mode alone is an external-change conflict, not a concurrent one
            let conflict = if ctx.has_unsaved_changes() {
                Some(concurrent_modification(&ctx))
            } else {
                most_severe(self.detector.detect(&ctx))
            };
            if let Some(conflict) = conflict {
                return self.run_dialog(file, conflict, ctx).await;
            }
        }

        if !file.has_conflict(&self.detector) {
            self.auto_reload(file, disk).await?;
            return Ok(ChangeOutcome::Reloaded);
        }
        match most_severe(self.detector.detect(&file.conflict_context())) {
            Some(conflict) => self.run_dialog(file, conflict, ctx).await,
            None => Ok(ChangeOutcome::NoAction),
        }
    }

    /// The file's own context, plus include aggregation for the main file.
    fn context_for(&self, file: &TrackedFile) -> ConflictContext {
        let mut ctx = file.conflict_context();
        if file.kind().is_main() {
            ctx.has_include_unsaved_changes = self.registry.has_unsaved_includes();
        }
        ctx
    }

    /// Files a resolution on `file` applies to: the file, plus dirty includes
    /// when it is the main board.
    fn targets(&self, file: &Arc<TrackedFile>) -> Vec<Arc<TrackedFile>> {
        let mut targets = vec![file.clone()];
        if file.kind().is_main() {
            targets.extend(self.registry.dirty_includes());
        }
        targets
    }

    async fn auto_reload(&self, file: &Arc<TrackedFile>, disk: String) -> Result<(), SyncError> {
        let had_snapshot = file.has_cached_snapshot();
        if self.auto_backup && file.has_unsaved_work() {
            if let Err(e) = file.backup_local_content(self.backups.as_ref(), "auto-reload").await {
                log::warn!(
                    "[lexera.coordinator.reload] Backup before reload of {} failed, reloading anyway: {}",
                    file.relative_path(),
                    e
                );
            }
        }

        file.apply_disk_content(disk);
        log::info!("[lexera.coordinator.reload] Auto-reloaded {}", file.relative_path());
        self.emit_reloaded(file, had_snapshot);
        if file.kind().is_main() {
            self.sync_includes().await?;
        }
        Ok(())
    }

    async fn run_dialog(
        &self,
        file: &Arc<TrackedFile>,
        conflict: Conflict,
        ctx: ConflictContext,
    ) -> Result<ChangeOutcome, SyncError> {
        log::info!(
            "[lexera.coordinator.conflict] {} on {}: {}",
            conflict.kind,
            file.relative_path(),
            conflict.description
        );
        let resolution = tokio::select! {
            resolution = self.resolver.resolve(&conflict, &ctx) => resolution,
            _ = wait_for_shutdown(self.shutdown.clone()) => {
                log::info!(
                    "[lexera.coordinator.conflict] Session closing, dismissing dialog for {}",
                    file.relative_path()
                );
                Resolution::cancel()
            }
        };
        self.apply_resolution(file, resolution).await
    }

    /// Apply a resolution's effects: backup, then reload, then save, then ignore.
    pub async fn apply_resolution(
        &self,
        file: &Arc<TrackedFile>,
        resolution: Resolution,
    ) -> Result<ChangeOutcome, SyncError> {
        if !resolution.proceed {
            log::info!(
                "[lexera.coordinator.resolve] Conflict on {} left unresolved",
                file.relative_path()
            );
            self.emit(SyncEvent::ConflictCancelled {
                path: file.path().to_path_buf(),
            });
            return Ok(ChangeOutcome::Cancelled);
        }

        let targets = self.targets(file);

        // requested backups must succeed before anything is replaced
        if resolution.create_backup {
            for target in &targets {
                if resolution.reload {
                    target
                        .backup_local_content(self.backups.as_ref(), "conflict")
                        .await?;
                } else if resolution.save {
                    match target.read_from_disk().await {
                        Ok(disk) => {
                            self.backups
                                .create_backup(target.path(), &disk, "conflict")
                                .await?;
                        }
                        Err(SyncError::FileMissing(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        if resolution.reload {
            let had_snapshot = file.has_cached_snapshot();
            for target in &targets {
                if target.exists() {
                    target.reload().await?;
                } else {
                    target.discard_missing();
                }
                self.emit_reloaded(target, had_snapshot && target.kind().is_main());
            }
            if file.kind().is_main() {
                self.sync_includes().await?;
            }
        }

        if resolution.save {
            for target in &targets {
                target.save(&WriteOptions::default(), None).await?;
                self.emit(SyncEvent::Saved {
                    path: target.path().to_path_buf(),
                    kind: target.kind(),
                });
            }
        }

        if resolution.ignore {
            file.ignore_external_change();
            self.emit(SyncEvent::ExternalChangeIgnored {
                path: file.path().to_path_buf(),
            });
        }

        log::info!(
            "[lexera.coordinator.resolve] Applied {:?} to {}",
            resolution.action,
            file.relative_path()
        );
        self.emit(SyncEvent::ConflictResolved {
            path: file.path().to_path_buf(),
            action: resolution.action,
        });
        Ok(ChangeOutcome::Resolved(resolution.action))
    }

    async fn sync_includes(&self) -> Result<(), SyncError> {
        let changes = self.registry.sync_includes().await?;
        if !changes.is_empty() {
            self.emit(SyncEvent::IncludesChanged {
                added: changes.added.iter().map(|p| p.to_string_lossy().to_string()).collect(),
                removed: changes.removed.iter().map(|p| p.to_string_lossy().to_string()).collect(),
            });
        }
        Ok(())
    }

    fn emit_reloaded(&self, file: &TrackedFile, force_reparse: bool) {
        self.emit(SyncEvent::Reloaded {
            path: file.path().to_path_buf(),
            kind: file.kind(),
            parent: file.parent().map(|p| p.path().to_path_buf()),
            force_reparse,
        });
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            log::trace!("[lexera.coordinator.emit] No listeners");
        }
    }
}

fn most_severe(conflicts: Vec<Conflict>) -> Option<Conflict> {
    // first wins among equals, keeping detector order
    conflicts
        .into_iter()
        .rev()
        .max_by_key(|c| c.severity)
}

/// Resolves once the session shutdown flag is set or its sender is gone.
async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
