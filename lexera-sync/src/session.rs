/// One editing session: the main board, its includes, and the machinery that
/// keeps them in step with the disk.
///
/// Wires the disk layer, self-write tracking, backups, the registry and the
/// coordinator together from a `SyncConfig`. Closing the session dismisses any
/// open conflict dialog (resolved as cancel) and stops the watcher pump.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};

use crate::backup::{BackupProvider, LocalBackups};
use crate::config::SyncConfig;
use crate::conflict::dialog::ConflictDialog;
use crate::conflict::strategy::ConflictResolver;
use crate::coordinator::{ChangeCoordinator, ChangeOutcome};
use crate::error::SyncError;
use crate::file::TrackedFile;
use crate::io::{DiskIo, LocalDisk, WriteOptions};
use crate::registry::FileRegistry;
use crate::watcher::self_write::SelfWriteTracker;
use crate::watcher::types::{ChangeType, SyncEvent};

#[cfg(feature = "file-watcher")]
use crate::watcher::file_watcher::FileWatcher;

pub struct EditorSession {
    config: SyncConfig,
    coordinator: Arc<ChangeCoordinator>,
    backups: Arc<dyn BackupProvider>,
    self_writes: Arc<Mutex<SelfWriteTracker>>,
    shutdown_tx: watch::Sender<bool>,
    #[cfg(feature = "file-watcher")]
    watcher: Mutex<Option<FileWatcher>>,
}

impl EditorSession {
    /// Open `main_path` with the default strategy chain around `dialog`.
    pub async fn open(
        main_path: &Path,
        config: SyncConfig,
        dialog: Arc<dyn ConflictDialog>,
    ) -> Result<Self, SyncError> {
        Self::open_with_resolver(main_path, config, ConflictResolver::new(dialog)).await
    }

    pub async fn open_with_resolver(
        main_path: &Path,
        config: SyncConfig,
        resolver: ConflictResolver,
    ) -> Result<Self, SyncError> {
        let disk: Arc<dyn DiskIo> = Arc::new(LocalDisk::new(config.write_retries, config.retry_delay()));
        let self_writes = Arc::new(Mutex::new(SelfWriteTracker::new(config.self_write_ttl())));
        let main = TrackedFile::open_main(main_path, disk, self_writes.clone()).await?;
        let registry = Arc::new(FileRegistry::open(main).await?);
        let backups: Arc<dyn BackupProvider> = Arc::new(LocalBackups::new(&config.backup));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Arc::new(ChangeCoordinator::new(
            registry.clone(),
            resolver,
            backups.clone(),
            &config,
            shutdown_rx,
        ));

        log::info!(
            "[lexera.session.open] Opened {:?} with {} include(s)",
            registry.main_file().path(),
            registry.include_files().len()
        );

        Ok(Self {
            config,
            coordinator,
            backups,
            self_writes,
            shutdown_tx,
            #[cfg(feature = "file-watcher")]
            watcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<ChangeCoordinator> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        self.coordinator.registry()
    }

    pub fn main_file(&self) -> &Arc<TrackedFile> {
        self.registry().main_file()
    }

    pub fn self_writes(&self) -> &Arc<Mutex<SelfWriteTracker>> {
        &self.self_writes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.coordinator.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Feed one disk notification through the coordinator.
    pub async fn handle_change(&self, path: &Path, change: ChangeType) -> Result<ChangeOutcome, SyncError> {
        if self.is_closed() {
            return Err(SyncError::NotTracked(path.to_path_buf()));
        }
        self.coordinator.handle_path_change(path, change).await
    }

    /// User-initiated save of the board and every include with unsaved work.
    /// Returns the paths written.
    pub async fn save_all(&self) -> Result<Vec<PathBuf>, SyncError> {
        let mut options = WriteOptions::validated();
        if self.config.backup.enabled {
            options = options.with_backup("save");
        }

        let mut saved = Vec::new();
        let main = self.main_file();
        if main.has_unsaved_work() || !main.exists() {
            main.save(&options, Some(self.backups.as_ref())).await?;
            saved.push(main.path().to_path_buf());
        }
        for include in self.registry().dirty_includes() {
            include.save(&options, Some(self.backups.as_ref())).await?;
            saved.push(include.path().to_path_buf());
        }

        let changes = self.registry().sync_includes().await?;
        if !changes.is_empty() {
            self.refresh_watched_paths()?;
        }
        Ok(saved)
    }

    /// Start watching every tracked file and pump its events into the
    /// coordinator. Must be called inside a tokio runtime.
    #[cfg(feature = "file-watcher")]
    pub fn start_watching(&self) -> Result<(), SyncError> {
        let mut slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(());
        }

        let (mut watcher, rx) = FileWatcher::new(self.config.debounce(), self.self_writes.clone())?;
        watcher.sync_paths(&self.registry().all_paths())?;
        tokio::spawn(self.coordinator.clone().run(rx));
        *slot = Some(watcher);
        log::info!("[lexera.session.watch] Watching {} file(s)", self.registry().all_paths().len());
        Ok(())
    }

    /// Re-align the watcher with the registry after the include set changed.
    pub fn refresh_watched_paths(&self) -> Result<(), SyncError> {
        #[cfg(feature = "file-watcher")]
        {
            let mut slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(watcher) = slot.as_mut() {
                watcher.sync_paths(&self.registry().all_paths())?;
            }
        }
        Ok(())
    }

    /// Dismiss pending dialogs, stop the pump and forget the includes.
    pub fn close(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        #[cfg(feature = "file-watcher")]
        {
            self.watcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        }
        self.registry().clear();
        log::info!("[lexera.session.close] Closed {:?}", self.main_file().path());
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
