/// A file under management: the main board or one of its includes.
///
/// Every variant goes through the same contract (`read_from_disk`,
/// `write_to_disk`, `validate`, `conflict_context`); the `FileKind` tag only
/// changes validation rules. State is only written through the methods here,
/// which the coordinator and the UI layer call.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};

use crate::backup::BackupProvider;
use crate::conflict::detection::ConflictDetector;
use crate::conflict::types::ConflictContext;
use crate::error::SyncError;
use crate::include::resolver::relative_display;
use crate::io::{DiskIo, WriteOptions};
use crate::state::{FileKind, FileState};
use crate::watcher::self_write::SelfWriteTracker;

pub struct TrackedFile {
    path: PathBuf,
    relative_path: String,
    kind: FileKind,
    /// Includes only. Never keeps the parent alive.
    parent: Option<Weak<TrackedFile>>,
    state: Mutex<FileState>,
    disk: Arc<dyn DiskIo>,
    self_writes: Arc<Mutex<SelfWriteTracker>>,
}

impl std::fmt::Debug for TrackedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedFile")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("state", &*self.lock())
            .finish()
    }
}

impl TrackedFile {
    pub fn new(
        path: PathBuf,
        kind: FileKind,
        parent: Option<&Arc<TrackedFile>>,
        state: FileState,
        disk: Arc<dyn DiskIo>,
        self_writes: Arc<Mutex<SelfWriteTracker>>,
    ) -> Arc<Self> {
        let relative_path = match parent {
            Some(p) => relative_display(&path, p.directory()),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        Arc::new(Self {
            path,
            relative_path,
            kind,
            parent: parent.map(Arc::downgrade),
            state: Mutex::new(state),
            disk,
            self_writes,
        })
    }

    /// Open the main board. The file must exist.
    pub async fn open_main(
        path: &Path,
        disk: Arc<dyn DiskIo>,
        self_writes: Arc<Mutex<SelfWriteTracker>>,
    ) -> Result<Arc<Self>, SyncError> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let content = read_or_missing(disk.as_ref(), &path).await?;
        let file = Self::new(
            path,
            FileKind::Main,
            None,
            FileState::loaded(content.clone()),
            disk,
            self_writes,
        );
        if let Err(e) = file.validate(&content) {
            log::warn!("[lexera.file.open] {}", e);
        }
        Ok(file)
    }

    /// Open an include of `parent`. A missing file is tracked with `exists=false`.
    pub async fn open_include(
        parent: &Arc<TrackedFile>,
        path: PathBuf,
        kind: FileKind,
    ) -> Result<Arc<Self>, SyncError> {
        let state = match read_or_missing(parent.disk.as_ref(), &path).await {
            Ok(content) => FileState::loaded(content),
            Err(SyncError::FileMissing(_)) => {
                log::warn!("[lexera.file.include] Include file {:?} does not exist", path);
                FileState::missing()
            }
            Err(e) => return Err(e),
        };
        Ok(Self::new(
            path,
            kind,
            Some(parent),
            state,
            parent.disk.clone(),
            parent.self_writes.clone(),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    pub fn parent(&self) -> Option<Arc<TrackedFile>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> FileState {
        self.lock().clone()
    }

    pub fn content(&self) -> String {
        self.lock().content.clone()
    }

    pub fn baseline(&self) -> String {
        self.lock().baseline.clone()
    }

    pub fn exists(&self) -> bool {
        self.lock().exists
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.lock().has_unsaved_changes()
    }

    pub fn has_unsaved_work(&self) -> bool {
        self.lock().has_unsaved_work()
    }

    pub fn has_external_changes(&self) -> bool {
        self.lock().has_external_changes
    }

    pub fn is_in_edit_mode(&self) -> bool {
        self.lock().is_in_edit_mode
    }

    pub fn has_cached_snapshot(&self) -> bool {
        self.lock().cached_snapshot.is_some()
    }

    // UI layer

    /// A UI edit. Only touches `content`.
    pub fn set_content(&self, content: impl Into<String>) {
        self.lock().content = content.into();
    }

    pub fn set_edit_mode(&self, editing: bool) {
        self.lock().is_in_edit_mode = editing;
    }

    pub fn set_cached_snapshot(&self, snapshot: Option<String>) {
        self.lock().cached_snapshot = snapshot;
    }

    /// Move the cached board snapshot into `content`.
    pub fn flush_cached_snapshot(&self) -> bool {
        let mut state = self.lock();
        match state.cached_snapshot.take() {
            Some(snapshot) => {
                state.content = snapshot;
                true
            }
            None => false,
        }
    }

    // Disk layer notifications

    pub fn mark_external_change(&self, at: DateTime<Utc>) {
        let mut state = self.lock();
        state.has_external_changes = true;
        state.external_change_time = Some(at);
    }

    /// Content is kept for a later "save as new file".
    pub fn mark_deleted(&self) {
        let mut state = self.lock();
        state.exists = false;
        state.has_external_changes = true;
        state.external_change_time = Some(Utc::now());
    }

    pub fn mark_created(&self) {
        self.lock().exists = true;
    }

    // Variant contract

    pub async fn read_from_disk(&self) -> Result<String, SyncError> {
        read_or_missing(self.disk.as_ref(), &self.path).await
    }

    /// Write `content`, marking the resulting notification as our own.
    pub async fn write_to_disk(&self, content: &str) -> Result<(), SyncError> {
        self.with_self_writes(|t| t.mark(&self.path, content));
        if let Err(e) = self.disk.write(&self.path, content).await {
            self.with_self_writes(|t| t.unmark(&self.path));
            return Err(e.into());
        }
        Ok(())
    }

    pub fn validate(&self, content: &str) -> Result<(), SyncError> {
        let reason = match self.kind {
            FileKind::Main if !content.trim().is_empty() && !is_kanban_board(content) => {
                Some("main file has no `kanban-plugin: board` front matter")
            }
            FileKind::IncludeColumn if is_kanban_board(content) => {
                Some("a column include cannot be a kanban board itself")
            }
            _ => None,
        };
        match reason {
            Some(reason) => Err(SyncError::InvalidContent {
                path: self.path.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Conflict snapshot of this file on its own.
    pub fn conflict_context(&self) -> ConflictContext {
        let state = self.lock();
        let mut ctx = ConflictContext::new(self.kind, self.path.clone());
        ctx.exists = state.exists;
        if self.kind.is_main() {
            ctx.has_main_unsaved_changes = state.has_unsaved_work();
        } else {
            ctx.has_include_unsaved_changes = state.has_unsaved_work();
        }
        ctx.has_external_changes = state.has_external_changes;
        ctx.is_in_edit_mode = state.is_in_edit_mode;
        ctx.last_save_time = state.last_self_save;
        ctx.external_change_time = state.external_change_time;
        ctx
    }

    pub fn has_conflict(&self, detector: &ConflictDetector) -> bool {
        !detector.detect(&self.conflict_context()).is_empty()
    }

    // Transitions

    /// Replace content and baseline with fresh disk text.
    pub async fn reload(&self) -> Result<(), SyncError> {
        let disk = self.read_from_disk().await?;
        self.apply_disk_content(disk);
        log::info!("[lexera.file.reload] Reloaded {}", self.relative_path);
        Ok(())
    }

    pub(crate) fn apply_disk_content(&self, disk: String) {
        self.lock().apply_disk_content(disk);
    }

    /// Flush any cached snapshot, then write `content` to disk.
    pub async fn save(
        &self,
        options: &WriteOptions,
        backups: Option<&dyn BackupProvider>,
    ) -> Result<(), SyncError> {
        self.flush_cached_snapshot();
        let content = self.content();

        if options.validate {
            self.validate(&content)?;
        }

        if let (Some(label), Some(backups)) = (&options.backup_label, backups) {
            self.backup_disk_content(backups, label).await;
        }

        self.write_to_disk(&content).await?;
        self.lock().apply_saved_content(content);
        log::info!("[lexera.file.save] Saved {}", self.relative_path);
        Ok(())
    }

    /// Keep in-memory state, forget the pending external change.
    pub fn ignore_external_change(&self) {
        self.lock().clear_external_change();
    }

    /// Drop local content of a file that no longer exists on disk.
    pub fn discard_missing(&self) {
        let mut state = self.lock();
        state.content.clear();
        state.baseline.clear();
        state.cached_snapshot = None;
        state.clear_external_change();
    }

    /// Preparatory backup of whatever is on disk now. Failures are logged only.
    pub async fn backup_disk_content(&self, backups: &dyn BackupProvider, label: &str) {
        let disk = match self.read_from_disk().await {
            Ok(disk) => disk,
            Err(e) => {
                log::debug!("[lexera.file.backup] Nothing to back up for {}: {}", self.relative_path, e);
                return;
            }
        };
        if let Err(e) = backups.create_backup(&self.path, &disk, label).await {
            log::warn!("[lexera.file.backup] Continuing without backup: {}", e);
        }
    }

    /// Back up the local side (content, or the unflushed snapshot).
    pub async fn backup_local_content(
        &self,
        backups: &dyn BackupProvider,
        label: &str,
    ) -> Result<PathBuf, SyncError> {
        let local = {
            let state = self.lock();
            state
                .cached_snapshot
                .clone()
                .unwrap_or_else(|| state.content.clone())
        };
        backups.create_backup(&self.path, &local, label).await
    }

    fn with_self_writes(&self, f: impl FnOnce(&mut SelfWriteTracker)) {
        let mut tracker = self.self_writes.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut tracker);
    }
}

async fn read_or_missing(disk: &dyn DiskIo, path: &Path) -> Result<String, SyncError> {
    match disk.read(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(SyncError::FileMissing(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// YAML front matter declaring `kanban-plugin: board`.
fn is_kanban_board(content: &str) -> bool {
    let mut lines = content.lines();
    if lines.next().map(str::trim) != Some("---") {
        return false;
    }
    lines
        .take_while(|l| l.trim() != "---")
        .any(|l| l.trim() == "kanban-plugin: board")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::LocalBackups;
    use crate::config::BackupConfig;
    use crate::io::LocalDisk;
    use std::fs;

    const BOARD: &str = "---\nkanban-plugin: board\n---\n\n## Todo\n- [ ] Task\n";

    fn tracker() -> Arc<Mutex<SelfWriteTracker>> {
        Arc::new(Mutex::new(SelfWriteTracker::default()))
    }

    async fn open(dir: &Path) -> (Arc<TrackedFile>, Arc<Mutex<SelfWriteTracker>>) {
        let path = dir.join("board.md");
        fs::write(&path, BOARD).unwrap();
        let writes = tracker();
        let file = TrackedFile::open_main(&path, Arc::new(LocalDisk::default()), writes.clone())
            .await
            .unwrap();
        (file, writes)
    }

    #[tokio::test]
    async fn test_open_main_loads_content() {
        let dir = tempfile::tempdir().unwrap();
        let (file, _) = open(dir.path()).await;
        assert_eq!(file.kind(), FileKind::Main);
        assert_eq!(file.relative_path(), "board.md");
        assert_eq!(file.content(), BOARD);
        assert!(file.exists());
        assert!(!file.has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_open_main_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrackedFile::open_main(
            &dir.path().join("nope.md"),
            Arc::new(LocalDisk::default()),
            tracker(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::FileMissing(_)));
    }

    #[tokio::test]
    async fn test_include_parent_is_weak() {
        let dir = tempfile::tempdir().unwrap();
        let (main, _) = open(dir.path()).await;
        let include = TrackedFile::open_include(
            &main,
            main.directory().join("cols").join("a.md"),
            FileKind::IncludeColumn,
        )
        .await
        .unwrap();

        assert!(!include.exists());
        assert_eq!(include.relative_path(), "cols/a.md");
        assert_eq!(include.parent().unwrap().path(), main.path());

        drop(main);
        assert!(include.parent().is_none());
    }

    #[tokio::test]
    async fn test_save_marks_self_write_and_clears_unsaved() {
        let dir = tempfile::tempdir().unwrap();
        let (file, writes) = open(dir.path()).await;

        let edited = format!("{}- [ ] Another\n", BOARD);
        file.set_content(edited.clone());
        file.mark_external_change(Utc::now());
        assert!(file.has_unsaved_changes());

        file.save(&WriteOptions::validated(), None).await.unwrap();

        assert_eq!(fs::read_to_string(file.path()).unwrap(), edited);
        assert!(!file.has_unsaved_changes());
        assert!(!file.has_external_changes());
        assert!(writes.lock().unwrap().has_pending(file.path()));
        assert!(file.snapshot().last_self_save.is_some());
    }

    #[tokio::test]
    async fn test_save_flushes_cached_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (file, _) = open(dir.path()).await;
        let snapshot = format!("{}- [ ] From UI\n", BOARD);
        file.set_cached_snapshot(Some(snapshot.clone()));
        assert!(file.has_unsaved_work());

        file.save(&WriteOptions::default(), None).await.unwrap();
        assert!(!file.has_cached_snapshot());
        assert_eq!(fs::read_to_string(file.path()).unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_validated_save_rejects_invalid_board() {
        let dir = tempfile::tempdir().unwrap();
        let (file, writes) = open(dir.path()).await;
        file.set_content("just some notes");

        let err = file.save(&WriteOptions::validated(), None).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidContent { .. }));
        assert_eq!(fs::read_to_string(file.path()).unwrap(), BOARD);
        assert!(!writes.lock().unwrap().has_pending(file.path()));
    }

    #[tokio::test]
    async fn test_save_with_backup_label_backs_up_disk() {
        let dir = tempfile::tempdir().unwrap();
        let (file, _) = open(dir.path()).await;
        let backups = LocalBackups::new(&BackupConfig::default());

        file.set_content(format!("{}- [ ] New\n", BOARD));
        file.save(&WriteOptions::default().with_backup("before-save"), Some(&backups))
            .await
            .unwrap();

        let saved = backups.list_backups(file.path(), "before-save");
        assert_eq!(saved.len(), 1);
        assert_eq!(fs::read_to_string(&saved[0]).unwrap(), BOARD);
    }

    #[tokio::test]
    async fn test_reload_replaces_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let (file, _) = open(dir.path()).await;
        file.set_content("local");
        file.set_cached_snapshot(Some("snap".to_string()));
        file.mark_external_change(Utc::now());

        let external = format!("{}- [ ] External\n", BOARD);
        fs::write(file.path(), &external).unwrap();
        file.reload().await.unwrap();

        let state = file.snapshot();
        assert_eq!(state.content, external);
        assert_eq!(state.baseline, external);
        assert!(state.cached_snapshot.is_none());
        assert!(!state.has_external_changes);
    }

    #[tokio::test]
    async fn test_conflict_context_reflects_flags() {
        let dir = tempfile::tempdir().unwrap();
        let (file, _) = open(dir.path()).await;
        file.set_content("changed");
        file.set_edit_mode(true);
        file.mark_external_change(Utc::now());

        let ctx = file.conflict_context();
        assert!(ctx.has_main_unsaved_changes);
        assert!(!ctx.has_include_unsaved_changes);
        assert!(ctx.has_external_changes);
        assert!(ctx.is_in_edit_mode);
        assert!(ctx.external_change_time.is_some());
        assert!(file.has_conflict(&ConflictDetector::default()));
    }

    #[test]
    fn test_validation_per_kind() {
        let make = |kind| {
            TrackedFile::new(
                PathBuf::from("/b/x.md"),
                kind,
                None,
                FileState::default(),
                Arc::new(LocalDisk::default()),
                tracker(),
            )
        };
        assert!(make(FileKind::Main).validate(BOARD).is_ok());
        assert!(make(FileKind::Main).validate("").is_ok());
        assert!(make(FileKind::Main).validate("## Todo").is_err());
        assert!(make(FileKind::IncludeColumn).validate(BOARD).is_err());
        assert!(make(FileKind::IncludeColumn).validate("## Slide\n").is_ok());
        assert!(make(FileKind::IncludeTask).validate(BOARD).is_ok());
        assert!(make(FileKind::IncludeRegular).validate("anything").is_ok());
    }
}
