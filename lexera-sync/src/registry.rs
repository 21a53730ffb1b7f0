/// The set of files one editing session tracks: the main board and the
/// include files it references.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::SyncError;
use crate::file::TrackedFile;
use crate::include::resolver::resolve_includes;

/// Includes added or dropped by a `sync_includes` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeChanges {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl IncludeChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct FileRegistry {
    main: Arc<TrackedFile>,
    /// Document order.
    includes: RwLock<Vec<Arc<TrackedFile>>>,
}

impl FileRegistry {
    pub fn new(main: Arc<TrackedFile>) -> Self {
        Self {
            main,
            includes: RwLock::new(Vec::new()),
        }
    }

    /// Registry for `main` with every referenced include loaded.
    pub async fn open(main: Arc<TrackedFile>) -> Result<Self, SyncError> {
        let registry = Self::new(main);
        registry.sync_includes().await?;
        Ok(registry)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<TrackedFile>>> {
        self.includes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<TrackedFile>>> {
        self.includes.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn main_file(&self) -> &Arc<TrackedFile> {
        &self.main
    }

    pub fn include_files(&self) -> Vec<Arc<TrackedFile>> {
        self.read().clone()
    }

    /// Includes carrying unsaved work.
    pub fn dirty_includes(&self) -> Vec<Arc<TrackedFile>> {
        self.read()
            .iter()
            .filter(|f| f.has_unsaved_work())
            .cloned()
            .collect()
    }

    pub fn has_unsaved_includes(&self) -> bool {
        self.read().iter().any(|f| f.has_unsaved_work())
    }

    /// Tracked file at `path` (main or include).
    pub fn find(&self, path: &Path) -> Option<Arc<TrackedFile>> {
        let canonical = std::fs::canonicalize(path).ok();
        let matches = |p: &Path| p == path || canonical.as_deref() == Some(p);

        if matches(self.main.path()) {
            return Some(self.main.clone());
        }
        self.read().iter().find(|f| matches(f.path())).cloned()
    }

    pub fn all_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.main.path().to_path_buf()];
        paths.extend(self.read().iter().map(|f| f.path().to_path_buf()));
        paths
    }

    /// Re-derive the include set from the main file's current content.
    /// New includes are read from disk. Includes that are no longer referenced
    /// are dropped unless they still hold unsaved work.
    pub async fn sync_includes(&self) -> Result<IncludeChanges, SyncError> {
        let referenced = resolve_includes(&self.main.content(), self.main.directory());
        let referenced_paths: HashSet<PathBuf> =
            referenced.iter().map(|r| r.path.clone()).collect();

        let known: HashSet<PathBuf> = self
            .read()
            .iter()
            .map(|f| f.path().to_path_buf())
            .collect();

        let mut opened = Vec::new();
        for include in referenced.iter().filter(|r| !known.contains(&r.path)) {
            let file = TrackedFile::open_include(&self.main, include.path.clone(), include.kind).await?;
            log::info!(
                "[lexera.registry.include] Tracking {} include {}",
                include.kind,
                file.relative_path()
            );
            opened.push(file);
        }

        let mut changes = IncludeChanges::default();
        let mut includes = self.write();
        includes.retain(|f| {
            if referenced_paths.contains(f.path()) {
                return true;
            }
            if f.has_unsaved_work() {
                log::warn!(
                    "[lexera.registry.include] {} is no longer referenced but has unsaved changes, keeping it",
                    f.relative_path()
                );
                return true;
            }
            changes.removed.push(f.path().to_path_buf());
            false
        });
        for file in opened {
            // another pass may have added it meanwhile
            if includes.iter().any(|f| f.path() == file.path()) {
                continue;
            }
            changes.added.push(file.path().to_path_buf());
            includes.push(file);
        }

        // keep document order
        let order: Vec<&PathBuf> = referenced.iter().map(|r| &r.path).collect();
        includes.sort_by_key(|f| {
            order
                .iter()
                .position(|p| p.as_path() == f.path())
                .unwrap_or(usize::MAX)
        });

        for path in &changes.removed {
            log::info!("[lexera.registry.include] Dropped include {:?}", path);
        }
        Ok(changes)
    }

    /// Forget every include (session teardown).
    pub fn clear(&self) {
        self.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalDisk;
    use crate::state::FileKind;
    use crate::watcher::self_write::SelfWriteTracker;
    use std::fs;
    use std::sync::Mutex;

    const BOARD: &str = "\
---
kanban-plugin: board
---

## !!!include(cols.md)!!!
- [ ] !!!include(tasks/one.md)!!!
";

    async fn setup(dir: &Path, board: &str) -> FileRegistry {
        let path = dir.join("board.md");
        fs::write(&path, board).unwrap();
        fs::write(dir.join("cols.md"), "## Slide\n").unwrap();
        let main = TrackedFile::open_main(
            &path,
            Arc::new(LocalDisk::default()),
            Arc::new(Mutex::new(SelfWriteTracker::default())),
        )
        .await
        .unwrap();
        FileRegistry::open(main).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_discovers_includes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path(), BOARD).await;

        let includes = registry.include_files();
        assert_eq!(includes.len(), 2);
        assert_eq!(includes[0].kind(), FileKind::IncludeColumn);
        assert!(includes[0].exists());
        assert_eq!(includes[0].content(), "## Slide\n");
        assert_eq!(includes[1].kind(), FileKind::IncludeTask);
        assert!(!includes[1].exists());
        assert_eq!(registry.all_paths().len(), 3);
    }

    #[tokio::test]
    async fn test_find_main_and_include() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path(), BOARD).await;

        let main = registry.find(&dir.path().join("board.md")).unwrap();
        assert_eq!(main.kind(), FileKind::Main);
        let col = registry.find(&dir.path().join("cols.md")).unwrap();
        assert_eq!(col.kind(), FileKind::IncludeColumn);
        assert!(registry.find(&dir.path().join("other.md")).is_none());
    }

    #[tokio::test]
    async fn test_unsaved_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path(), BOARD).await;
        assert!(!registry.has_unsaved_includes());

        registry.include_files()[0].set_content("## Edited\n");
        assert!(registry.has_unsaved_includes());
        assert_eq!(registry.dirty_includes().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_includes_adds_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path(), BOARD).await;

        registry
            .main_file()
            .set_content("---\nkanban-plugin: board\n---\n\n## !!!include(cols.md)!!!\n!!!include(notes.md)!!!\n");
        let changes = registry.sync_includes().await.unwrap();

        assert_eq!(changes.added.len(), 1);
        assert!(changes.added[0].ends_with("notes.md"));
        assert_eq!(changes.removed.len(), 1);
        assert!(changes.removed[0].ends_with("tasks/one.md"));

        let kinds: Vec<FileKind> = registry.include_files().iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, vec![FileKind::IncludeColumn, FileKind::IncludeRegular]);
    }

    #[tokio::test]
    async fn test_sync_keeps_dirty_unreferenced_include() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path(), BOARD).await;
        registry.include_files()[0].set_content("## Unsaved\n");

        registry
            .main_file()
            .set_content("---\nkanban-plugin: board\n---\n\n## Plain\n");
        let changes = registry.sync_includes().await.unwrap();

        assert_eq!(changes.removed.len(), 1);
        assert_eq!(registry.include_files().len(), 1);
        assert_eq!(registry.include_files()[0].content(), "## Unsaved\n");
    }

    #[tokio::test]
    async fn test_parent_link() {
        let dir = tempfile::tempdir().unwrap();
        let registry = setup(dir.path(), BOARD).await;
        let parent = registry.include_files()[0].parent().unwrap();
        assert_eq!(parent.path(), registry.main_file().path());
    }
}
