/// Backup copies of tracked files.
///
/// Backups are named `<stem>-<label>-<timestamp>.<ext>` and live next to the
/// file (or in a configured sub-directory of the file's directory). Older
/// backups for the same file and label are rotated out beyond `max_per_file`.
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use crate::config::BackupConfig;
use crate::error::SyncError;
use crate::io::atomic_write;

#[async_trait]
pub trait BackupProvider: Send + Sync {
    /// Write `content` as a backup of `path`. Returns the backup path.
    async fn create_backup(&self, path: &Path, content: &str, label: &str) -> Result<PathBuf, SyncError>;
}

#[derive(Debug, Clone)]
pub struct LocalBackups {
    directory: Option<String>,
    max_per_file: usize,
}

impl LocalBackups {
    pub fn new(config: &BackupConfig) -> Self {
        Self {
            directory: config.directory.clone(),
            max_per_file: config.max_per_file,
        }
    }

    fn backup_dir(&self, path: &Path) -> PathBuf {
        let parent = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        match &self.directory {
            Some(sub) => parent.join(sub),
            None => parent,
        }
    }

    /// Backup path for `path` at the current time.
    pub fn backup_path(&self, path: &Path, label: &str) -> PathBuf {
        let (stem, ext) = split_name(path);
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let name = match ext {
            Some(ext) => format!("{}-{}-{}.{}", stem, sanitize_label(label), timestamp, ext),
            None => format!("{}-{}-{}", stem, sanitize_label(label), timestamp),
        };
        self.backup_dir(path).join(name)
    }

    /// Existing backups of `path` with `label`, oldest first.
    pub fn list_backups(&self, path: &Path, label: &str) -> Vec<PathBuf> {
        let (stem, ext) = split_name(path);
        let prefix = format!("{}-{}-", stem, sanitize_label(label));
        let suffix = ext.map(|e| format!(".{}", e)).unwrap_or_default();

        let Ok(entries) = fs::read_dir(self.backup_dir(path)) else {
            return Vec::new();
        };
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy())
                    .map_or(false, |n| n.starts_with(&prefix) && n.ends_with(&suffix))
            })
            .collect();
        // timestamps sort lexicographically
        backups.sort();
        backups
    }

    fn rotate(&self, path: &Path, label: &str) {
        if self.max_per_file == 0 {
            return;
        }
        let backups = self.list_backups(path, label);
        let excess = backups.len().saturating_sub(self.max_per_file);
        for old in backups.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&old) {
                log::warn!("[lexera.backup.rotate] Failed to remove {:?}: {}", old, e);
            }
        }
    }
}

#[async_trait]
impl BackupProvider for LocalBackups {
    async fn create_backup(&self, path: &Path, content: &str, label: &str) -> Result<PathBuf, SyncError> {
        let backup_path = self.backup_path(path, label);
        let this = self.clone();
        let source = path.to_path_buf();
        let target = backup_path.clone();
        let text = content.to_string();
        let label = label.to_string();

        tokio::task::spawn_blocking(move || {
            atomic_write(&target, &text)?;
            this.rotate(&source, &label);
            Ok::<_, std::io::Error>(())
        })
        .await
        .map_err(|e| SyncError::BackupFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .map_err(|e| SyncError::BackupFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        log::info!("[lexera.backup] Backed up {:?} to {:?}", path, backup_path);
        Ok(backup_path)
    }
}

fn split_name(path: &Path) -> (String, Option<String>) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().to_string());
    (stem, ext)
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "backup".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backups(directory: Option<&str>, max_per_file: usize) -> LocalBackups {
        LocalBackups::new(&BackupConfig {
            enabled: true,
            directory: directory.map(str::to_string),
            max_per_file,
        })
    }

    #[test]
    fn test_backup_path_naming() {
        let b = backups(None, 10);
        let p = b.backup_path(Path::new("/boards/todo.md"), "conflict");
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(p.parent().unwrap(), Path::new("/boards"));
        assert!(name.starts_with("todo-conflict-"));
        assert!(name.ends_with(".md"));

        let b = backups(Some(".backups"), 10);
        let p = b.backup_path(Path::new("/boards/todo.md"), "before reload!");
        assert_eq!(p.parent().unwrap(), Path::new("/boards/.backups"));
        assert!(p.to_string_lossy().contains("todo-before-reload--"));
    }

    #[tokio::test]
    async fn test_create_backup_writes_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("board.md");
        let b = backups(Some("bak"), 10);

        let path = b.create_backup(&file, "local text", "conflict").await.unwrap();
        assert!(path.starts_with(dir.path().join("bak")));
        assert_eq!(fs::read_to_string(&path).unwrap(), "local text");
        assert_eq!(b.list_backups(&file, "conflict"), vec![path]);
    }

    #[tokio::test]
    async fn test_rotation_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("board.md");
        let b = backups(None, 2);

        for stamp in ["20240101T000000000", "20240102T000000000", "20240103T000000000"] {
            fs::write(dir.path().join(format!("board-conflict-{}.md", stamp)), stamp).unwrap();
        }
        let newest = b.create_backup(&file, "new", "conflict").await.unwrap();

        let remaining = b.list_backups(&file, "conflict");
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[1], newest);
        assert!(remaining[0].to_string_lossy().contains("20240103"));
    }

    #[tokio::test]
    async fn test_failure_maps_to_backup_failed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let b = backups(Some("blocker"), 10);
        let err = b
            .create_backup(&dir.path().join("board.md"), "text", "conflict")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::BackupFailed { .. }));
    }
}
