use std::path::PathBuf;

/// Errors surfaced by the sync engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File does not exist on disk: {0:?}")]
    FileMissing(PathBuf),

    #[error("File is not tracked by this session: {0:?}")]
    NotTracked(PathBuf),

    #[error("Invalid content for {path:?}: {reason}")]
    InvalidContent { path: PathBuf, reason: String },

    #[error("Backup of {path:?} failed: {reason}")]
    BackupFailed { path: PathBuf, reason: String },

    #[error("Conflict dialog failed: {0}")]
    Dialog(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[cfg(feature = "file-watcher")]
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
