//! Keeps an open kanban board and its include files consistent with the disk.
//!
//! External edits are detected, classified and either absorbed silently or
//! turned into a conflict that a pluggable dialog resolves.

pub mod backup;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod file;
pub mod include;
pub mod io;
pub mod registry;
pub mod session;
pub mod state;
pub mod watcher;

pub use conflict::{
    Conflict, ConflictContext, ConflictDetector, ConflictDialog, ConflictKind, ConflictResolver,
    Resolution, ResolutionAction, Severity,
};
pub use coordinator::{ChangeCoordinator, ChangeOutcome};
pub use error::{SyncError, SyncResult};
pub use file::TrackedFile;
pub use registry::FileRegistry;
pub use session::EditorSession;
pub use state::{FileKind, FileState};
pub use watcher::types::{ChangeType, FileChangeEvent, SyncEvent};
