pub mod detection;
pub mod dialog;
pub mod strategy;
pub mod types;

pub use detection::{ConflictDetector, ExternalSaveClass};
pub use dialog::{ConflictDialog, FixedChoiceDialog};
pub use strategy::{ConflictResolver, ResolutionStrategy};
pub use types::{Conflict, ConflictContext, ConflictKind, Resolution, ResolutionAction, Severity};
