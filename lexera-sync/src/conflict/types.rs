/// Value objects shared by detection, resolution and coordination.
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::FileKind;

/// Read-only snapshot a conflict decision is computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictContext {
    pub kind: FileKind,
    pub path: PathBuf,
    pub file_name: String,
    pub exists: bool,
    pub has_main_unsaved_changes: bool,
    pub has_include_unsaved_changes: bool,
    pub has_external_changes: bool,
    pub is_in_edit_mode: bool,
    /// Last time this program itself wrote the file.
    pub last_save_time: Option<DateTime<Utc>>,
    /// When the current external change was observed.
    pub external_change_time: Option<DateTime<Utc>>,
}

impl ConflictContext {
    pub fn new(kind: FileKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            kind,
            path,
            file_name,
            exists: true,
            has_main_unsaved_changes: false,
            has_include_unsaved_changes: false,
            has_external_changes: false,
            is_in_edit_mode: false,
            last_save_time: None,
            external_change_time: None,
        }
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.has_main_unsaved_changes || self.has_include_unsaved_changes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    ConcurrentModification,
    ExternalChange,
    FileDeleted,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictKind::ConcurrentModification => "concurrent-modification",
            ConflictKind::ExternalChange => "external-change",
            ConflictKind::FileDeleted => "file-deleted",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A detected conflict. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub description: String,
    pub context: ConflictContext,
    /// Offered choices, in presentation order.
    pub resolutions: Vec<Resolution>,
}

static NEXT_CONFLICT_ID: AtomicU64 = AtomicU64::new(1);

impl Conflict {
    pub fn new(
        kind: ConflictKind,
        severity: Severity,
        description: String,
        context: ConflictContext,
        actions: &[ResolutionAction],
    ) -> Self {
        let seq = NEXT_CONFLICT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{}-{}-{:x}", kind, seq, Utc::now().timestamp_millis()),
            kind,
            severity,
            description,
            context,
            resolutions: actions.iter().copied().map(Resolution::from_action).collect(),
        }
    }

    pub fn offers(&self, action: ResolutionAction) -> bool {
        self.resolutions.iter().any(|r| r.action == action)
    }

    pub fn actions(&self) -> Vec<ResolutionAction> {
        self.resolutions.iter().map(|r| r.action).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Overwrite disk with the in-memory content.
    Save,
    /// Drop local edits, reload disk content.
    DiscardLocal,
    BackupAndReload,
    BackupAndSave,
    /// Keep the in-memory state, only clear the external-change flag.
    Ignore,
    Cancel,
}

impl ResolutionAction {
    pub fn label(self) -> &'static str {
        match self {
            ResolutionAction::Save => "Save my changes (overwrite file)",
            ResolutionAction::DiscardLocal => "Discard my changes (reload from disk)",
            ResolutionAction::BackupAndReload => "Back up my changes, then reload",
            ResolutionAction::BackupAndSave => "Back up the file, then save my changes",
            ResolutionAction::Ignore => "Keep editing (ignore external change)",
            ResolutionAction::Cancel => "Cancel",
        }
    }
}

/// Normalized outcome of a resolution choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub action: ResolutionAction,
    pub proceed: bool,
    pub create_backup: bool,
    pub save: bool,
    pub reload: bool,
    pub ignore: bool,
}

impl Resolution {
    pub fn from_action(action: ResolutionAction) -> Self {
        let (proceed, create_backup, save, reload, ignore) = match action {
            ResolutionAction::Save => (true, false, true, false, false),
            ResolutionAction::DiscardLocal => (true, false, false, true, false),
            ResolutionAction::BackupAndReload => (true, true, false, true, false),
            ResolutionAction::BackupAndSave => (true, true, true, false, false),
            ResolutionAction::Ignore => (true, false, false, false, true),
            ResolutionAction::Cancel => (false, false, false, false, false),
        };
        Self {
            action,
            proceed,
            create_backup,
            save,
            reload,
            ignore,
        }
    }

    pub fn cancel() -> Self {
        Self::from_action(ResolutionAction::Cancel)
    }

    pub fn reload() -> Self {
        Self::from_action(ResolutionAction::DiscardLocal)
    }

    /// Either a no-op, or exactly one effect (backup composites aside).
    pub fn is_well_formed(&self) -> bool {
        if !self.proceed {
            return !(self.create_backup || self.save || self.reload || self.ignore);
        }
        let effects = [self.save, self.reload, self.ignore]
            .iter()
            .filter(|f| **f)
            .count();
        effects == 1 && !(self.create_backup && self.ignore)
    }
}

impl From<ResolutionAction> for Resolution {
    fn from(action: ResolutionAction) -> Self {
        Self::from_action(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ACTIONS: [ResolutionAction; 6] = [
        ResolutionAction::Save,
        ResolutionAction::DiscardLocal,
        ResolutionAction::BackupAndReload,
        ResolutionAction::BackupAndSave,
        ResolutionAction::Ignore,
        ResolutionAction::Cancel,
    ];

    #[test]
    fn test_action_table() {
        let r = Resolution::from_action(ResolutionAction::BackupAndReload);
        assert!(r.proceed && r.create_backup && r.reload);
        assert!(!r.save && !r.ignore);

        let r = Resolution::from_action(ResolutionAction::BackupAndSave);
        assert!(r.proceed && r.create_backup && r.save);
        assert!(!r.reload && !r.ignore);

        let r = Resolution::cancel();
        assert!(!r.proceed && !r.create_backup && !r.save && !r.reload && !r.ignore);
    }

    #[test]
    fn test_every_action_is_well_formed() {
        for action in ALL_ACTIONS {
            assert!(Resolution::from_action(action).is_well_formed(), "{:?}", action);
        }
    }

    #[test]
    fn test_malformed_resolution_detected() {
        let mut r = Resolution::from_action(ResolutionAction::Save);
        r.reload = true;
        assert!(!r.is_well_formed());
    }

    #[test]
    fn test_context_file_name() {
        let ctx = ConflictContext::new(FileKind::IncludeColumn, "/boards/root/col.md");
        assert_eq!(ctx.file_name, "col.md");
        assert!(ctx.exists);
        assert!(!ctx.has_unsaved_changes());
    }

    #[test]
    fn test_conflict_ids_unique() {
        let ctx = ConflictContext::new(FileKind::Main, "/boards/a.md");
        let a = Conflict::new(ConflictKind::FileDeleted, Severity::High, String::new(), ctx.clone(), &[]);
        let b = Conflict::new(ConflictKind::FileDeleted, Severity::High, String::new(), ctx, &[]);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("file-deleted-"));
    }

    #[test]
    fn test_serialized_action_names() {
        let json = serde_json::to_string(&ResolutionAction::DiscardLocal).unwrap();
        assert_eq!(json, "\"discard_local\"");
        let json = serde_json::to_string(&ConflictKind::ConcurrentModification).unwrap();
        assert_eq!(json, "\"concurrent-modification\"");
    }
}
