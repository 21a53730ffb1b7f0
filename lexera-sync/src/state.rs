/// Per-file state model.
///
/// Four flags (exists, unsaved, external change, edit mode) plus the
/// content/baseline pair. `has_unsaved_changes` is always derived from the pair,
/// never stored.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of tracked file variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    Main,
    IncludeRegular,
    IncludeColumn,
    IncludeTask,
}

impl FileKind {
    pub fn is_main(self) -> bool {
        matches!(self, FileKind::Main)
    }

    pub fn is_include(self) -> bool {
        !self.is_main()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Main => "main",
            FileKind::IncludeRegular => "include-regular",
            FileKind::IncludeColumn => "include-column",
            FileKind::IncludeTask => "include-task",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileState {
    pub exists: bool,
    /// Current in-memory text.
    pub content: String,
    /// Last known on-disk text.
    pub baseline: String,
    pub has_external_changes: bool,
    pub is_in_edit_mode: bool,
    /// Last known disk write (diagnostics only).
    pub last_modified: Option<DateTime<Utc>>,
    /// When this program last wrote the file.
    pub last_self_save: Option<DateTime<Utc>>,
    /// When the pending external change was observed.
    pub external_change_time: Option<DateTime<Utc>>,
    /// Editable board snapshot not yet flushed into `content`.
    pub cached_snapshot: Option<String>,
}

impl FileState {
    /// State for a file freshly read from disk.
    pub fn loaded(content: String) -> Self {
        Self {
            exists: true,
            baseline: content.clone(),
            content,
            last_modified: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// State for a referenced file that is not on disk.
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.content != self.baseline
    }

    /// Unsaved changes or an unflushed snapshot.
    pub fn has_unsaved_work(&self) -> bool {
        self.has_unsaved_changes() || self.cached_snapshot.is_some()
    }

    /// Replace both sides with fresh disk text and drop everything local.
    pub(crate) fn apply_disk_content(&mut self, disk: String) {
        self.content = disk.clone();
        self.baseline = disk;
        self.cached_snapshot = None;
        self.exists = true;
        self.clear_external_change();
        self.last_modified = Some(Utc::now());
    }

    /// Record that `written` now matches disk.
    pub(crate) fn apply_saved_content(&mut self, written: String) {
        let now = Utc::now();
        self.content = written.clone();
        self.baseline = written;
        self.cached_snapshot = None;
        self.exists = true;
        self.clear_external_change();
        self.last_self_save = Some(now);
        self.last_modified = Some(now);
    }

    pub(crate) fn clear_external_change(&mut self) {
        self.has_external_changes = false;
        self.external_change_time = None;
    }
}
