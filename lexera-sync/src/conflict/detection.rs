/// Conflict detection.
///
/// Three independent checks, run in fixed order over a context snapshot:
/// 1. concurrent modification (unsaved local work + external change)
/// 2. external change while the user is editing
/// 3. file removed from disk
///
/// Pure: reads the snapshot, logs, never mutates flags.
use std::time::Duration;

use super::types::{Conflict, ConflictContext, ConflictKind, ResolutionAction, Severity};

pub const DEFAULT_LEGITIMATE_SAVE_THRESHOLD: Duration = Duration::from_secs(30);

/// How an external change relates to our own most recent save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalSaveClass {
    /// Deliberate external save, allowed to win.
    Legitimate,
    /// Too close to our own write (or unknown timing): treat as a race.
    Concurrent,
}

#[derive(Debug, Clone)]
pub struct ConflictDetector {
    legitimate_save_threshold: Duration,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(DEFAULT_LEGITIMATE_SAVE_THRESHOLD)
    }
}

impl ConflictDetector {
    pub fn new(legitimate_save_threshold: Duration) -> Self {
        Self {
            legitimate_save_threshold,
        }
    }

    pub fn legitimate_save_threshold(&self) -> Duration {
        self.legitimate_save_threshold
    }

    /// Run all checks and collect the conflicts that fire.
    pub fn detect(&self, ctx: &ConflictContext) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        if ctx.exists {
            let concurrent = self.check_concurrent_modification(ctx);
            let concurrent_fired = concurrent.is_some();
            conflicts.extend(concurrent);
            if !concurrent_fired {
                conflicts.extend(self.check_external_change(ctx));
            }
        }
        conflicts.extend(self.check_file_system_state(ctx));

        log::debug!(
            "[lexera.conflict.detect] {} ({}): {} conflict(s) [unsaved={}, external={}, editing={}, exists={}]",
            ctx.file_name,
            ctx.kind,
            conflicts.len(),
            ctx.has_unsaved_changes(),
            ctx.has_external_changes,
            ctx.is_in_edit_mode,
            ctx.exists
        );
        conflicts
    }

    /// True when an external change can be absorbed without asking.
    pub fn can_auto_reload(&self, ctx: &ConflictContext) -> bool {
        ctx.has_external_changes && self.detect(ctx).is_empty()
    }

    /// Classify an external change against our own last save.
    /// Missing timestamps are treated as concurrent editing.
    pub fn classify_external_save(&self, ctx: &ConflictContext) -> ExternalSaveClass {
        let (Some(saved), Some(changed)) = (ctx.last_save_time, ctx.external_change_time) else {
            return ExternalSaveClass::Concurrent;
        };

        let delta = changed.signed_duration_since(saved);
        let legitimate = delta
            .to_std()
            .map(|d| d > self.legitimate_save_threshold)
            .unwrap_or(false);

        log::debug!(
            "[lexera.conflict.heuristic] {}: external change {}ms after own save (threshold {}s) -> {}",
            ctx.file_name,
            delta.num_milliseconds(),
            self.legitimate_save_threshold.as_secs(),
            if legitimate { "legitimate" } else { "concurrent" }
        );

        if legitimate {
            ExternalSaveClass::Legitimate
        } else {
            ExternalSaveClass::Concurrent
        }
    }

    fn check_concurrent_modification(&self, ctx: &ConflictContext) -> Option<Conflict> {
        if !(ctx.has_unsaved_changes() && ctx.has_external_changes) {
            return None;
        }
        if self.classify_external_save(ctx) == ExternalSaveClass::Legitimate {
            log::info!(
                "[lexera.conflict.detect] {}: trusting external save over local changes",
                ctx.file_name
            );
            return None;
        }

        let description = format!(
            "\"{}\" was changed on disk while you have unsaved changes{}.",
            ctx.file_name,
            if ctx.has_include_unsaved_changes && !ctx.has_main_unsaved_changes {
                " in included files"
            } else {
                ""
            }
        );
        Some(Conflict::new(
            ConflictKind::ConcurrentModification,
            Severity::High,
            description,
            ctx.clone(),
            &[
                ResolutionAction::Save,
                ResolutionAction::DiscardLocal,
                ResolutionAction::BackupAndReload,
            ],
        ))
    }

    fn check_external_change(&self, ctx: &ConflictContext) -> Option<Conflict> {
        if !ctx.has_external_changes || !ctx.is_in_edit_mode {
            return None;
        }
        Some(Conflict::new(
            ConflictKind::ExternalChange,
            Severity::Medium,
            format!(
                "\"{}\" was changed on disk while you are editing it.",
                ctx.file_name
            ),
            ctx.clone(),
            &[ResolutionAction::Ignore, ResolutionAction::DiscardLocal],
        ))
    }

    fn check_file_system_state(&self, ctx: &ConflictContext) -> Option<Conflict> {
        if ctx.exists {
            return None;
        }
        Some(Conflict::new(
            ConflictKind::FileDeleted,
            Severity::High,
            format!("\"{}\" was deleted from disk.", ctx.file_name),
            ctx.clone(),
            &[ResolutionAction::Save, ResolutionAction::DiscardLocal],
        ))
    }
}

/// Build the concurrent-modification conflict directly, skipping the heuristic.
/// Used when the caller already knows both sides carry changes.
pub fn concurrent_modification(ctx: &ConflictContext) -> Conflict {
    Conflict::new(
        ConflictKind::ConcurrentModification,
        Severity::High,
        format!(
            "\"{}\" was changed on disk while the board has unsaved changes.",
            ctx.file_name
        ),
        ctx.clone(),
        &[
            ResolutionAction::Save,
            ResolutionAction::DiscardLocal,
            ResolutionAction::BackupAndReload,
        ],
    )
}
