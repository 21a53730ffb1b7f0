/// Resolution strategies and the priority-ordered selector.
///
/// Default chain, highest priority first:
/// - auto-merge (10): extension point, always declines
/// - user choice (5): asks the dialog collaborator
/// - backup first (1): only with unsaved changes, backs up then reloads
///
/// The selector never fails: exhaustion or errors end in `cancel`.
use std::sync::Arc;

use async_trait::async_trait;

use super::dialog::ConflictDialog;
use super::types::{Conflict, ConflictContext, Resolution, ResolutionAction};
use crate::error::SyncError;

#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher runs first.
    fn priority(&self) -> i32;

    fn can_handle(&self, conflict: &Conflict, ctx: &ConflictContext) -> bool;

    async fn resolve(&self, conflict: &Conflict, ctx: &ConflictContext) -> Result<Resolution, SyncError>;
}

/// Reserved for a non-overlapping content merge. No merge algorithm exists, so
/// it never claims a conflict.
#[derive(Debug, Default)]
pub struct AutoMergeStrategy;

#[async_trait]
impl ResolutionStrategy for AutoMergeStrategy {
    fn name(&self) -> &'static str {
        "auto-merge"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_handle(&self, _conflict: &Conflict, _ctx: &ConflictContext) -> bool {
        false
    }

    async fn resolve(&self, _conflict: &Conflict, _ctx: &ConflictContext) -> Result<Resolution, SyncError> {
        Ok(Resolution::cancel())
    }
}

/// Delegates the choice to the user.
pub struct UserChoiceStrategy {
    dialog: Arc<dyn ConflictDialog>,
}

impl UserChoiceStrategy {
    pub fn new(dialog: Arc<dyn ConflictDialog>) -> Self {
        Self { dialog }
    }
}

#[async_trait]
impl ResolutionStrategy for UserChoiceStrategy {
    fn name(&self) -> &'static str {
        "user-choice"
    }

    fn priority(&self) -> i32 {
        5
    }

    fn can_handle(&self, _conflict: &Conflict, _ctx: &ConflictContext) -> bool {
        true
    }

    async fn resolve(&self, conflict: &Conflict, _ctx: &ConflictContext) -> Result<Resolution, SyncError> {
        let answer = match self.dialog.show_conflict_dialog(conflict).await {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!(
                    "[lexera.conflict.dialog] Dialog for {} failed, cancelling: {}",
                    conflict.context.file_name,
                    e
                );
                return Ok(Resolution::cancel());
            }
        };

        let Some(picked) = answer else {
            log::info!(
                "[lexera.conflict.dialog] Dialog for {} dismissed",
                conflict.context.file_name
            );
            return Ok(Resolution::cancel());
        };

        if picked.action != ResolutionAction::Cancel && !conflict.offers(picked.action) {
            log::warn!(
                "[lexera.conflict.dialog] {:?} was not offered for {}, cancelling",
                picked.action,
                conflict.context.file_name
            );
            return Ok(Resolution::cancel());
        }
        Ok(Resolution::from_action(picked.action))
    }
}

/// Preserves local work before giving way to disk content.
#[derive(Debug, Default)]
pub struct BackupFirstStrategy;

#[async_trait]
impl ResolutionStrategy for BackupFirstStrategy {
    fn name(&self) -> &'static str {
        "backup-first"
    }

    fn priority(&self) -> i32 {
        1
    }

    fn can_handle(&self, _conflict: &Conflict, ctx: &ConflictContext) -> bool {
        ctx.has_unsaved_changes()
    }

    async fn resolve(&self, _conflict: &Conflict, _ctx: &ConflictContext) -> Result<Resolution, SyncError> {
        Ok(Resolution::from_action(ResolutionAction::BackupAndReload))
    }
}

/// Picks and runs the first applicable strategy.
pub struct ConflictResolver {
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl ConflictResolver {
    /// Default chain around the given dialog.
    pub fn new(dialog: Arc<dyn ConflictDialog>) -> Self {
        Self::with_strategies(vec![
            Box::new(AutoMergeStrategy),
            Box::new(UserChoiceStrategy::new(dialog)),
            Box::new(BackupFirstStrategy),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
        let mut resolver = Self { strategies };
        resolver.sort();
        resolver
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn ResolutionStrategy>) {
        self.strategies.push(strategy);
        self.sort();
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    fn sort(&mut self) {
        // stable: equal priorities keep insertion order
        self.strategies.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    /// Resolution for a change the detector proved unambiguous, without asking.
    pub fn shortcut(conflicts: &[Conflict], ctx: &ConflictContext) -> Option<Resolution> {
        if conflicts.is_empty() && ctx.has_external_changes && ctx.exists {
            Some(Resolution::reload())
        } else {
            None
        }
    }

    pub async fn resolve(&self, conflict: &Conflict, ctx: &ConflictContext) -> Resolution {
        for strategy in &self.strategies {
            if !strategy.can_handle(conflict, ctx) {
                continue;
            }
            match strategy.resolve(conflict, ctx).await {
                Ok(resolution) if resolution.is_well_formed() => {
                    log::info!(
                        "[lexera.conflict.resolve] {} on {} resolved by {}: {:?}",
                        conflict.kind,
                        ctx.file_name,
                        strategy.name(),
                        resolution.action
                    );
                    return resolution;
                }
                Ok(resolution) => {
                    log::warn!(
                        "[lexera.conflict.resolve] Strategy {} returned malformed {:?}, trying next",
                        strategy.name(),
                        resolution
                    );
                }
                Err(e) => {
                    log::warn!(
                        "[lexera.conflict.resolve] Strategy {} failed: {}, trying next",
                        strategy.name(),
                        e
                    );
                }
            }
        }

        log::warn!(
            "[lexera.conflict.resolve] No strategy resolved {} on {}, cancelling",
            conflict.kind,
            ctx.file_name
        );
        Resolution::cancel()
    }
}
