/// The UI collaborator that asks the user how to resolve a conflict.
use async_trait::async_trait;

use super::types::{Conflict, Resolution, ResolutionAction};
use crate::error::SyncError;

/// Presents a conflict and waits for the user's pick.
///
/// Implementations suspend until the user answers. `Ok(None)` means the dialog
/// was dismissed without a choice.
#[async_trait]
pub trait ConflictDialog: Send + Sync {
    async fn show_conflict_dialog(&self, conflict: &Conflict) -> Result<Option<Resolution>, SyncError>;
}

/// Headless dialog that always answers with the same action when offered,
/// and dismisses the dialog otherwise.
#[derive(Debug, Clone, Copy)]
pub struct FixedChoiceDialog {
    action: ResolutionAction,
}

impl FixedChoiceDialog {
    pub fn new(action: ResolutionAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl ConflictDialog for FixedChoiceDialog {
    async fn show_conflict_dialog(&self, conflict: &Conflict) -> Result<Option<Resolution>, SyncError> {
        if conflict.offers(self.action) {
            Ok(Some(Resolution::from_action(self.action)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::detection::ConflictDetector;
    use crate::conflict::types::ConflictContext;
    use crate::state::FileKind;

    #[tokio::test]
    async fn test_fixed_choice_only_answers_offered_actions() {
        let mut ctx = ConflictContext::new(FileKind::Main, "/b/board.md");
        ctx.exists = false;
        let conflict = ConflictDetector::default().detect(&ctx).remove(0);

        let save = FixedChoiceDialog::new(ResolutionAction::Save);
        let answer = save.show_conflict_dialog(&conflict).await.unwrap();
        assert_eq!(answer.map(|r| r.action), Some(ResolutionAction::Save));

        let ignore = FixedChoiceDialog::new(ResolutionAction::Ignore);
        assert!(ignore.show_conflict_dialog(&conflict).await.unwrap().is_none());
    }
}
