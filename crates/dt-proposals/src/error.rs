// error.rs — Error types for the proposal lifecycle.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use dt_actions::ActionError;

#[derive(Debug, Error)]
pub enum ProposalError {
    /// Absent, outside the caller's tenant, or (for proposals) no longer pending.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// The caller lacks the capability or does not own the conversation.
    #[error("access denied for user {user_id}: {reason}")]
    AccessDenied { user_id: Uuid, reason: String },

    #[error("proposal {proposal_id} expired at {expired_at}")]
    ProposalExpired {
        proposal_id: Uuid,
        expired_at: DateTime<Utc>,
    },

    #[error("action {0} is not reversible")]
    NotReversible(Uuid),

    #[error("action {0} has already been reverted")]
    AlreadyReverted(Uuid),

    #[error("a revert of action {0} is already in progress")]
    RevertInProgress(Uuid),

    /// The action-specific revert logic failed; nothing was stamped.
    #[error("revert of action {action_id} failed: {source}")]
    RevertFailed {
        action_id: Uuid,
        source: ActionError,
    },

    /// Caller input that fails validation before anything is persisted.
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("audit error: {0}")]
    Audit(#[from] dt_audit::AuditError),

    #[error("store error: {0}")]
    Store(#[from] dt_store::StoreError),

    /// A notification sink failed (non-fatal; logged by the dispatcher).
    #[error("notification error: {0}")]
    NotificationError(String),
}

impl ProposalError {
    pub(crate) fn proposal_not_found(id: Uuid) -> Self {
        ProposalError::NotFound {
            entity: "proposal",
            id,
        }
    }

    pub(crate) fn action_not_found(id: Uuid) -> Self {
        ProposalError::NotFound { entity: "action", id }
    }

    /// True for errors caused by caller input rather than system state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProposalError::InvalidProposal(_)
                | ProposalError::Action(ActionError::UnknownActionType(_))
                | ProposalError::Action(ActionError::InvalidParameters { .. })
        )
    }
}
