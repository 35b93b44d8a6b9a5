// error.rs — Error types for the conversation layer and the agent client.

use thiserror::Error;
use uuid::Uuid;

use dt_actions::ActionError;
use dt_proposals::ProposalError;
use dt_store::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Absent, soft-deleted, or outside the caller's tenant.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("access denied for user {user_id}: {reason}")]
    AccessDenied { user_id: Uuid, reason: String },

    /// Caller input rejected before anything is persisted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("agent service error: {0}")]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Proposal(#[from] ProposalError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("devtel lookup failed: {0}")]
    Devtel(#[from] ActionError),
}

impl ChatError {
    pub(crate) fn conversation_not_found(id: Uuid) -> Self {
        ChatError::NotFound {
            entity: "conversation",
            id,
        }
    }
}

/// Failures talking to the external agent service.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("could not decode response from {endpoint}: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered but the answer is unusable, or no service is reachable.
    #[error("agent service unavailable: {0}")]
    Unavailable(String),
}
