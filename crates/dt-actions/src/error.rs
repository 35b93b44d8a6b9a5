// error.rs — Error types for action validation, execution and reversal.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the action registry and the DevTel backend.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action type string is not one of the registered kinds.
    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    /// The parameters do not satisfy the action's schema.
    #[error("invalid parameters for {action_type}: {reason}")]
    InvalidParameters { action_type: String, reason: String },

    /// The action kind has no revert logic.
    #[error("action type {0} is not reversible")]
    NotReversible(String),

    /// The stored result payload cannot drive a revert.
    #[error("result payload for {action_type} cannot be reverted: {reason}")]
    InvalidResult { action_type: String, reason: String },

    /// A DevTel entity referenced by the action does not exist.
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: &'static str, id: Uuid },

    /// The executor did not finish within the configured bound.
    #[error("{action_type} did not complete within {after:?}")]
    Timeout { action_type: String, after: Duration },

    /// The worker running the executor died before reporting a result.
    #[error("worker for {0} aborted before completing")]
    WorkerAborted(String),

    /// Persistence of a DevTel entity failed.
    #[error("store error: {0}")]
    Store(#[from] dt_store::StoreError),
}
