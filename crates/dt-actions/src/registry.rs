// registry.rs — Executes and reverts actions against the DevTel backend.
//
// Dispatch is an exhaustive match over `Action` for execution and over
// `ActionKind` for reversal, so adding a kind without wiring it in is a
// compile error. Every executor and reverter runs on a dedicated worker
// thread and is abandoned once the configured timeout elapses.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::action::{
    Action, ActionKind, AssignIssueParams, AssignIssueResult, CreateIssueParams,
    CreateSpecParams, UpdateIssueParams, UpdateIssueResult,
};
use crate::devtel::{DevtelBackend, IssuePatch, NewIssue, NewSpec};
use crate::error::ActionError;

/// Upper bound on a single execute or revert call unless configured otherwise.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(120);

type RevertFn = fn(&dyn DevtelBackend, &Value, Uuid) -> Result<(), ActionError>;

/// The DevTel entity an executed action produced or mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AffectedEntity {
    pub entity_type: String,
    pub entity_id: Uuid,
}

impl AffectedEntity {
    /// Infer the affected entity from an execution result payload.
    ///
    /// Create actions return the entity itself; update and assign wrap it
    /// under `issue`.
    pub fn from_result(kind: ActionKind, result: &Value) -> Option<Self> {
        let id = match kind {
            ActionKind::CreateIssue | ActionKind::CreateSpec => result.get("id"),
            ActionKind::UpdateIssue | ActionKind::AssignIssue => {
                result.get("issue").and_then(|issue| issue.get("id"))
            }
        }?;
        let entity_id = id.as_str()?.parse().ok()?;
        Some(Self {
            entity_type: kind.entity_type().to_string(),
            entity_id,
        })
    }
}

/// Successful execution of an action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub kind: ActionKind,
    /// Payload stored on the execution record; carries what a revert needs.
    pub result: Value,
    pub affected: Option<AffectedEntity>,
}

/// The closed registry of action executors.
#[derive(Clone)]
pub struct ActionRegistry {
    backend: Arc<dyn DevtelBackend>,
    timeout: Duration,
}

impl ActionRegistry {
    pub fn new(backend: Arc<dyn DevtelBackend>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend(&self) -> &Arc<dyn DevtelBackend> {
        &self.backend
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check an action type and its parameters without running anything.
    pub fn validate(&self, action_type: &str, parameters: &Value) -> Result<Action, ActionError> {
        Action::from_parts(action_type, parameters)
    }

    /// Whether actions of this kind can be reverted.
    pub fn is_reversible(&self, kind: ActionKind) -> bool {
        reverter(kind).is_some()
    }

    /// Like [`is_reversible`](Self::is_reversible), for a raw type string.
    /// Unknown types are not reversible.
    pub fn is_reversible_type(&self, action_type: &str) -> bool {
        action_type
            .parse::<ActionKind>()
            .map(|kind| self.is_reversible(kind))
            .unwrap_or(false)
    }

    /// Validate and execute an action on behalf of `acting_user`.
    pub fn execute(
        &self,
        action_type: &str,
        parameters: &Value,
        acting_user: Uuid,
    ) -> Result<ActionOutcome, ActionError> {
        let action = self.validate(action_type, parameters)?;
        let kind = action.kind();
        tracing::debug!(action_type = %kind, user_id = %acting_user, "executing action");

        let result = self.run_bounded(kind, move |backend| apply(backend, action, acting_user))?;
        let affected = AffectedEntity::from_result(kind, &result);
        Ok(ActionOutcome {
            kind,
            result,
            affected,
        })
    }

    /// Undo a previously executed action using its stored result payload.
    pub fn revert(
        &self,
        action_type: &str,
        result: &Value,
        acting_user: Uuid,
    ) -> Result<(), ActionError> {
        let kind: ActionKind = action_type.parse()?;
        let revert = reverter(kind).ok_or_else(|| ActionError::NotReversible(kind.to_string()))?;
        tracing::debug!(action_type = %kind, user_id = %acting_user, "reverting action");

        let result = result.clone();
        self.run_bounded(kind, move |backend| revert(backend, &result, acting_user))
    }

    fn run_bounded<T, F>(&self, kind: ActionKind, job: F) -> Result<T, ActionError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DevtelBackend) -> Result<T, ActionError> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("action-{}", kind))
            .spawn(move || {
                // The receiver may have given up already; nothing to report then.
                let _ = tx.send(job(backend.as_ref()));
            })
            .map_err(|e| {
                tracing::error!(action_type = %kind, "failed to spawn action worker: {}", e);
                ActionError::WorkerAborted(kind.to_string())
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(action_type = %kind, timeout = ?self.timeout, "action worker timed out");
                Err(ActionError::Timeout {
                    action_type: kind.to_string(),
                    after: self.timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(ActionError::WorkerAborted(kind.to_string())),
        }
    }
}

fn apply(backend: &dyn DevtelBackend, action: Action, user: Uuid) -> Result<Value, ActionError> {
    match action {
        Action::CreateIssue(params) => create_issue(backend, params, user),
        Action::UpdateIssue(params) => update_issue(backend, params, user),
        Action::AssignIssue(params) => assign_issue(backend, params, user),
        Action::CreateSpec(params) => create_spec(backend, params, user),
    }
}

fn reverter(kind: ActionKind) -> Option<RevertFn> {
    match kind {
        ActionKind::UpdateIssue => Some(revert_update_issue),
        ActionKind::AssignIssue => Some(revert_assign_issue),
        ActionKind::CreateIssue | ActionKind::CreateSpec => None,
    }
}

fn create_issue(
    backend: &dyn DevtelBackend,
    params: CreateIssueParams,
    user: Uuid,
) -> Result<Value, ActionError> {
    let issue = backend.create_issue(
        NewIssue {
            project_id: params.project_id,
            title: params.title,
            description: params.description,
            priority: params.priority.unwrap_or_default(),
            status: params.status.unwrap_or_default(),
            assignee_id: params.assignee_id,
            estimated_hours: params.estimated_hours,
            story_points: params.story_points,
        },
        user,
    )?;
    to_payload(ActionKind::CreateIssue, &issue)
}

fn update_issue(
    backend: &dyn DevtelBackend,
    params: UpdateIssueParams,
    user: Uuid,
) -> Result<Value, ActionError> {
    let update = backend.update_issue(params.issue_id, &params.changes, user)?;
    let previous_values = params.changes.snapshot_of(&update.before);
    to_payload(
        ActionKind::UpdateIssue,
        &UpdateIssueResult {
            issue: update.after,
            previous_values,
        },
    )
}

fn assign_issue(
    backend: &dyn DevtelBackend,
    params: AssignIssueParams,
    user: Uuid,
) -> Result<Value, ActionError> {
    let patch = IssuePatch {
        assignee_id: Some(params.assignee_id),
        ..IssuePatch::default()
    };
    let update = backend.update_issue(params.issue_id, &patch, user)?;
    to_payload(
        ActionKind::AssignIssue,
        &AssignIssueResult {
            issue: update.after,
            previous_assignee_id: update.before.assignee_id,
        },
    )
}

fn create_spec(
    backend: &dyn DevtelBackend,
    params: CreateSpecParams,
    user: Uuid,
) -> Result<Value, ActionError> {
    let spec = backend.create_spec(
        NewSpec {
            project_id: params.project_id,
            title: params.title,
            content: params.content,
        },
        user,
    )?;
    to_payload(ActionKind::CreateSpec, &spec)
}

fn revert_update_issue(
    backend: &dyn DevtelBackend,
    result: &Value,
    user: Uuid,
) -> Result<(), ActionError> {
    let stored: UpdateIssueResult = from_payload(ActionKind::UpdateIssue, result)?;
    backend.update_issue(stored.issue.id, &stored.previous_values, user)?;
    Ok(())
}

fn revert_assign_issue(
    backend: &dyn DevtelBackend,
    result: &Value,
    user: Uuid,
) -> Result<(), ActionError> {
    let stored: AssignIssueResult = from_payload(ActionKind::AssignIssue, result)?;
    let patch = IssuePatch {
        assignee_id: Some(stored.previous_assignee_id),
        ..IssuePatch::default()
    };
    backend.update_issue(stored.issue.id, &patch, user)?;
    Ok(())
}

fn to_payload<T: Serialize>(kind: ActionKind, value: &T) -> Result<Value, ActionError> {
    serde_json::to_value(value).map_err(|e| ActionError::InvalidResult {
        action_type: kind.to_string(),
        reason: e.to_string(),
    })
}

fn from_payload<T: serde::de::DeserializeOwned>(
    kind: ActionKind,
    result: &Value,
) -> Result<T, ActionError> {
    serde_json::from_value(result.clone()).map_err(|e| ActionError::InvalidResult {
        action_type: kind.to_string(),
        reason: e.to_string(),
    })
}
