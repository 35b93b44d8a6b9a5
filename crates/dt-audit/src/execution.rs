// execution.rs — The execution log: one record per approved proposal.
//
// Records are written once, at approval time, whether the executor
// succeeded or failed. The only mutation afterwards is the revert stamp,
// applied with a conditional update so it can be set at most once.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dt_actions::ActionKind;
use dt_store::{JsonFileStore, Record, UpdateOutcome};

use crate::error::AuditError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// An approved proposal that was run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutedAction {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub executed_by: Uuid,
    pub agent_id: String,
    pub action_type: ActionKind,
    pub parameters: serde_json::Value,
    /// What the executor returned; carries what a revert needs.
    pub result: Option<serde_json::Value>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    /// Frozen from the registry at execution time.
    pub is_reversible: bool,
    pub affected_entity_type: Option<String>,
    pub affected_entity_id: Option<Uuid>,
    pub reverted_at: Option<DateTime<Utc>>,
    pub reverted_by: Option<Uuid>,
    /// Execution timestamp.
    pub created_at: DateTime<Utc>,
}

impl Record for ExecutedAction {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

impl ExecutedAction {
    pub fn is_reverted(&self) -> bool {
        self.reverted_at.is_some()
    }
}

/// Selection criteria over the execution log. Empty lists match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionFilter {
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub action_types: Vec<ActionKind>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default)]
    pub affected_entity_id: Option<Uuid>,
    /// Inclusive lower bound on `created_at`.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl ExecutionFilter {
    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, action: &ExecutedAction) -> bool {
        self.tenant_id.is_none_or(|t| action.tenant_id == t)
            && self.conversation_id.is_none_or(|c| action.conversation_id == c)
            && (self.agent_ids.is_empty() || self.agent_ids.contains(&action.agent_id))
            && (self.action_types.is_empty() || self.action_types.contains(&action.action_type))
            && self.status.is_none_or(|s| action.status == s)
            && self
                .affected_entity_id
                .is_none_or(|e| action.affected_entity_id == Some(e))
            && self.from.is_none_or(|from| action.created_at >= from)
            && self.to.is_none_or(|to| action.created_at <= to)
    }
}

pub struct ExecutionStore {
    records: JsonFileStore<ExecutedAction>,
}

impl ExecutionStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        Ok(Self {
            records: JsonFileStore::new(dir)?,
        })
    }

    /// Write a new execution record. Fails if the id is already taken.
    pub fn record(&self, action: &ExecutedAction) -> Result<(), AuditError> {
        self.records.insert(action)?;
        tracing::info!(
            action_id = %action.id,
            proposal_id = %action.proposal_id,
            action_type = %action.action_type,
            status = %action.status,
            duration_ms = action.duration_ms,
            "execution recorded"
        );
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ExecutedAction>, AuditError> {
        Ok(self.records.get(id)?)
    }

    pub fn find_by_proposal(&self, proposal_id: Uuid) -> Result<Vec<ExecutedAction>, AuditError> {
        Ok(self.records.filter(|a| a.proposal_id == proposal_id)?)
    }

    /// Matching records, oldest first.
    pub fn query(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutedAction>, AuditError> {
        let mut actions = self.records.filter(|a| filter.matches(a))?;
        actions.sort_by_key(|a| a.created_at);
        Ok(actions)
    }

    /// Stamp `reverted_at`/`reverted_by`, only if the action is not already
    /// reverted.
    pub fn mark_reverted(
        &self,
        id: Uuid,
        reverted_by: Uuid,
    ) -> Result<UpdateOutcome<ExecutedAction>, AuditError> {
        Ok(self.records.update_if(
            id,
            |a| a.reverted_at.is_none(),
            |a| {
                a.reverted_at = Some(Utc::now());
                a.reverted_by = Some(reverted_by);
            },
        )?)
    }
}
