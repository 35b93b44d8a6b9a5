// proposal.rs — ActionProposal and its status machine.
//
//   pending → approved | rejected | modified
//   pending → expired   (logical only: derived from `expires_at`, never stored)
//
// Once a proposal leaves `pending` it is frozen; the successor back-link
// is written in the same update as the `modified` transition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dt_actions::ActionKind;
use dt_store::Record;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
    Expired,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "pending"),
            ProposalStatus::Approved => write!(f, "approved"),
            ProposalStatus::Rejected => write!(f, "rejected"),
            ProposalStatus::Modified => write!(f, "modified"),
            ProposalStatus::Expired => write!(f, "expired"),
        }
    }
}

impl ProposalStatus {
    /// Only `pending` has outgoing transitions.
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        matches!(
            (self, next),
            (ProposalStatus::Pending, ProposalStatus::Approved)
                | (ProposalStatus::Pending, ProposalStatus::Rejected)
                | (ProposalStatus::Pending, ProposalStatus::Modified)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }
}

/// One agent-suggested mutation awaiting (or past) a human decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionProposal {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub message_id: Option<Uuid>,
    pub agent_id: String,
    pub action_type: ActionKind,
    pub parameters: serde_json::Value,
    pub reasoning: Option<String>,
    #[serde(default)]
    pub affected_entities: Vec<serde_json::Value>,
    pub confidence_score: Option<f64>,
    pub status: ProposalStatus,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub responded_by: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub modified_proposal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Record for ActionProposal {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

impl ActionProposal {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// The stored status, with pending-but-expired reported as `expired`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ProposalStatus {
        if self.status == ProposalStatus::Pending && self.is_expired_at(now) {
            ProposalStatus::Expired
        } else {
            self.status
        }
    }
}

/// Input to `create_proposal`, as emitted by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProposal {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub message_id: Option<Uuid>,
    pub agent_id: String,
    pub action_type: String,
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub affected_entities: Vec<serde_json::Value>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
}

/// Caller-supplied changes for `modify_proposal`.
///
/// `parameters` is merged shallowly over the original: top-level keys
/// present here replace the original's, nested objects are not merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalOverrides {
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub affected_entities: Option<Vec<serde_json::Value>>,
}

impl ProposalOverrides {
    pub fn merge_parameters(&self, original: &serde_json::Value) -> serde_json::Value {
        let mut merged = original.as_object().cloned().unwrap_or_default();
        for (key, value) in &self.parameters {
            merged.insert(key.clone(), value.clone());
        }
        serde_json::Value::Object(merged)
    }
}
