// event.rs — Audit trail entries.
//
// One AuditEvent is appended for every lifecycle transition. Events form a
// chain: each carries the hash of the line before it, so inserting,
// deleting or editing a line is detectable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which lifecycle transition an event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ProposalCreated,
    ProposalApproved,
    ProposalRejected,
    ProposalModified,
    ActionExecuted,
    ActionReverted,
    ComplianceExported,
}

/// A single line in the JSONL audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Who caused the transition: a user id, or `agent:<id>` for proposals.
    pub actor: String,
    pub action: AuditAction,
    pub tenant_id: Option<Uuid>,
    /// The record affected, e.g. `proposal://<id>` or `action://<id>`.
    pub target_uri: Option<String>,
    /// Hash of the previous line. `None` for the first event in the log.
    pub previous_hash: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    pub fn new(actor: impl Into<String>, action: AuditAction) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.into(),
            action,
            tenant_id: None,
            target_uri: None,
            previous_hash: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_target(mut self, uri: impl Into<String>) -> Self {
        self.target_uri = Some(uri.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let tenant = Uuid::new_v4();
        let event = AuditEvent::new("user-7", AuditAction::ActionReverted)
            .with_tenant(tenant)
            .with_target("action://abc")
            .with_metadata(serde_json::json!({ "action_type": "assign_issue" }));

        assert_eq!(event.tenant_id, Some(tenant));
        assert_eq!(event.target_uri.as_deref(), Some("action://abc"));
        assert_eq!(event.metadata["action_type"], "assign_issue");
        assert!(event.previous_hash.is_none());
    }

    #[test]
    fn action_serializes_as_snake_case() {
        let json = serde_json::to_string(&AuditAction::ComplianceExported).unwrap();
        assert_eq!(json, "\"compliance_exported\"");
    }
}
