// engine.rs — ProposalEngine: the human-in-the-loop control loop.
//
// Every operation runs the same gate first: capability check, load the
// record within the caller's tenant, then conversation ownership. State
// transitions go through `ProposalStore::transition`, which only applies
// if the proposal is still pending, so concurrent approve/reject/modify
// calls on one proposal produce exactly one winner.
//
// Approval claims the proposal before running the executor. Losing the
// claim means another caller already decided; the executor never runs
// twice. The execution record is written immediately after the executor
// returns, success or failure.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use dt_actions::{ActionKind, ActionRegistry};
use dt_audit::{
    AuditAction, AuditEvent, AuditLog, ExecutedAction, ExecutionFilter, ExecutionStatus,
    ExecutionStore,
};
use dt_store::UpdateOutcome;

use crate::access::{authorize, ensure_owner, Actor, ConversationDirectory, Permission, PermissionChecker};
use crate::error::ProposalError;
use crate::events::{EventDispatcher, NotificationSink, ProposalEvent};
use crate::proposal::{ActionProposal, NewProposal, ProposalOverrides, ProposalStatus};
use crate::store::ProposalStore;

/// How long a new proposal stays actionable.
pub const DEFAULT_PROPOSAL_TTL_MINUTES: i64 = 60;

/// Result of an approval: the decided proposal and its execution record.
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub proposal: ActionProposal,
    pub execution: ExecutedAction,
}

/// Result of a modification: the frozen original and its pending successor.
#[derive(Debug, Clone, Serialize)]
pub struct Modification {
    pub original: ActionProposal,
    pub proposal: ActionProposal,
}

pub struct ProposalEngine {
    proposals: ProposalStore,
    executions: Arc<ExecutionStore>,
    registry: ActionRegistry,
    directory: Arc<dyn ConversationDirectory>,
    permissions: Arc<dyn PermissionChecker>,
    audit: Mutex<AuditLog>,
    events: EventDispatcher,
    ttl: Duration,
    reverts_in_flight: Mutex<HashSet<Uuid>>,
}

impl ProposalEngine {
    /// Open the engine's stores under `data_dir`:
    /// `proposals/`, `executions/` and `audit.jsonl`.
    pub fn open(
        data_dir: impl AsRef<Path>,
        registry: ActionRegistry,
        directory: Arc<dyn ConversationDirectory>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Result<Self, ProposalError> {
        let data_dir = data_dir.as_ref();
        Ok(Self {
            proposals: ProposalStore::open(data_dir.join("proposals"))?,
            executions: Arc::new(ExecutionStore::open(data_dir.join("executions"))?),
            registry,
            directory,
            permissions,
            audit: Mutex::new(AuditLog::open(data_dir.join("audit.jsonl"))?),
            events: EventDispatcher::new(),
            ttl: Duration::minutes(DEFAULT_PROPOSAL_TTL_MINUTES),
            reverts_in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.events.add_sink(sink);
    }

    pub fn executions(&self) -> &Arc<ExecutionStore> {
        &self.executions
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn permissions(&self) -> &Arc<dyn PermissionChecker> {
        &self.permissions
    }

    // ── Transitions ───────────────────────────────────────────────

    /// Validate and persist a new pending proposal.
    pub fn create_proposal(
        &self,
        actor: &Actor,
        new: NewProposal,
    ) -> Result<ActionProposal, ProposalError> {
        authorize(self.permissions.as_ref(), actor, Permission::ConversationEdit)?;
        ensure_owner(self.directory.as_ref(), actor, new.conversation_id)?;

        let action = self.registry.validate(&new.action_type, &new.parameters)?;
        if new.agent_id.trim().is_empty() {
            return Err(ProposalError::InvalidProposal("agent id is required".into()));
        }
        if let Some(score) = new.confidence_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(ProposalError::InvalidProposal(format!(
                    "confidence score {} is outside [0, 1]",
                    score
                )));
            }
        }

        let now = Utc::now();
        let proposal = ActionProposal {
            id: Uuid::new_v4(),
            tenant_id: actor.tenant_id,
            conversation_id: new.conversation_id,
            message_id: new.message_id,
            agent_id: new.agent_id,
            action_type: action.kind(),
            parameters: new.parameters,
            reasoning: new.reasoning,
            affected_entities: new.affected_entities,
            confidence_score: new.confidence_score,
            status: ProposalStatus::Pending,
            expires_at: now + self.ttl,
            responded_at: None,
            responded_by: None,
            rejection_reason: None,
            modified_proposal_id: None,
            created_at: now,
        };
        self.proposals.insert(&proposal)?;

        tracing::info!(
            proposal_id = %proposal.id,
            conversation_id = %proposal.conversation_id,
            action_type = %proposal.action_type,
            agent_id = %proposal.agent_id,
            "proposal created"
        );
        self.record_audit(
            AuditEvent::new(format!("agent:{}", proposal.agent_id), AuditAction::ProposalCreated)
                .with_tenant(actor.tenant_id)
                .with_target(proposal_uri(proposal.id))
                .with_metadata(serde_json::json!({
                    "conversation_id": proposal.conversation_id,
                    "action_type": proposal.action_type,
                    "requested_by": actor.user_id,
                })),
        );
        self.events.dispatch(&ProposalEvent::ProposalCreated {
            conversation_id: proposal.conversation_id,
            proposal: proposal.clone(),
            timestamp: now,
        });
        Ok(proposal)
    }

    /// Approve a pending proposal and run its action.
    ///
    /// An expired proposal fails with `ProposalExpired` and is left exactly
    /// as stored. Execution failure does not undo the approval; it is
    /// recorded on the execution record instead.
    pub fn approve_proposal(
        &self,
        actor: &Actor,
        proposal_id: Uuid,
    ) -> Result<Approval, ProposalError> {
        let proposal = self.load_pending(actor, proposal_id)?;
        if proposal.is_expired_at(Utc::now()) {
            tracing::info!(proposal_id = %proposal_id, expires_at = %proposal.expires_at, "approval of expired proposal refused");
            return Err(ProposalError::ProposalExpired {
                proposal_id,
                expired_at: proposal.expires_at,
            });
        }

        let claimed = match self.proposals.transition(proposal_id, ProposalStatus::Approved, |p| {
            p.responded_at = Some(Utc::now());
            p.responded_by = Some(actor.user_id);
        })? {
            UpdateOutcome::Updated(p) => p,
            UpdateOutcome::Rejected(_) | UpdateOutcome::Missing => {
                return Err(ProposalError::proposal_not_found(proposal_id));
            }
        };

        let execution = self.execute_claimed(actor, &claimed);
        if let Err(e) = self.executions.record(&execution) {
            // The domain mutation may already have landed; nothing can undo it here.
            tracing::error!(
                proposal_id = %proposal_id,
                action_id = %execution.id,
                "executed action could not be logged: {}",
                e
            );
            return Err(e.into());
        }

        self.record_audit(
            AuditEvent::new(actor.user_id.to_string(), AuditAction::ProposalApproved)
                .with_tenant(actor.tenant_id)
                .with_target(proposal_uri(proposal_id)),
        );
        self.record_audit(
            AuditEvent::new(actor.user_id.to_string(), AuditAction::ActionExecuted)
                .with_tenant(actor.tenant_id)
                .with_target(action_uri(execution.id))
                .with_metadata(serde_json::json!({
                    "proposal_id": proposal_id,
                    "action_type": execution.action_type,
                    "status": execution.status,
                    "duration_ms": execution.duration_ms,
                })),
        );
        self.events.dispatch(&ProposalEvent::ProposalExecuted {
            conversation_id: claimed.conversation_id,
            proposal_id,
            execution: execution.clone(),
            timestamp: Utc::now(),
        });

        Ok(Approval {
            proposal: claimed,
            execution,
        })
    }

    pub fn reject_proposal(
        &self,
        actor: &Actor,
        proposal_id: Uuid,
        reason: Option<String>,
    ) -> Result<ActionProposal, ProposalError> {
        self.load_pending(actor, proposal_id)?;

        let rejection_reason = reason.filter(|r| !r.trim().is_empty());
        let rejected = self
            .proposals
            .transition(proposal_id, ProposalStatus::Rejected, |p| {
                p.rejection_reason = rejection_reason.clone();
                p.responded_at = Some(Utc::now());
                p.responded_by = Some(actor.user_id);
            })?
            .updated()
            .ok_or_else(|| ProposalError::proposal_not_found(proposal_id))?;

        tracing::info!(proposal_id = %proposal_id, rejected_by = %actor.user_id, "proposal rejected");
        self.record_audit(
            AuditEvent::new(actor.user_id.to_string(), AuditAction::ProposalRejected)
                .with_tenant(actor.tenant_id)
                .with_target(proposal_uri(proposal_id))
                .with_metadata(serde_json::json!({ "reason": rejection_reason })),
        );
        self.events.dispatch(&ProposalEvent::ProposalRejected {
            conversation_id: rejected.conversation_id,
            proposal_id,
            reason: rejected.rejection_reason.clone(),
            rejected_by: actor.user_id,
            timestamp: Utc::now(),
        });
        Ok(rejected)
    }

    /// Freeze a pending proposal and replace it with an edited successor.
    pub fn modify_proposal(
        &self,
        actor: &Actor,
        proposal_id: Uuid,
        overrides: ProposalOverrides,
    ) -> Result<Modification, ProposalError> {
        let original = self.load_pending(actor, proposal_id)?;

        let parameters = overrides.merge_parameters(&original.parameters);
        self.registry
            .validate(original.action_type.as_str(), &parameters)?;

        let now = Utc::now();
        let successor = ActionProposal {
            id: Uuid::new_v4(),
            parameters,
            reasoning: overrides.reasoning.or_else(|| original.reasoning.clone()),
            affected_entities: overrides
                .affected_entities
                .unwrap_or_else(|| original.affected_entities.clone()),
            status: ProposalStatus::Pending,
            expires_at: now + self.ttl,
            responded_at: None,
            responded_by: None,
            rejection_reason: None,
            modified_proposal_id: None,
            created_at: now,
            ..original.clone()
        };
        self.proposals.insert(&successor)?;

        let frozen = match self.proposals.transition(proposal_id, ProposalStatus::Modified, |p| {
            p.modified_proposal_id = Some(successor.id);
            p.responded_at = Some(now);
            p.responded_by = Some(actor.user_id);
        })? {
            UpdateOutcome::Updated(p) => p,
            UpdateOutcome::Rejected(_) | UpdateOutcome::Missing => {
                // Another caller decided first; the successor must not survive.
                if let Err(e) = self.proposals.discard(successor.id) {
                    tracing::error!(proposal_id = %successor.id, "failed to discard orphaned successor: {}", e);
                }
                return Err(ProposalError::proposal_not_found(proposal_id));
            }
        };

        tracing::info!(
            proposal_id = %proposal_id,
            successor_id = %successor.id,
            modified_by = %actor.user_id,
            "proposal modified"
        );
        self.record_audit(
            AuditEvent::new(actor.user_id.to_string(), AuditAction::ProposalModified)
                .with_tenant(actor.tenant_id)
                .with_target(proposal_uri(proposal_id))
                .with_metadata(serde_json::json!({ "successor_id": successor.id })),
        );
        self.events.dispatch(&ProposalEvent::ProposalModified {
            conversation_id: frozen.conversation_id,
            original_id: proposal_id,
            proposal: successor.clone(),
            timestamp: now,
        });

        Ok(Modification {
            original: frozen,
            proposal: successor,
        })
    }

    /// Undo a reversible executed action, at most once.
    ///
    /// A failed revert leaves `reverted_at` unset so it can be retried.
    pub fn revert_executed_action(
        &self,
        actor: &Actor,
        action_id: Uuid,
    ) -> Result<ExecutedAction, ProposalError> {
        authorize(self.permissions.as_ref(), actor, Permission::ConversationEdit)?;
        let action = self.load_action(actor, action_id)?;
        if !action.is_reversible {
            return Err(ProposalError::NotReversible(action_id));
        }

        let _guard = RevertGuard::acquire(&self.reverts_in_flight, action_id)?;

        // Re-read under the guard: a revert that finished since the first
        // read must be seen here.
        let action = self
            .executions
            .get(action_id)?
            .ok_or_else(|| ProposalError::action_not_found(action_id))?;
        if action.is_reverted() {
            return Err(ProposalError::AlreadyReverted(action_id));
        }
        let result = action
            .result
            .as_ref()
            .filter(|_| action.status == ExecutionStatus::Success)
            .ok_or(ProposalError::NotReversible(action_id))?;

        self.registry
            .revert(action.action_type.as_str(), result, actor.user_id)
            .map_err(|source| {
                tracing::warn!(action_id = %action_id, "revert failed: {}", source);
                ProposalError::RevertFailed { action_id, source }
            })?;

        let reverted = match self.executions.mark_reverted(action_id, actor.user_id)? {
            UpdateOutcome::Updated(a) => a,
            UpdateOutcome::Rejected(_) => return Err(ProposalError::AlreadyReverted(action_id)),
            UpdateOutcome::Missing => return Err(ProposalError::action_not_found(action_id)),
        };

        tracing::info!(action_id = %action_id, reverted_by = %actor.user_id, "action reverted");
        self.record_audit(
            AuditEvent::new(actor.user_id.to_string(), AuditAction::ActionReverted)
                .with_tenant(actor.tenant_id)
                .with_target(action_uri(action_id))
                .with_metadata(serde_json::json!({ "action_type": reverted.action_type })),
        );
        self.events.dispatch(&ProposalEvent::ActionReverted {
            conversation_id: reverted.conversation_id,
            action_id,
            reverted_by: actor.user_id,
            timestamp: Utc::now(),
        });
        Ok(reverted)
    }

    // ── Reads ─────────────────────────────────────────────────────

    /// Pending, unexpired proposals in a conversation, newest first.
    pub fn list_pending_proposals(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
    ) -> Result<Vec<ActionProposal>, ProposalError> {
        authorize(self.permissions.as_ref(), actor, Permission::ConversationRead)?;
        ensure_owner(self.directory.as_ref(), actor, conversation_id)?;
        let now = Utc::now();
        Ok(self
            .proposals
            .list_for_conversation(conversation_id, Some(ProposalStatus::Pending))?
            .into_iter()
            .filter(|p| !p.is_expired_at(now))
            .collect())
    }

    pub fn get_proposal(
        &self,
        actor: &Actor,
        proposal_id: Uuid,
    ) -> Result<ActionProposal, ProposalError> {
        authorize(self.permissions.as_ref(), actor, Permission::ConversationRead)?;
        let proposal = self
            .proposals
            .get(proposal_id)?
            .filter(|p| p.tenant_id == actor.tenant_id)
            .ok_or_else(|| ProposalError::proposal_not_found(proposal_id))?;
        ensure_owner(self.directory.as_ref(), actor, proposal.conversation_id)?;
        Ok(proposal)
    }

    /// Executed actions visible to the caller: within their tenant and in
    /// conversations they own. Oldest first.
    pub fn list_executed_actions(
        &self,
        actor: &Actor,
        filter: ExecutionFilter,
    ) -> Result<Vec<ExecutedAction>, ProposalError> {
        authorize(self.permissions.as_ref(), actor, Permission::ConversationRead)?;
        if let Some(conversation_id) = filter.conversation_id {
            ensure_owner(self.directory.as_ref(), actor, conversation_id)?;
        }
        let filter = ExecutionFilter {
            tenant_id: Some(actor.tenant_id),
            ..filter
        };

        let mut owned: HashMap<Uuid, bool> = HashMap::new();
        let mut visible = Vec::new();
        for action in self.executions.query(&filter)? {
            let is_owner = match owned.get(&action.conversation_id) {
                Some(known) => *known,
                None => {
                    let known = ensure_owner(self.directory.as_ref(), actor, action.conversation_id).is_ok();
                    owned.insert(action.conversation_id, known);
                    known
                }
            };
            if is_owner {
                visible.push(action);
            }
        }
        Ok(visible)
    }

    pub fn get_executed_action(
        &self,
        actor: &Actor,
        action_id: Uuid,
    ) -> Result<ExecutedAction, ProposalError> {
        authorize(self.permissions.as_ref(), actor, Permission::ConversationRead)?;
        self.load_action(actor, action_id)
    }

    /// Append a compliance-export event to the audit trail.
    pub fn record_export(&self, actor: &Actor, export_id: Uuid, action_count: usize) {
        self.record_audit(
            AuditEvent::new(actor.user_id.to_string(), AuditAction::ComplianceExported)
                .with_tenant(actor.tenant_id)
                .with_target(format!("export://{}", export_id))
                .with_metadata(serde_json::json!({ "action_count": action_count })),
        );
    }

    // ── Internals ─────────────────────────────────────────────────

    /// Gate shared by approve, reject and modify.
    fn load_pending(&self, actor: &Actor, proposal_id: Uuid) -> Result<ActionProposal, ProposalError> {
        authorize(self.permissions.as_ref(), actor, Permission::ConversationEdit)?;
        let proposal = self
            .proposals
            .get(proposal_id)?
            .filter(|p| p.tenant_id == actor.tenant_id && p.status == ProposalStatus::Pending)
            .ok_or_else(|| ProposalError::proposal_not_found(proposal_id))?;
        ensure_owner(self.directory.as_ref(), actor, proposal.conversation_id)?;
        Ok(proposal)
    }

    fn load_action(&self, actor: &Actor, action_id: Uuid) -> Result<ExecutedAction, ProposalError> {
        let action = self
            .executions
            .get(action_id)?
            .filter(|a| a.tenant_id == actor.tenant_id)
            .ok_or_else(|| ProposalError::action_not_found(action_id))?;
        ensure_owner(self.directory.as_ref(), actor, action.conversation_id)?;
        Ok(action)
    }

    /// Run a claimed proposal's action and build its execution record.
    fn execute_claimed(&self, actor: &Actor, proposal: &ActionProposal) -> ExecutedAction {
        let kind: ActionKind = proposal.action_type;
        let started = Instant::now();
        let outcome = self
            .registry
            .execute(kind.as_str(), &proposal.parameters, actor.user_id);
        let duration_ms = started.elapsed().as_millis() as u64;

        let (result, status, error_message, affected) = match outcome {
            Ok(outcome) => (Some(outcome.result), ExecutionStatus::Success, None, outcome.affected),
            Err(e) => {
                tracing::warn!(proposal_id = %proposal.id, action_type = %kind, "action execution failed: {}", e);
                let message = e.to_string();
                (
                    Some(serde_json::json!({ "error": message })),
                    ExecutionStatus::Failed,
                    Some(message),
                    None,
                )
            }
        };

        ExecutedAction {
            id: Uuid::new_v4(),
            proposal_id: proposal.id,
            conversation_id: proposal.conversation_id,
            tenant_id: actor.tenant_id,
            executed_by: actor.user_id,
            agent_id: proposal.agent_id.clone(),
            action_type: kind,
            parameters: proposal.parameters.clone(),
            result,
            status,
            error_message,
            duration_ms,
            is_reversible: self.registry.is_reversible(kind),
            affected_entity_type: affected.as_ref().map(|a| a.entity_type.clone()),
            affected_entity_id: affected.map(|a| a.entity_id),
            reverted_at: None,
            reverted_by: None,
            created_at: Utc::now(),
        }
    }

    /// Audit trail writes are best-effort: a failure is logged, not returned.
    fn record_audit(&self, mut event: AuditEvent) {
        let mut log = self.audit.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = log.append(&mut event) {
            tracing::error!(action = ?event.action, "failed to append audit event: {}", e);
        }
    }
}

fn proposal_uri(id: Uuid) -> String {
    format!("proposal://{}", id)
}

fn action_uri(id: Uuid) -> String {
    format!("action://{}", id)
}

/// Marks an action as having a revert in flight; released on drop.
struct RevertGuard<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    action_id: Uuid,
}

impl<'a> RevertGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<Uuid>>, action_id: Uuid) -> Result<Self, ProposalError> {
        if !lock(in_flight).insert(action_id) {
            return Err(ProposalError::RevertInProgress(action_id));
        }
        Ok(Self {
            in_flight,
            action_id,
        })
    }
}

impl Drop for RevertGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.action_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{ConversationOwner, Role, RolePermissions};
    use dt_actions::{DevtelBackend, Issue, JsonDevtelBackend, NewIssue};
    use serde_json::json;
    use std::sync::RwLock;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Conversations(RwLock<HashMap<Uuid, ConversationOwner>>);

    impl ConversationDirectory for Conversations {
        fn conversation_owner(&self, id: Uuid) -> Result<Option<ConversationOwner>, ProposalError> {
            Ok(self.0.read().unwrap().get(&id).cloned())
        }
    }

    struct Harness {
        dir: TempDir,
        engine: ProposalEngine,
        backend: Arc<JsonDevtelBackend>,
        owner: Actor,
        conversation_id: Uuid,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_permissions(RolePermissions::default())
        }

        fn with_permissions(permissions: RolePermissions) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let backend = Arc::new(JsonDevtelBackend::open(dir.path().join("devtel")).unwrap());
            let registry = ActionRegistry::new(backend.clone());

            let owner = Actor::new(Uuid::new_v4(), Uuid::new_v4());
            let conversation_id = Uuid::new_v4();
            let conversations = Conversations::default();
            conversations.0.write().unwrap().insert(
                conversation_id,
                ConversationOwner {
                    conversation_id,
                    tenant_id: owner.tenant_id,
                    user_id: owner.user_id,
                },
            );

            let engine = ProposalEngine::open(
                dir.path(),
                registry,
                Arc::new(conversations),
                Arc::new(permissions),
            )
            .unwrap();
            Self {
                dir,
                engine,
                backend,
                owner,
                conversation_id,
            }
        }

        fn issue(&self, assignee: Option<Uuid>) -> Issue {
            self.backend
                .create_issue(
                    NewIssue {
                        project_id: Uuid::new_v4(),
                        title: "Checkout times out".into(),
                        assignee_id: assignee,
                        ..NewIssue::default()
                    },
                    self.owner.user_id,
                )
                .unwrap()
        }

        fn propose(&self, action_type: &str, parameters: serde_json::Value) -> ActionProposal {
            self.engine
                .create_proposal(
                    &self.owner,
                    NewProposal {
                        conversation_id: self.conversation_id,
                        message_id: Some(Uuid::new_v4()),
                        agent_id: "planner".into(),
                        action_type: action_type.into(),
                        parameters,
                        reasoning: Some("because".into()),
                        affected_entities: vec![],
                        confidence_score: Some(0.8),
                    },
                )
                .unwrap()
        }

        fn create_issue_proposal(&self) -> ActionProposal {
            self.propose(
                "create_issue",
                json!({ "projectId": Uuid::new_v4(), "title": "Add rate limiting" }),
            )
        }

        fn stranger(&self) -> Actor {
            Actor::new(self.owner.tenant_id, Uuid::new_v4())
        }

        fn stored(&self, id: Uuid) -> ActionProposal {
            self.engine.proposals.get(id).unwrap().unwrap()
        }

        fn executions_for(&self, proposal_id: Uuid) -> Vec<ExecutedAction> {
            self.engine.executions.find_by_proposal(proposal_id).unwrap()
        }
    }

    #[test]
    fn create_validates_before_persisting() {
        let h = Harness::new();
        let base = NewProposal {
            conversation_id: h.conversation_id,
            agent_id: "planner".into(),
            action_type: "create_issue".into(),
            parameters: json!({ "projectId": Uuid::new_v4(), "title": "ok" }),
            ..NewProposal::default()
        };

        let err = h
            .engine
            .create_proposal(&h.owner, NewProposal { action_type: "nuke".into(), ..base.clone() })
            .unwrap_err();
        assert!(err.is_validation());

        let err = h
            .engine
            .create_proposal(&h.owner, NewProposal { confidence_score: Some(1.5), ..base.clone() })
            .unwrap_err();
        assert!(matches!(err, ProposalError::InvalidProposal(_)));

        let err = h
            .engine
            .create_proposal(&h.owner, NewProposal { parameters: json!({ "title": "no project" }), ..base.clone() })
            .unwrap_err();
        assert!(err.is_validation());

        assert!(h
            .engine
            .proposals
            .list_for_conversation(h.conversation_id, None)
            .unwrap()
            .is_empty());

        let created = h.engine.create_proposal(&h.owner, base).unwrap();
        assert_eq!(created.status, ProposalStatus::Pending);
        assert_eq!(created.expires_at - created.created_at, Duration::hours(1));
    }

    #[test]
    fn terminal_proposals_cannot_change_again() {
        let h = Harness::new();

        let approved = h.create_issue_proposal();
        h.engine.approve_proposal(&h.owner, approved.id).unwrap();
        let rejected = h.create_issue_proposal();
        h.engine.reject_proposal(&h.owner, rejected.id, Some("dup".into())).unwrap();
        let modified = h.create_issue_proposal();
        h.engine
            .modify_proposal(&h.owner, modified.id, ProposalOverrides::default())
            .unwrap();

        for id in [approved.id, rejected.id, modified.id] {
            let before = h.stored(id);
            assert!(matches!(
                h.engine.approve_proposal(&h.owner, id),
                Err(ProposalError::NotFound { .. })
            ));
            assert!(matches!(
                h.engine.reject_proposal(&h.owner, id, None),
                Err(ProposalError::NotFound { .. })
            ));
            assert!(matches!(
                h.engine.modify_proposal(&h.owner, id, ProposalOverrides::default()),
                Err(ProposalError::NotFound { .. })
            ));
            assert_eq!(h.stored(id), before);
        }
        assert_eq!(h.executions_for(approved.id).len(), 1);
    }

    #[test]
    fn expired_approval_leaves_proposal_pending() {
        let h = Harness::new();
        let proposal = h.create_issue_proposal();
        // Back-date the expiry directly in storage.
        let mut stale = h.stored(proposal.id);
        stale.expires_at = Utc::now() - Duration::minutes(1);
        h.engine.proposals.discard(proposal.id).unwrap();
        h.engine.proposals.insert(&stale).unwrap();

        let err = h.engine.approve_proposal(&h.owner, proposal.id).unwrap_err();
        assert!(matches!(err, ProposalError::ProposalExpired { proposal_id, .. } if proposal_id == proposal.id));

        let stored = h.stored(proposal.id);
        assert_eq!(stored.status, ProposalStatus::Pending);
        assert_eq!(stored.effective_status(Utc::now()), ProposalStatus::Expired);
        assert!(h.executions_for(proposal.id).is_empty());
        assert!(h
            .engine
            .list_pending_proposals(&h.owner, h.conversation_id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn failed_execution_still_approves_and_records_once() {
        let h = Harness::new();
        let proposal = h.propose(
            "assign_issue",
            json!({ "issueId": Uuid::new_v4(), "assigneeId": Uuid::new_v4() }),
        );

        let approval = h.engine.approve_proposal(&h.owner, proposal.id).unwrap();
        assert_eq!(approval.proposal.status, ProposalStatus::Approved);
        assert_eq!(approval.proposal.responded_by, Some(h.owner.user_id));
        assert_eq!(approval.execution.status, ExecutionStatus::Failed);
        assert!(approval.execution.error_message.as_deref().unwrap().contains("not found"));
        assert!(approval.execution.affected_entity_id.is_none());

        let records = h.executions_for(proposal.id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, approval.execution.id);

        // Nothing to undo for a failed execution.
        assert!(matches!(
            h.engine.revert_executed_action(&h.owner, approval.execution.id),
            Err(ProposalError::NotReversible(_))
        ));
    }

    #[test]
    fn concurrent_approvals_execute_once() {
        let h = Arc::new(Harness::new());
        let proposal = h.create_issue_proposal();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || h.engine.approve_proposal(&h.owner, proposal.id).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(h.executions_for(proposal.id).len(), 1);
        assert_eq!(std::fs::read_dir(h.dir.path().join("devtel/issues")).unwrap().count(), 1);
    }

    #[test]
    fn revert_succeeds_once() {
        let h = Harness::new();
        let u1 = Uuid::new_v4();
        let issue = h.issue(Some(u1));
        let proposal = h.propose(
            "update_issue",
            json!({ "issueId": issue.id, "assigneeId": Uuid::new_v4(), "title": "Renamed" }),
        );
        let approval = h.engine.approve_proposal(&h.owner, proposal.id).unwrap();
        assert!(approval.execution.is_reversible);

        h.engine
            .revert_executed_action(&h.owner, approval.execution.id)
            .unwrap();
        let err = h
            .engine
            .revert_executed_action(&h.owner, approval.execution.id)
            .unwrap_err();
        assert!(matches!(err, ProposalError::AlreadyReverted(_)));

        let restored = h.backend.find_issue(issue.id).unwrap().unwrap();
        assert_eq!(restored.assignee_id, Some(u1));
        assert_eq!(restored.title, "Checkout times out");
    }

    #[test]
    fn failed_revert_does_not_stamp() {
        let h = Harness::new();
        let issue = h.issue(None);
        let proposal = h.propose("assign_issue", json!({ "issueId": issue.id, "assigneeId": Uuid::new_v4() }));
        let approval = h.engine.approve_proposal(&h.owner, proposal.id).unwrap();

        // The issue disappears out from under the revert.
        std::fs::remove_file(
            h.dir.path().join("devtel/issues").join(format!("{}.json", issue.id)),
        )
        .unwrap();

        let err = h
            .engine
            .revert_executed_action(&h.owner, approval.execution.id)
            .unwrap_err();
        assert!(matches!(err, ProposalError::RevertFailed { .. }));
        assert!(err.to_string().contains("issue not found"));
        let stored = h.engine.executions.get(approval.execution.id).unwrap().unwrap();
        assert!(stored.reverted_at.is_none());
    }

    #[test]
    fn revert_guard_rejects_concurrent_caller() {
        let in_flight = Mutex::new(HashSet::new());
        let id = Uuid::new_v4();
        let first = RevertGuard::acquire(&in_flight, id).unwrap();
        assert!(matches!(
            RevertGuard::acquire(&in_flight, id),
            Err(ProposalError::RevertInProgress(_))
        ));
        drop(first);
        assert!(RevertGuard::acquire(&in_flight, id).is_ok());
    }

    #[test]
    fn modification_chain_is_consistent() {
        let h = Harness::new();
        let project = Uuid::new_v4();
        let original = h.propose(
            "create_issue",
            json!({ "projectId": project, "title": "Old title", "priority": "low" }),
        );
        std::thread::sleep(std::time::Duration::from_millis(5));

        let overrides = ProposalOverrides {
            parameters: json!({ "title": "New title" }).as_object().cloned().unwrap(),
            ..ProposalOverrides::default()
        };
        let modification = h.engine.modify_proposal(&h.owner, original.id, overrides).unwrap();

        let frozen = h.stored(original.id);
        assert_eq!(frozen.status, ProposalStatus::Modified);
        assert_eq!(frozen.modified_proposal_id, Some(modification.proposal.id));

        let successor = h.stored(modification.proposal.id);
        assert_eq!(successor.status, ProposalStatus::Pending);
        assert!(successor.expires_at > original.expires_at);
        assert_eq!(
            successor.parameters,
            json!({ "projectId": project, "title": "New title", "priority": "low" })
        );
        assert_eq!(successor.reasoning, original.reasoning);
        assert_eq!(successor.agent_id, original.agent_id);
        assert_eq!(successor.message_id, original.message_id);
        assert_eq!(successor.confidence_score, original.confidence_score);
    }

    #[test]
    fn invalid_override_is_rejected_without_changes() {
        let h = Harness::new();
        let original = h.create_issue_proposal();
        let overrides = ProposalOverrides {
            parameters: json!({ "title": "" }).as_object().cloned().unwrap(),
            ..ProposalOverrides::default()
        };
        let err = h.engine.modify_proposal(&h.owner, original.id, overrides).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(h.stored(original.id).status, ProposalStatus::Pending);
        assert_eq!(
            h.engine.proposals.list_for_conversation(h.conversation_id, None).unwrap().len(),
            1
        );
    }

    #[test]
    fn second_modify_of_same_original_fails() {
        let h = Harness::new();
        let original = h.create_issue_proposal();
        h.engine
            .modify_proposal(&h.owner, original.id, ProposalOverrides::default())
            .unwrap();
        let err = h
            .engine
            .modify_proposal(&h.owner, original.id, ProposalOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ProposalError::NotFound { entity: "proposal", .. }));
        assert_eq!(
            h.engine.proposals.list_for_conversation(h.conversation_id, None).unwrap().len(),
            2
        );
    }

    #[test]
    fn non_owner_is_denied_for_every_operation() {
        let h = Harness::new();
        let stranger = h.stranger();
        let issue = h.issue(None);

        let proposals = [
            h.create_issue_proposal(),
            h.propose("update_issue", json!({ "issueId": issue.id, "status": "todo" })),
            h.propose("assign_issue", json!({ "issueId": issue.id, "assigneeId": Uuid::new_v4() })),
            h.propose("create_spec", json!({ "projectId": Uuid::new_v4(), "title": "Spec", "content": "x" })),
        ];
        for p in &proposals {
            assert!(matches!(
                h.engine.approve_proposal(&stranger, p.id),
                Err(ProposalError::AccessDenied { .. })
            ));
            assert!(matches!(
                h.engine.reject_proposal(&stranger, p.id, None),
                Err(ProposalError::AccessDenied { .. })
            ));
            assert!(matches!(
                h.engine.modify_proposal(&stranger, p.id, ProposalOverrides::default()),
                Err(ProposalError::AccessDenied { .. })
            ));
            assert_eq!(h.stored(p.id).status, ProposalStatus::Pending);
        }

        let approval = h.engine.approve_proposal(&h.owner, proposals[2].id).unwrap();
        assert!(matches!(
            h.engine.revert_executed_action(&stranger, approval.execution.id),
            Err(ProposalError::AccessDenied { .. })
        ));

        // Another tenant cannot even see it.
        let outsider = Actor::new(Uuid::new_v4(), h.owner.user_id);
        assert!(matches!(
            h.engine.get_executed_action(&outsider, approval.execution.id),
            Err(ProposalError::NotFound { .. })
        ));
    }

    #[test]
    fn viewers_cannot_act() {
        let viewer_id = Uuid::new_v4();
        let h = Harness::with_permissions(RolePermissions::new(
            Role::Editor,
            HashMap::from([(viewer_id, Role::Viewer)]),
        ));
        let proposal = h.create_issue_proposal();
        let viewer = Actor::new(h.owner.tenant_id, viewer_id);
        assert!(matches!(
            h.engine.approve_proposal(&viewer, proposal.id),
            Err(ProposalError::AccessDenied { .. })
        ));
    }

    #[test]
    fn assign_approve_revert_scenario() {
        let h = Harness::new();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let issue = h.issue(Some(u1));

        let proposal = h.propose("assign_issue", json!({ "issueId": issue.id, "assigneeId": u2 }));
        let approval = h.engine.approve_proposal(&h.owner, proposal.id).unwrap();
        let execution = approval.execution;
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.result.as_ref().unwrap()["previousAssigneeId"], json!(u1));
        assert_eq!(execution.affected_entity_type.as_deref(), Some("issue"));
        assert_eq!(execution.affected_entity_id, Some(issue.id));
        assert_eq!(h.backend.find_issue(issue.id).unwrap().unwrap().assignee_id, Some(u2));

        let reverted = h.engine.revert_executed_action(&h.owner, execution.id).unwrap();
        assert!(reverted.reverted_at.is_some());
        assert_eq!(reverted.reverted_by, Some(h.owner.user_id));
        assert_eq!(h.backend.find_issue(issue.id).unwrap().unwrap().assignee_id, Some(u1));
    }

    #[test]
    fn create_issue_is_not_reversible() {
        let h = Harness::new();
        let proposal = h.create_issue_proposal();
        let approval = h.engine.approve_proposal(&h.owner, proposal.id).unwrap();
        assert!(!approval.execution.is_reversible);
        assert!(matches!(
            h.engine.revert_executed_action(&h.owner, approval.execution.id),
            Err(ProposalError::NotReversible(_))
        ));
    }

    #[test]
    fn transitions_are_audited_in_a_valid_chain() {
        let h = Harness::new();
        let a = h.create_issue_proposal();
        h.engine.approve_proposal(&h.owner, a.id).unwrap();
        let b = h.create_issue_proposal();
        h.engine.reject_proposal(&h.owner, b.id, None).unwrap();

        let path = h.dir.path().join("audit.jsonl");
        assert_eq!(AuditLog::verify_chain(&path).unwrap(), 5);
        let actions: Vec<_> = AuditLog::read_all(&path).unwrap().into_iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::ProposalCreated,
                AuditAction::ProposalApproved,
                AuditAction::ActionExecuted,
                AuditAction::ProposalCreated,
                AuditAction::ProposalRejected,
            ]
        );
    }

    #[test]
    fn listing_executed_actions_hides_other_users_conversations() {
        let h = Harness::new();
        let p = h.create_issue_proposal();
        h.engine.approve_proposal(&h.owner, p.id).unwrap();

        assert_eq!(
            h.engine
                .list_executed_actions(&h.owner, ExecutionFilter::default())
                .unwrap()
                .len(),
            1
        );
        assert!(h
            .engine
            .list_executed_actions(&h.stranger(), ExecutionFilter::default())
            .unwrap()
            .is_empty());
    }
}
