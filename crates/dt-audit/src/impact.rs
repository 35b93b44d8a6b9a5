// impact.rs — Post-hoc correlation of an executed action with later events.
//
// Best-effort and read-only. The timeline lists other executed actions on
// the same entity within 24 hours after the action, plus projected events
// from a per-kind heuristic table; the metrics come from the same table.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dt_actions::ActionKind;

use crate::error::AuditError;
use crate::execution::{ExecutedAction, ExecutionFilter, ExecutionStore};

const WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    AgentAction,
    SystemEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    pub kind: TimelineKind,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ExecutedAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactReport {
    pub action: ExecutedAction,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub timeline: Vec<TimelineEntry>,
    pub metrics: BTreeMap<String, String>,
}

/// An event the heuristics expect to follow an action of some kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectedEvent {
    pub offset_minutes: i64,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HeuristicProfile {
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
    #[serde(default)]
    pub projected_events: Vec<ProjectedEvent>,
}

/// Static per-kind lookup table. Kinds without an entry get no metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactHeuristics {
    pub profiles: BTreeMap<ActionKind, HeuristicProfile>,
}

impl Default for ImpactHeuristics {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            ActionKind::CreateIssue,
            HeuristicProfile {
                metrics: BTreeMap::from([
                    ("Time to Assignment".to_string(), "2.5 hours".to_string()),
                    ("Time to First Comment".to_string(), "45 minutes".to_string()),
                ]),
                projected_events: vec![ProjectedEvent {
                    offset_minutes: 45,
                    description: "First comment added by user".to_string(),
                }],
            },
        );
        profiles.insert(
            ActionKind::AssignIssue,
            HeuristicProfile {
                metrics: BTreeMap::from([
                    ("Assignee Workload Change".to_string(), "+3 points".to_string()),
                    ("Completion Probability".to_string(), "Increased by 15%".to_string()),
                ]),
                projected_events: Vec::new(),
            },
        );
        Self { profiles }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImpactAnalyzer {
    heuristics: ImpactHeuristics,
}

impl ImpactAnalyzer {
    pub fn new(heuristics: ImpactHeuristics) -> Self {
        Self { heuristics }
    }

    /// Analyze one executed action within the caller's tenant.
    pub fn analyze(
        &self,
        store: &ExecutionStore,
        tenant_id: Uuid,
        action_id: Uuid,
    ) -> Result<ImpactReport, AuditError> {
        let action = store
            .get(action_id)?
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or(AuditError::ActionNotFound(action_id))?;

        let window_start = action.created_at;
        let window_end = window_start + Duration::hours(WINDOW_HOURS);
        let mut timeline = Vec::new();

        if let Some(entity_id) = action.affected_entity_id {
            let filter = ExecutionFilter {
                affected_entity_id: Some(entity_id),
                from: Some(window_start),
                to: Some(window_end),
                ..ExecutionFilter::for_tenant(tenant_id)
            };
            timeline.extend(
                store
                    .query(&filter)?
                    .into_iter()
                    .filter(|a| a.id != action.id && a.created_at > window_start)
                    .map(|a| TimelineEntry {
                        kind: TimelineKind::AgentAction,
                        timestamp: a.created_at,
                        description: format!("Agent {} performed {}", a.agent_id, a.action_type),
                        details: Some(a),
                    }),
            );
        }

        let mut metrics = BTreeMap::new();
        if let Some(profile) = self.heuristics.profiles.get(&action.action_type) {
            metrics = profile.metrics.clone();
            timeline.extend(profile.projected_events.iter().map(|e| TimelineEntry {
                kind: TimelineKind::SystemEvent,
                timestamp: window_start + Duration::minutes(e.offset_minutes),
                description: e.description.clone(),
                details: None,
            }));
        }

        timeline.sort_by_key(|entry| entry.timestamp);

        Ok(ImpactReport {
            action,
            window_start,
            window_end,
            timeline,
            metrics,
        })
    }
}
