// action.rs — The closed set of action kinds and their typed parameters.
//
// Action types arrive as strings from the agent service and as stored
// proposal rows. They are parsed into `ActionKind` at the boundary; any
// string outside the closed set is rejected before persistence or side
// effects. `Action` pairs a kind with its validated parameter struct.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::devtel::{Issue, IssuePatch, IssuePriority, IssueStatus};
use crate::error::ActionError;

/// Every mutation an agent may propose.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateIssue,
    UpdateIssue,
    AssignIssue,
    CreateSpec,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::CreateIssue,
        ActionKind::UpdateIssue,
        ActionKind::AssignIssue,
        ActionKind::CreateSpec,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateIssue => "create_issue",
            ActionKind::UpdateIssue => "update_issue",
            ActionKind::AssignIssue => "assign_issue",
            ActionKind::CreateSpec => "create_spec",
        }
    }

    /// The DevTel entity type this kind of action produces or mutates.
    pub fn entity_type(&self) -> &'static str {
        match self {
            ActionKind::CreateIssue | ActionKind::UpdateIssue | ActionKind::AssignIssue => {
                "issue"
            }
            ActionKind::CreateSpec => "spec",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ActionError::UnknownActionType(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateIssueParams {
    pub project_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<IssuePriority>,
    #[serde(default)]
    pub status: Option<IssueStatus>,
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub story_points: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIssueParams {
    pub issue_id: Uuid,
    #[serde(flatten)]
    pub changes: IssuePatch,
}

/// `assigneeId: null` unassigns the issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssignIssueParams {
    pub issue_id: Uuid,
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpecParams {
    pub project_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Result of `update_issue`: the updated issue plus the prior value of
/// every field the update touched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIssueResult {
    pub issue: Issue,
    pub previous_values: IssuePatch,
}

/// Result of `assign_issue`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssignIssueResult {
    pub issue: Issue,
    pub previous_assignee_id: Option<Uuid>,
}

/// An action kind paired with its validated parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CreateIssue(CreateIssueParams),
    UpdateIssue(UpdateIssueParams),
    AssignIssue(AssignIssueParams),
    CreateSpec(CreateSpecParams),
}

impl Action {
    /// Parse and validate raw parameters for `kind`.
    pub fn parse(kind: ActionKind, parameters: &serde_json::Value) -> Result<Self, ActionError> {
        let action = match kind {
            ActionKind::CreateIssue => {
                let params: CreateIssueParams = decode(kind, parameters)?;
                require_text(kind, "title", &params.title)?;
                Action::CreateIssue(params)
            }
            ActionKind::UpdateIssue => {
                let params: UpdateIssueParams = decode(kind, parameters)?;
                if params.changes.is_empty() {
                    return Err(invalid(kind, "no valid updates provided"));
                }
                if let Some(title) = &params.changes.title {
                    require_text(kind, "title", title)?;
                }
                Action::UpdateIssue(params)
            }
            ActionKind::AssignIssue => Action::AssignIssue(decode(kind, parameters)?),
            ActionKind::CreateSpec => {
                let params: CreateSpecParams = decode(kind, parameters)?;
                require_text(kind, "title", &params.title)?;
                Action::CreateSpec(params)
            }
        };
        Ok(action)
    }

    /// Parse an action type string and its parameters in one step.
    pub fn from_parts(action_type: &str, parameters: &serde_json::Value) -> Result<Self, ActionError> {
        Self::parse(action_type.parse()?, parameters)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CreateIssue(_) => ActionKind::CreateIssue,
            Action::UpdateIssue(_) => ActionKind::UpdateIssue,
            Action::AssignIssue(_) => ActionKind::AssignIssue,
            Action::CreateSpec(_) => ActionKind::CreateSpec,
        }
    }
}

fn decode<T: DeserializeOwned>(
    kind: ActionKind,
    parameters: &serde_json::Value,
) -> Result<T, ActionError> {
    if !parameters.is_object() {
        return Err(invalid(kind, "parameters must be a JSON object"));
    }
    serde_json::from_value(parameters.clone()).map_err(|e| invalid(kind, e.to_string()))
}

fn require_text(kind: ActionKind, field: &str, value: &str) -> Result<(), ActionError> {
    if value.trim().is_empty() {
        return Err(invalid(kind, format!("{} must not be empty", field)));
    }
    Ok(())
}

fn invalid(kind: ActionKind, reason: impl Into<String>) -> ActionError {
    ActionError::InvalidParameters {
        action_type: kind.to_string(),
        reason: reason.into(),
    }
}
