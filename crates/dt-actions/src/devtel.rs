// devtel.rs — The DevTel domain collaborator.
//
// DevTel (projects, issues, cycles, spec documents) is owned by the
// surrounding system; this module models only what the action executors
// mutate and what the chat context builder reads. `DevtelBackend` is the
// seam; `JsonDevtelBackend` persists each entity kind in its own
// JsonFileStore directory.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use dt_store::{JsonFileStore, Record};

use crate::error::ActionError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssuePriority {
    Urgent,
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
    Canceled,
}

/// A DevTel issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: IssuePriority,
    pub status: IssueStatus,
    pub assignee_id: Option<Uuid>,
    pub estimated_hours: Option<f64>,
    pub story_points: Option<u32>,
    pub created_by: Uuid,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Issue {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// Fields for a new issue.
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: IssuePriority,
    pub status: IssueStatus,
    pub assignee_id: Option<Uuid>,
    pub estimated_hours: Option<f64>,
    pub story_points: Option<u32>,
}

/// A partial issue update.
///
/// Nullable fields use `Option<Option<T>>`: absent means "leave alone",
/// `null` means "clear", a value means "set". The same type doubles as the
/// `previousValues` snapshot stored for reverts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<IssuePriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IssueStatus>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub assignee_id: Option<Option<Uuid>>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_hours: Option<Option<f64>>,
}

/// A field that is present in the JSON (even as `null`) becomes `Some(..)`.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl IssuePatch {
    pub fn is_empty(&self) -> bool {
        self == &IssuePatch::default()
    }

    /// Apply every present field to the issue.
    pub fn apply_to(&self, issue: &mut Issue) {
        if let Some(title) = &self.title {
            issue.title = title.clone();
        }
        if let Some(description) = &self.description {
            issue.description = description.clone();
        }
        if let Some(priority) = self.priority {
            issue.priority = priority;
        }
        if let Some(status) = self.status {
            issue.status = status;
        }
        if let Some(assignee_id) = self.assignee_id {
            issue.assignee_id = assignee_id;
        }
        if let Some(estimated_hours) = self.estimated_hours {
            issue.estimated_hours = estimated_hours;
        }
    }

    /// Snapshot the current values of exactly the fields this patch touches.
    pub fn snapshot_of(&self, issue: &Issue) -> IssuePatch {
        IssuePatch {
            title: self.title.as_ref().map(|_| issue.title.clone()),
            description: self.description.as_ref().map(|_| issue.description.clone()),
            priority: self.priority.map(|_| issue.priority),
            status: self.status.map(|_| issue.status),
            assignee_id: self.assignee_id.map(|_| issue.assignee_id),
            estimated_hours: self.estimated_hours.map(|_| issue.estimated_hours),
        }
    }
}

/// The issue before and after an update, captured atomically.
#[derive(Debug, Clone)]
pub struct IssueUpdate {
    pub before: Issue,
    pub after: Issue,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    #[default]
    Draft,
    Review,
    Approved,
}

/// A DevTel spec document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpecDocument {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub content: String,
    pub status: SpecStatus,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Record for SpecDocument {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone)]
pub struct NewSpec {
    pub project_id: Uuid,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub lead_id: Option<Uuid>,
}

impl Record for Project {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// A DevTel cycle (sprint).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

impl Record for Cycle {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

impl Record for UserProfile {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// The DevTel operations the executors and the context builder need.
pub trait DevtelBackend: Send + Sync {
    fn create_issue(&self, new: NewIssue, created_by: Uuid) -> Result<Issue, ActionError>;

    fn find_issue(&self, id: Uuid) -> Result<Option<Issue>, ActionError>;

    /// Apply a patch and return the issue before and after, atomically.
    fn update_issue(
        &self,
        id: Uuid,
        patch: &IssuePatch,
        updated_by: Uuid,
    ) -> Result<IssueUpdate, ActionError>;

    fn create_spec(&self, new: NewSpec, author_id: Uuid) -> Result<SpecDocument, ActionError>;

    fn find_project(&self, id: Uuid) -> Result<Option<Project>, ActionError>;

    fn find_cycle(&self, id: Uuid) -> Result<Option<Cycle>, ActionError>;

    fn find_user(&self, id: Uuid) -> Result<Option<UserProfile>, ActionError>;
}

/// DevTel backend persisted as JSON files under one root directory.
pub struct JsonDevtelBackend {
    issues: JsonFileStore<Issue>,
    specs: JsonFileStore<SpecDocument>,
    projects: JsonFileStore<Project>,
    cycles: JsonFileStore<Cycle>,
    users: JsonFileStore<UserProfile>,
}

impl JsonDevtelBackend {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ActionError> {
        let root = root.as_ref();
        Ok(Self {
            issues: JsonFileStore::new(root.join("issues"))?,
            specs: JsonFileStore::new(root.join("specs"))?,
            projects: JsonFileStore::new(root.join("projects"))?,
            cycles: JsonFileStore::new(root.join("cycles"))?,
            users: JsonFileStore::new(root.join("users"))?,
        })
    }

    // Projects, cycles and users are managed by the surrounding system;
    // these upserts exist so it (and tests) can mirror them in.

    pub fn upsert_project(&self, project: &Project) -> Result<(), ActionError> {
        Ok(self.projects.save(project)?)
    }

    pub fn upsert_cycle(&self, cycle: &Cycle) -> Result<(), ActionError> {
        Ok(self.cycles.save(cycle)?)
    }

    pub fn upsert_user(&self, user: &UserProfile) -> Result<(), ActionError> {
        Ok(self.users.save(user)?)
    }

    pub fn find_spec(&self, id: Uuid) -> Result<Option<SpecDocument>, ActionError> {
        Ok(self.specs.get(id)?)
    }
}

impl DevtelBackend for JsonDevtelBackend {
    fn create_issue(&self, new: NewIssue, created_by: Uuid) -> Result<Issue, ActionError> {
        let now = Utc::now();
        let issue = Issue {
            id: Uuid::new_v4(),
            project_id: new.project_id,
            title: new.title,
            description: new.description,
            priority: new.priority,
            status: new.status,
            assignee_id: new.assignee_id,
            estimated_hours: new.estimated_hours,
            story_points: new.story_points,
            created_by,
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        self.issues.insert(&issue)?;
        Ok(issue)
    }

    fn find_issue(&self, id: Uuid) -> Result<Option<Issue>, ActionError> {
        Ok(self.issues.get(id)?)
    }

    fn update_issue(
        &self,
        id: Uuid,
        patch: &IssuePatch,
        updated_by: Uuid,
    ) -> Result<IssueUpdate, ActionError> {
        let mut before = None;
        let after = self
            .issues
            .update(id, |issue| {
                before = Some(issue.clone());
                patch.apply_to(issue);
                issue.updated_by = Some(updated_by);
                issue.updated_at = Utc::now();
            })?
            .ok_or(ActionError::EntityNotFound { entity: "issue", id })?;
        let before = before.ok_or(ActionError::EntityNotFound { entity: "issue", id })?;
        Ok(IssueUpdate { before, after })
    }

    fn create_spec(&self, new: NewSpec, author_id: Uuid) -> Result<SpecDocument, ActionError> {
        let spec = SpecDocument {
            id: Uuid::new_v4(),
            project_id: new.project_id,
            title: new.title,
            content: new.content,
            status: SpecStatus::Draft,
            author_id,
            created_at: Utc::now(),
        };
        self.specs.insert(&spec)?;
        Ok(spec)
    }

    fn find_project(&self, id: Uuid) -> Result<Option<Project>, ActionError> {
        Ok(self.projects.get(id)?)
    }

    fn find_cycle(&self, id: Uuid) -> Result<Option<Cycle>, ActionError> {
        Ok(self.cycles.get(id)?)
    }

    fn find_user(&self, id: Uuid) -> Result<Option<UserProfile>, ActionError> {
        Ok(self.users.get(id)?)
    }
}
