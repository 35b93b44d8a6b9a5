//! # dt-actions
//!
//! The closed set of mutations an agent may propose against the DevTel
//! domain, and the machinery that executes and reverses them.
//!
//! ## Key components
//!
//! - [`ActionKind`] — the closed enum of action types (`create_issue`,
//!   `update_issue`, `assign_issue`, `create_spec`)
//! - [`Action`] — an action kind paired with its validated parameters
//! - [`ActionRegistry`] — executes and reverts actions against a
//!   [`DevtelBackend`], bounded by a timeout
//! - [`DevtelBackend`] / [`JsonDevtelBackend`] — the DevTel domain
//!   collaborator (issues, spec documents, projects, cycles, users)
//!
//! Action payloads (parameters and results) follow the DevTel API's
//! camelCase field naming, since they travel to and from the agent service
//! verbatim.

pub mod action;
pub mod devtel;
pub mod error;
pub mod registry;

pub use action::{
    Action, ActionKind, AssignIssueParams, AssignIssueResult, CreateIssueParams,
    CreateSpecParams, UpdateIssueParams, UpdateIssueResult,
};
pub use devtel::{
    Cycle, DevtelBackend, Issue, IssuePatch, IssuePriority, IssueStatus, IssueUpdate,
    JsonDevtelBackend, NewIssue, NewSpec, Project, SpecDocument, SpecStatus, UserProfile,
};
pub use error::ActionError;
pub use registry::{ActionOutcome, ActionRegistry, AffectedEntity};
