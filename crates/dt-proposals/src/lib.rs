//! # dt-proposals
//!
//! The proposal lifecycle: agents suggest DevTel mutations, humans decide.
//!
//! A proposal is created `pending` with an expiry. The conversation's owner
//! may approve it (which runs the action and records exactly one
//! [`ExecutedAction`](dt_audit::ExecutedAction)), reject it, or modify it
//! (which freezes the original and creates a pending successor). Executed
//! reversible actions can be reverted once.
//!
//! All operations go through [`ProposalEngine`], which enforces the
//! capability and ownership checks in [`access`] before touching storage.

pub mod access;
pub mod engine;
pub mod error;
pub mod events;
pub mod proposal;
pub mod store;

pub use access::{
    Actor, ConversationDirectory, ConversationOwner, Permission, PermissionChecker, Role,
    RolePermissions,
};
pub use engine::{Approval, Modification, ProposalEngine, DEFAULT_PROPOSAL_TTL_MINUTES};
pub use error::ProposalError;
pub use events::{EventDispatcher, LogSink, NotificationSink, ProposalEvent};
pub use proposal::{ActionProposal, NewProposal, ProposalOverrides, ProposalStatus};
pub use store::ProposalStore;
