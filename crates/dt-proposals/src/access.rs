// access.rs — Who may read or act on a conversation's proposals and actions.
//
// Two checks run on every operation: a capability check (can this user
// read / edit conversations at all?) and an ownership check (is this the
// user who owns the proposal's conversation, in the caller's tenant?).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProposalError;

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub display_name: Option<String>,
}

impl Actor {
    pub fn new(tenant_id: Uuid, user_id: Uuid) -> Self {
        Self {
            tenant_id,
            user_id,
            display_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Read conversations, proposals and executed actions.
    ConversationRead,
    /// Send messages and approve, reject, modify or revert.
    ConversationEdit,
}

pub trait PermissionChecker: Send + Sync {
    fn has_permission(&self, actor: &Actor, permission: Permission) -> bool;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    #[default]
    Editor,
}

impl Role {
    pub fn grants(&self, permission: Permission) -> bool {
        match self {
            Role::Editor => true,
            Role::Viewer => permission == Permission::ConversationRead,
        }
    }
}

/// Role table keyed by user id, with a fallback role for everyone else.
#[derive(Debug, Clone, Default)]
pub struct RolePermissions {
    default_role: Role,
    roles: HashMap<Uuid, Role>,
}

impl RolePermissions {
    pub fn new(default_role: Role, roles: HashMap<Uuid, Role>) -> Self {
        Self {
            default_role,
            roles,
        }
    }

    pub fn role_of(&self, user_id: Uuid) -> Role {
        self.roles.get(&user_id).copied().unwrap_or(self.default_role)
    }
}

impl PermissionChecker for RolePermissions {
    fn has_permission(&self, actor: &Actor, permission: Permission) -> bool {
        self.role_of(actor.user_id).grants(permission)
    }
}

/// Owner of a conversation, as reported by the conversation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationOwner {
    pub conversation_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

/// Resolves conversation ownership. Implemented by the chat layer.
pub trait ConversationDirectory: Send + Sync {
    fn conversation_owner(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<ConversationOwner>, ProposalError>;
}

pub(crate) fn authorize(
    checker: &dyn PermissionChecker,
    actor: &Actor,
    permission: Permission,
) -> Result<(), ProposalError> {
    if checker.has_permission(actor, permission) {
        Ok(())
    } else {
        Err(ProposalError::AccessDenied {
            user_id: actor.user_id,
            reason: format!("missing permission {:?}", permission),
        })
    }
}

/// Missing or foreign-tenant conversations are `NotFound`; another user's
/// conversation in the same tenant is `AccessDenied`.
pub(crate) fn ensure_owner(
    directory: &dyn ConversationDirectory,
    actor: &Actor,
    conversation_id: Uuid,
) -> Result<ConversationOwner, ProposalError> {
    let owner = directory
        .conversation_owner(conversation_id)?
        .filter(|o| o.tenant_id == actor.tenant_id)
        .ok_or(ProposalError::NotFound {
            entity: "conversation",
            id: conversation_id,
        })?;
    if owner.user_id != actor.user_id {
        return Err(ProposalError::AccessDenied {
            user_id: actor.user_id,
            reason: format!("conversation {} belongs to another user", conversation_id),
        });
    }
    Ok(owner)
}
