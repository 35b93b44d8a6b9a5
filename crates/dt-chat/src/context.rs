// context.rs — Assemble what the agent sees for one chat turn.
//
// Conversation metadata, the caller, the conversation's project, any
// entities the user mentioned, the latest stored summary, and the last
// few messages. A mentioned entity that cannot be resolved is skipped
// with a warning; it never fails the turn.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dt_actions::{DevtelBackend, IssuePriority, IssueStatus};
use dt_proposals::Actor;

use crate::agent::TranscriptEntry;
use crate::error::ChatError;
use crate::model::{Conversation, MentionedEntity, Message};
use crate::store::ChatStore;

/// Messages of recent history included in every context.
pub const RECENT_MESSAGE_LIMIT: usize = 20;
const DESCRIPTION_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub conversation: ConversationContext,
    pub user: UserContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_entities: Vec<ResolvedEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryContext>,
    pub recent_messages: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationContext {
    pub id: Uuid,
    pub title: Option<String>,
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    pub id: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectContext {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// The project lead's full name.
    pub lead: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryContext {
    pub summary: String,
    pub key_decisions: Vec<String>,
    pub action_items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedEntity {
    Issue {
        id: Uuid,
        title: String,
        status: IssueStatus,
        priority: IssuePriority,
        /// First 500 characters only.
        description: Option<String>,
    },
    User {
        id: Uuid,
        name: String,
        email: String,
    },
    Cycle {
        id: Uuid,
        name: String,
        status: String,
        #[serde(rename = "startDate")]
        start_date: Option<DateTime<Utc>>,
        #[serde(rename = "endDate")]
        end_date: Option<DateTime<Utc>>,
    },
}

#[derive(Clone)]
pub struct ContextBuilder {
    store: Arc<ChatStore>,
    devtel: Arc<dyn DevtelBackend>,
}

impl ContextBuilder {
    pub fn new(store: Arc<ChatStore>, devtel: Arc<dyn DevtelBackend>) -> Self {
        Self { store, devtel }
    }

    pub fn build(
        &self,
        conversation: &Conversation,
        actor: &Actor,
        message: &Message,
    ) -> Result<AgentContext, ChatError> {
        let project = match conversation.project_id {
            Some(project_id) => self.project(project_id)?,
            None => None,
        };

        let memory = self
            .store
            .latest_memory(conversation.id)?
            .map(|m| MemoryContext {
                summary: m.summary,
                key_decisions: m.key_decisions,
                action_items: m.action_items,
            });

        let recent_messages = self
            .store
            .recent_messages(conversation.id, RECENT_MESSAGE_LIMIT)?
            .into_iter()
            .map(|m| TranscriptEntry {
                role: m.sender_type.transcript_role().to_string(),
                content: m.content,
            })
            .collect();

        Ok(AgentContext {
            conversation: ConversationContext {
                id: conversation.id,
                title: conversation.title.clone(),
                context: conversation.context.clone(),
            },
            user: UserContext {
                id: actor.user_id,
                name: actor.display_name.clone(),
            },
            project,
            mentioned_entities: self.resolve_mentions(&message.metadata.mentioned_entities),
            memory,
            recent_messages,
        })
    }

    fn project(&self, project_id: Uuid) -> Result<Option<ProjectContext>, ChatError> {
        let Some(project) = self.devtel.find_project(project_id)? else {
            return Ok(None);
        };
        let lead = match project.lead_id {
            Some(lead_id) => self.devtel.find_user(lead_id)?.map(|u| u.full_name),
            None => None,
        };
        Ok(Some(ProjectContext {
            id: project.id,
            name: project.name,
            description: project.description,
            lead,
        }))
    }

    fn resolve_mentions(&self, mentions: &[MentionedEntity]) -> Vec<ResolvedEntity> {
        mentions
            .iter()
            .filter_map(|mention| match self.resolve(mention) {
                Ok(Some(entity)) => Some(entity),
                Ok(None) => {
                    tracing::warn!(
                        entity_type = %mention.entity_type,
                        entity_id = %mention.id,
                        "mentioned entity could not be resolved, skipping"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        entity_type = %mention.entity_type,
                        entity_id = %mention.id,
                        "failed to load mentioned entity: {}",
                        e
                    );
                    None
                }
            })
            .collect()
    }

    fn resolve(&self, mention: &MentionedEntity) -> Result<Option<ResolvedEntity>, ChatError> {
        let entity = match mention.entity_type.as_str() {
            "issue" => self.devtel.find_issue(mention.id)?.map(|issue| ResolvedEntity::Issue {
                id: issue.id,
                title: issue.title,
                status: issue.status,
                priority: issue.priority,
                description: issue
                    .description
                    .map(|d| d.chars().take(DESCRIPTION_PREVIEW_CHARS).collect()),
            }),
            "user" => self.devtel.find_user(mention.id)?.map(|user| ResolvedEntity::User {
                id: user.id,
                name: user.full_name,
                email: user.email,
            }),
            "cycle" => self.devtel.find_cycle(mention.id)?.map(|cycle| ResolvedEntity::Cycle {
                id: cycle.id,
                name: cycle.name,
                status: cycle.status,
                start_date: cycle.start_date,
                end_date: cycle.end_date,
            }),
            _ => None,
        };
        Ok(entity)
    }
}
