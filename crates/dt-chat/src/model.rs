// model.rs — Conversation-layer records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dt_store::Record;

/// Longest title derived from a message when the agent can't provide one.
pub const FALLBACK_TITLE_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Active => write!(f, "active"),
            ConversationStatus::Archived => write!(f, "archived"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: Option<String>,
    /// Free-form client context, passed through to the agent untouched.
    #[serde(default)]
    pub context: serde_json::Value,
    pub status: ConversationStatus,
    pub message_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the conversation is deleted; the row and its messages stay.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record for Conversation {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

impl Conversation {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    User,
    Agent,
}

impl SenderType {
    /// Role name used in transcripts sent to the agent.
    pub fn transcript_role(&self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Agent => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Markdown,
}

/// An entity referenced from a user message, e.g. `{"type": "issue", "id": ..}`.
///
/// The type stays a string: unknown kinds are skipped at context-building
/// time rather than rejected at send time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MentionedEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_entities: Vec<MentionedEntity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proposal_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_type: SenderType,
    pub agent_id: Option<String>,
    pub content: String,
    pub content_type: ContentType,
    /// True while the agent reply is still being produced.
    pub is_streaming: bool,
    pub stream_completed_at: Option<DateTime<Utc>>,
    pub tokens_used: Option<u64>,
    pub duration_ms: Option<u64>,
    pub feedback_rating: Option<u8>,
    #[serde(default)]
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

impl Record for Message {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

impl Message {
    pub fn from_user(
        conversation_id: Uuid,
        content: String,
        mentioned_entities: Vec<MentionedEntity>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_type: SenderType::User,
            agent_id: None,
            content,
            content_type: ContentType::Text,
            is_streaming: false,
            stream_completed_at: None,
            tokens_used: None,
            duration_ms: None,
            feedback_rating: None,
            metadata: MessageMetadata {
                mentioned_entities,
                ..MessageMetadata::default()
            },
            created_at: Utc::now(),
        }
    }

    /// Empty agent reply, filled in when the agent round-trip finishes.
    pub fn placeholder(conversation_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_type: SenderType::Agent,
            agent_id: None,
            content: String::new(),
            content_type: ContentType::Markdown,
            is_streaming: true,
            stream_completed_at: None,
            tokens_used: None,
            duration_ms: None,
            feedback_rating: None,
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }
}

/// A stored conversation summary. The newest one is what the context
/// builder injects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMemory {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub summary: String,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for ConversationMemory {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// One row per agent round-trip, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTelemetry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_name: String,
    pub task_type: String,
    pub duration_ms: u64,
    pub tokens_used: Option<u64>,
    pub success: bool,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Record for AgentTelemetry {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentFeedback {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Option<String>,
    /// 1 (poor) to 5 (excellent).
    pub rating: u8,
    #[serde(default)]
    pub categories: Vec<String>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Record for AgentFeedback {
    fn record_id(&self) -> Uuid {
        self.id
    }
}

/// Title derived from the first message: its first 50 characters, trimmed,
/// with `...` when the message was longer.
pub fn fallback_title(message: &str) -> String {
    let head: String = message.chars().take(FALLBACK_TITLE_CHARS).collect();
    let mut title = head.trim().to_string();
    if message.chars().count() > FALLBACK_TITLE_CHARS {
        title.push_str("...");
    }
    title
}
