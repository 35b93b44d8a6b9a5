// store.rs — Persistence for conversations, messages, memories, telemetry
// and feedback.
//
// Also the conversation directory the proposal engine consults for
// ownership checks.

use std::path::Path;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use dt_proposals::{ConversationDirectory, ConversationOwner, ProposalError};
use dt_store::{JsonFileStore, StoreError};

use crate::model::{
    AgentFeedback, AgentTelemetry, Conversation, ConversationMemory, ConversationStatus, Message,
};

/// Filter for [`ChatStore::conversations_for`].
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub status: Option<ConversationStatus>,
    pub project_id: Option<Uuid>,
}

pub struct ChatStore {
    conversations: JsonFileStore<Conversation>,
    messages: JsonFileStore<Message>,
    memories: JsonFileStore<ConversationMemory>,
    telemetry: JsonFileStore<AgentTelemetry>,
    feedback: JsonFileStore<AgentFeedback>,
}

impl ChatStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        Ok(Self {
            conversations: JsonFileStore::new(dir.join("conversations"))?,
            messages: JsonFileStore::new(dir.join("messages"))?,
            memories: JsonFileStore::new(dir.join("memories"))?,
            telemetry: JsonFileStore::new(dir.join("telemetry"))?,
            feedback: JsonFileStore::new(dir.join("feedback"))?,
        })
    }

    // ── Conversations ─────────────────────────────────────────────

    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.conversations.insert(conversation)
    }

    pub fn conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        self.conversations.get(id)
    }

    /// Live conversations owned by one user, ordered by most recent
    /// activity (never-used conversations last), then newest first.
    pub fn conversations_for(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        filter: &ConversationFilter,
    ) -> Result<Vec<Conversation>, StoreError> {
        let mut rows = self.conversations.filter(|c| {
            c.tenant_id == tenant_id
                && c.user_id == user_id
                && !c.is_deleted()
                && filter.status.is_none_or(|s| c.status == s)
                && filter.project_id.is_none_or(|p| c.project_id == Some(p))
        })?;
        rows.sort_by(|a, b| {
            match (a.last_message_at, b.last_message_at) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(rows)
    }

    pub fn update_conversation<M>(&self, id: Uuid, mutate: M) -> Result<Option<Conversation>, StoreError>
    where
        M: FnOnce(&mut Conversation),
    {
        self.conversations.update(id, |c| {
            mutate(c);
            c.updated_at = Utc::now();
        })
    }

    /// Count one more message and stamp activity. Returns the new count.
    pub fn bump_message_count(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<u64>, StoreError> {
        Ok(self
            .update_conversation(id, |c| {
                c.message_count += 1;
                c.last_message_at = Some(at);
            })?
            .map(|c| c.message_count))
    }

    // ── Messages ──────────────────────────────────────────────────

    pub fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        self.messages.insert(message)
    }

    pub fn message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.messages.get(id)
    }

    pub fn update_message<M>(&self, id: Uuid, mutate: M) -> Result<Option<Message>, StoreError>
    where
        M: FnOnce(&mut Message),
    {
        self.messages.update(id, mutate)
    }

    /// All messages of a conversation, oldest first. A user message sorts
    /// before the agent reply created in the same instant.
    pub fn messages_for(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.messages.filter(|m| m.conversation_id == conversation_id)?;
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.sender_type.cmp(&b.sender_type))
        });
        Ok(messages)
    }

    /// The newest `limit` messages, oldest first.
    pub fn recent_messages(&self, conversation_id: Uuid, limit: usize) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.messages_for(conversation_id)?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    // ── Memory ────────────────────────────────────────────────────

    pub fn insert_memory(&self, memory: &ConversationMemory) -> Result<(), StoreError> {
        self.memories.insert(memory)
    }

    pub fn latest_memory(&self, conversation_id: Uuid) -> Result<Option<ConversationMemory>, StoreError> {
        Ok(self
            .memories
            .filter(|m| m.conversation_id == conversation_id)?
            .into_iter()
            .max_by_key(|m| m.created_at))
    }

    // ── Telemetry & feedback ──────────────────────────────────────

    pub fn record_telemetry(&self, row: &AgentTelemetry) -> Result<(), StoreError> {
        self.telemetry.insert(row)
    }

    /// Telemetry rows for a tenant, newest first.
    pub fn telemetry_for(&self, tenant_id: Uuid) -> Result<Vec<AgentTelemetry>, StoreError> {
        let mut rows = self.telemetry.filter(|t| t.tenant_id == tenant_id)?;
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(rows)
    }

    pub fn insert_feedback(&self, feedback: &AgentFeedback) -> Result<(), StoreError> {
        self.feedback.insert(feedback)
    }

    /// Feedback for a tenant created at or after `since`, newest first.
    pub fn feedback_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
        agent_id: Option<&str>,
    ) -> Result<Vec<AgentFeedback>, StoreError> {
        let mut rows = self.feedback.filter(|f| {
            f.tenant_id == tenant_id
                && f.created_at >= since
                && agent_id.is_none_or(|a| f.agent_id.as_deref() == Some(a))
        })?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

impl ConversationDirectory for ChatStore {
    /// Deleted conversations have no owner: their proposals can no longer
    /// be acted on.
    fn conversation_owner(&self, conversation_id: Uuid) -> Result<Option<ConversationOwner>, ProposalError> {
        Ok(self
            .conversations
            .get(conversation_id)?
            .filter(|c| !c.is_deleted())
            .map(|c| ConversationOwner {
                conversation_id: c.id,
                tenant_id: c.tenant_id,
                user_id: c.user_id,
            }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    pub(crate) fn conversation(tenant: Uuid, user: Uuid) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            user_id: user,
            project_id: None,
            title: None,
            context: serde_json::json!({}),
            status: ConversationStatus::Active,
            message_count: 0,
            last_message_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn conversations_order_by_activity_then_age() {
        let dir = tempdir().unwrap();
        let store = ChatStore::open(dir.path()).unwrap();
        let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        let idle_old = Conversation { created_at: now - Duration::hours(3), ..conversation(tenant, user) };
        let idle_new = Conversation { created_at: now - Duration::hours(1), ..conversation(tenant, user) };
        let busy = Conversation { last_message_at: Some(now), created_at: now - Duration::hours(5), ..conversation(tenant, user) };
        let archived = Conversation { status: ConversationStatus::Archived, ..conversation(tenant, user) };
        let deleted = Conversation { deleted_at: Some(now), ..conversation(tenant, user) };
        let foreign = conversation(tenant, Uuid::new_v4());
        for c in [&idle_old, &idle_new, &busy, &archived, &deleted, &foreign] {
            store.insert_conversation(c).unwrap();
        }

        let filter = ConversationFilter { status: Some(ConversationStatus::Active), project_id: None };
        let ids: Vec<_> = store
            .conversations_for(tenant, user, &filter)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![busy.id, idle_new.id, idle_old.id]);
    }

    #[test]
    fn bump_counts_and_stamps_activity() {
        let dir = tempdir().unwrap();
        let store = ChatStore::open(dir.path()).unwrap();
        let c = conversation(Uuid::new_v4(), Uuid::new_v4());
        store.insert_conversation(&c).unwrap();

        let at = Utc::now();
        assert_eq!(store.bump_message_count(c.id, at).unwrap(), Some(1));
        assert_eq!(store.bump_message_count(c.id, at).unwrap(), Some(2));
        assert_eq!(store.conversation(c.id).unwrap().unwrap().last_message_at, Some(at));
        assert_eq!(store.bump_message_count(Uuid::new_v4(), at).unwrap(), None);
    }

    #[test]
    fn recent_messages_keeps_newest_in_order() {
        let dir = tempdir().unwrap();
        let store = ChatStore::open(dir.path()).unwrap();
        let conversation_id = Uuid::new_v4();
        let start = Utc::now();
        for i in 0..5 {
            let mut m = Message::from_user(conversation_id, format!("m{}", i), vec![]);
            m.created_at = start + Duration::seconds(i);
            store.insert_message(&m).unwrap();
        }
        let contents: Vec<_> = store
            .recent_messages(conversation_id, 3)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn deleted_conversations_have_no_owner() {
        let dir = tempdir().unwrap();
        let store = ChatStore::open(dir.path()).unwrap();
        let c = conversation(Uuid::new_v4(), Uuid::new_v4());
        store.insert_conversation(&c).unwrap();
        assert_eq!(store.conversation_owner(c.id).unwrap().unwrap().user_id, c.user_id);

        store.update_conversation(c.id, |c| c.deleted_at = Some(Utc::now())).unwrap();
        assert!(store.conversation_owner(c.id).unwrap().is_none());
    }
}
