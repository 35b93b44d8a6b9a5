// service.rs — ChatService: conversations, messages and the agent round-trip.
//
// `send_message` persists the user's message and an empty streaming
// placeholder, then returns. The agent round-trip runs as a detached task:
// build context, call the agent, create any proposals it returned, fill
// in the placeholder, record telemetry, and maybe refresh the summary.
// Any failure in that task turns the placeholder into an apology; nothing
// propagates back to the caller, who learns about completion from the
// event hub.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use dt_actions::DevtelBackend;
use dt_proposals::{Actor, NewProposal, Permission, ProposalEngine};

use crate::agent::{AgentProposal, AgentService, ProcessRequest, TranscriptEntry};
use crate::context::ContextBuilder;
use crate::error::ChatError;
use crate::feedback::{self, FeedbackSummary};
use crate::hub::{EventHub, StreamEvent};
use crate::model::{
    fallback_title, AgentFeedback, AgentTelemetry, Conversation, ConversationMemory,
    ConversationStatus, MentionedEntity, Message, SenderType,
};
use crate::store::{ChatStore, ConversationFilter};

/// A summary is refreshed each time the message count reaches a multiple of this.
pub const SUMMARY_INTERVAL: u64 = 10;
/// How many of the most recent messages a summary covers.
pub const SUMMARY_WINDOW: usize = 50;
/// Below this many messages there is nothing worth summarizing.
pub const MIN_MESSAGES_TO_SUMMARIZE: usize = 10;
/// Default look-back for the feedback summary.
pub const FEEDBACK_LOOKBACK_DAYS: i64 = 30;

const DEFAULT_AGENT_NAME: &str = "chat-agent";
const CHAT_TASK: &str = "chat_response";

// ── Requests and responses ────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewConversation {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// Fields left `None` are unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<ConversationStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationQuery {
    #[serde(default = "default_query_status")]
    pub status: Option<ConversationStatus>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default = "default_conversation_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_query_status() -> Option<ConversationStatus> {
    Some(ConversationStatus::Active)
}

fn default_conversation_limit() -> usize {
    50
}

impl Default for ConversationQuery {
    fn default() -> Self {
        Self {
            status: default_query_status(),
            project_id: None,
            limit: default_conversation_limit(),
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationPage {
    pub rows: Vec<Conversation>,
    /// Matching conversations before paging.
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub content: String,
    #[serde(default)]
    pub mentioned_entities: Vec<MentionedEntity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentMessage {
    pub user_message: Message,
    /// Still streaming; completed by the background round-trip.
    pub agent_message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_message_limit")]
    pub limit: usize,
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
}

fn default_message_limit() -> usize {
    100
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            limit: default_message_limit(),
            before: None,
            after: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackInput {
    pub rating: u8,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackQuery {
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Handles to the detached work started by one `send_message`.
pub(crate) struct BackgroundWork {
    pub(crate) processing: JoinHandle<()>,
    pub(crate) title: Option<JoinHandle<()>>,
}

// ── Service ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChatService {
    store: Arc<ChatStore>,
    engine: Arc<ProposalEngine>,
    agent: Arc<dyn AgentService>,
    context: ContextBuilder,
    hub: EventHub,
    tool_sets: Arc<BTreeMap<String, Vec<String>>>,
}

impl ChatService {
    pub fn new(
        store: Arc<ChatStore>,
        engine: Arc<ProposalEngine>,
        agent: Arc<dyn AgentService>,
        devtel: Arc<dyn DevtelBackend>,
        hub: EventHub,
    ) -> Self {
        Self {
            context: ContextBuilder::new(store.clone(), devtel),
            store,
            engine,
            agent,
            hub,
            tool_sets: Arc::new(BTreeMap::new()),
        }
    }

    /// Tool sets each agent may use, forwarded with every chat turn.
    pub fn with_tool_sets(mut self, tool_sets: BTreeMap<String, Vec<String>>) -> Self {
        self.tool_sets = Arc::new(tool_sets);
        self
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<ProposalEngine> {
        &self.engine
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    // ── Conversations ─────────────────────────────────────────────

    pub fn list_conversations(
        &self,
        actor: &Actor,
        query: &ConversationQuery,
    ) -> Result<ConversationPage, ChatError> {
        self.require(actor, Permission::ConversationRead)?;
        let filter = ConversationFilter {
            status: query.status,
            project_id: query.project_id,
        };
        let all = self
            .store
            .conversations_for(actor.tenant_id, actor.user_id, &filter)?;
        let count = all.len();
        let rows = all.into_iter().skip(query.offset).take(query.limit).collect();
        Ok(ConversationPage { rows, count })
    }

    pub fn create_conversation(
        &self,
        actor: &Actor,
        new: NewConversation,
    ) -> Result<Conversation, ChatError> {
        self.require(actor, Permission::ConversationEdit)?;
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            tenant_id: actor.tenant_id,
            user_id: actor.user_id,
            project_id: new.project_id,
            title: new.title.filter(|t| !t.trim().is_empty()),
            context: new.context.unwrap_or_else(|| serde_json::json!({})),
            status: ConversationStatus::Active,
            message_count: 0,
            last_message_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.store.insert_conversation(&conversation)?;
        tracing::info!(conversation_id = %conversation.id, user_id = %actor.user_id, "conversation created");
        Ok(conversation)
    }

    pub fn get_conversation(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        include_messages: bool,
    ) -> Result<ConversationDetail, ChatError> {
        self.require(actor, Permission::ConversationRead)?;
        let conversation = self.owned_conversation(actor, conversation_id)?;
        let messages = if include_messages {
            Some(self.store.messages_for(conversation_id)?)
        } else {
            None
        };
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    }

    pub fn update_conversation(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        update: ConversationUpdate,
    ) -> Result<Conversation, ChatError> {
        self.require(actor, Permission::ConversationEdit)?;
        self.owned_conversation(actor, conversation_id)?;
        self.store
            .update_conversation(conversation_id, |c| {
                if let Some(title) = update.title {
                    c.title = Some(title);
                }
                if let Some(context) = update.context {
                    c.context = context;
                }
                if let Some(status) = update.status {
                    c.status = status;
                }
            })?
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))
    }

    /// Archive and soft-delete. Messages are kept.
    pub fn delete_conversation(&self, actor: &Actor, conversation_id: Uuid) -> Result<(), ChatError> {
        self.require(actor, Permission::ConversationEdit)?;
        self.owned_conversation(actor, conversation_id)?;
        self.store.update_conversation(conversation_id, |c| {
            c.status = ConversationStatus::Archived;
            c.deleted_at = Some(Utc::now());
        })?;
        tracing::info!(conversation_id = %conversation_id, "conversation archived");
        Ok(())
    }

    // ── Messages ──────────────────────────────────────────────────

    /// Persist a user message and start the agent round-trip in the
    /// background. Returns without waiting for the agent.
    pub async fn send_message(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        input: SendMessage,
    ) -> Result<SentMessage, ChatError> {
        let (sent, _work) = self.submit(actor, conversation_id, input)?;
        Ok(sent)
    }

    pub(crate) fn submit(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        input: SendMessage,
    ) -> Result<(SentMessage, BackgroundWork), ChatError> {
        self.require(actor, Permission::ConversationEdit)?;
        if input.content.trim().is_empty() {
            return Err(ChatError::InvalidInput("message content is empty".into()));
        }
        let conversation = self.owned_conversation(actor, conversation_id)?;

        let user_message = Message::from_user(conversation_id, input.content, input.mentioned_entities);
        self.store.insert_message(&user_message)?;
        let count = self
            .store
            .bump_message_count(conversation_id, user_message.created_at)?
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))?;

        let title = (conversation.message_count == 0 && conversation.title.is_none()).then(|| {
            tokio::spawn(
                self.clone()
                    .generate_title(conversation_id, user_message.content.clone()),
            )
        });

        let placeholder = Message::placeholder(conversation_id);
        self.store.insert_message(&placeholder)?;

        let processing = tokio::spawn(self.clone().process(
            actor.clone(),
            conversation_id,
            user_message.clone(),
            placeholder.id,
            count,
        ));

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %user_message.id,
            message_count = count,
            "message accepted"
        );
        Ok((
            SentMessage {
                user_message,
                agent_message: placeholder,
            },
            BackgroundWork { processing, title },
        ))
    }

    /// Messages oldest first, at most `limit`, optionally bounded by time
    /// (both bounds exclusive).
    pub fn get_messages(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, ChatError> {
        self.require(actor, Permission::ConversationRead)?;
        self.owned_conversation(actor, conversation_id)?;
        Ok(self
            .store
            .messages_for(conversation_id)?
            .into_iter()
            .filter(|m| query.before.is_none_or(|b| m.created_at < b))
            .filter(|m| query.after.is_none_or(|a| m.created_at > a))
            .take(query.limit)
            .collect())
    }

    /// Accepted for clients that want to stop listening. The background
    /// agent task is not interrupted.
    pub fn cancel_stream(&self, actor: &Actor, conversation_id: Uuid) -> Result<(), ChatError> {
        self.require(actor, Permission::ConversationRead)?;
        self.owned_conversation(actor, conversation_id)?;
        tracing::info!(conversation_id = %conversation_id, "stream cancel requested; in-flight agent work continues");
        Ok(())
    }

    // ── Feedback ──────────────────────────────────────────────────

    pub fn submit_feedback(
        &self,
        actor: &Actor,
        message_id: Uuid,
        input: FeedbackInput,
    ) -> Result<AgentFeedback, ChatError> {
        self.require(actor, Permission::ConversationEdit)?;
        if !(1..=5).contains(&input.rating) {
            return Err(ChatError::InvalidInput(format!(
                "rating must be between 1 and 5, got {}",
                input.rating
            )));
        }
        let message = self
            .store
            .message(message_id)?
            .filter(|m| m.sender_type == SenderType::Agent)
            .ok_or(ChatError::NotFound {
                entity: "agent message",
                id: message_id,
            })?;
        self.owned_conversation(actor, message.conversation_id)?;

        let feedback = AgentFeedback {
            id: Uuid::new_v4(),
            message_id,
            user_id: actor.user_id,
            tenant_id: actor.tenant_id,
            agent_id: message.agent_id,
            rating: input.rating,
            categories: input.categories,
            comment: input.comment.filter(|c| !c.trim().is_empty()),
            created_at: Utc::now(),
        };
        self.store.insert_feedback(&feedback)?;
        self.store
            .update_message(message_id, |m| m.feedback_rating = Some(input.rating))?;
        Ok(feedback)
    }

    pub fn feedback_summary(
        &self,
        actor: &Actor,
        query: &FeedbackQuery,
    ) -> Result<FeedbackSummary, ChatError> {
        self.require(actor, Permission::ConversationRead)?;
        let since = query
            .start_date
            .unwrap_or_else(|| Utc::now() - Duration::days(FEEDBACK_LOOKBACK_DAYS));
        let rows = self
            .store
            .feedback_since(actor.tenant_id, since, query.agent_id.as_deref())?;
        Ok(feedback::summarize(&rows))
    }

    // ── Background work ───────────────────────────────────────────

    async fn process(
        self,
        actor: Actor,
        conversation_id: Uuid,
        user_message: Message,
        placeholder_id: Uuid,
        message_count: u64,
    ) {
        let started = Instant::now();
        match self
            .round_trip(&actor, conversation_id, &user_message, placeholder_id, started)
            .await
        {
            Ok(turn) => {
                self.record_telemetry(
                    &actor,
                    &turn.agent_name,
                    started,
                    turn.tokens_used,
                    None,
                    conversation_id,
                    user_message.id,
                );
                // Either increment of this turn may land on the interval.
                if summary_due(message_count) || turn.message_count.is_some_and(summary_due) {
                    if let Err(e) = self.summarize(conversation_id).await {
                        tracing::warn!(conversation_id = %conversation_id, "background summarization failed: {}", e);
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    message_id = %placeholder_id,
                    "agent processing failed: {}",
                    e
                );
                self.record_telemetry(
                    &actor,
                    DEFAULT_AGENT_NAME,
                    started,
                    None,
                    Some(e.to_string()),
                    conversation_id,
                    user_message.id,
                );
                self.fail_placeholder(conversation_id, placeholder_id, &e.to_string());
            }
        }
    }

    async fn round_trip(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        user_message: &Message,
        placeholder_id: Uuid,
        started: Instant,
    ) -> Result<CompletedTurn, ChatError> {
        let conversation = self
            .store
            .conversation(conversation_id)?
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))?;
        let context = self.context.build(&conversation, actor, user_message)?;

        let request = ProcessRequest {
            conversation_id,
            message_id: user_message.id,
            content: user_message.content.clone(),
            context,
            user_id: actor.user_id,
            tenant_id: actor.tenant_id,
            agent_tool_sets: self.tool_sets.as_ref().clone(),
        };
        let reply = self.agent.process(&request).await?;

        let agent_name = reply
            .agent_id
            .clone()
            .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string());
        let proposal_ids =
            self.create_proposals(actor, conversation_id, placeholder_id, &agent_name, reply.proposals);

        let now = Utc::now();
        let duration_ms = started.elapsed().as_millis() as u64;
        let tokens_used = reply.tokens_used;
        let message = self
            .store
            .update_message(placeholder_id, |m| {
                m.content = reply.content;
                m.agent_id = reply.agent_id;
                m.is_streaming = false;
                m.stream_completed_at = Some(now);
                m.tokens_used = tokens_used;
                m.duration_ms = Some(duration_ms);
                m.metadata.proposal_ids = proposal_ids;
            })?
            .ok_or(ChatError::NotFound {
                entity: "message",
                id: placeholder_id,
            })?;
        // The reply is already stored, so a counter failure must not turn it
        // into an apology.
        let message_count = match self.store.bump_message_count(conversation_id, now) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, "failed to count agent reply: {}", e);
                None
            }
        };

        self.hub.publish(StreamEvent::MessageCompleted {
            conversation_id,
            message,
        });
        Ok(CompletedTurn {
            agent_name,
            tokens_used,
            message_count,
        })
    }

    /// Create a pending proposal for each agent suggestion that validates.
    fn create_proposals(
        &self,
        actor: &Actor,
        conversation_id: Uuid,
        message_id: Uuid,
        agent_name: &str,
        proposals: Vec<AgentProposal>,
    ) -> Vec<Uuid> {
        let mut created = Vec::with_capacity(proposals.len());
        for suggestion in proposals {
            let action_type = suggestion.action_type.clone();
            let new = NewProposal {
                conversation_id,
                message_id: Some(message_id),
                agent_id: suggestion.agent_id.unwrap_or_else(|| agent_name.to_string()),
                action_type: suggestion.action_type,
                parameters: suggestion.parameters,
                reasoning: suggestion.reasoning,
                affected_entities: suggestion.affected_entities,
                confidence_score: suggestion.confidence_score,
            };
            match self.engine.create_proposal(actor, new) {
                Ok(proposal) => created.push(proposal.id),
                Err(e) => tracing::warn!(
                    conversation_id = %conversation_id,
                    action_type = %action_type,
                    "skipping agent proposal: {}",
                    e
                ),
            }
        }
        created
    }

    fn fail_placeholder(&self, conversation_id: Uuid, placeholder_id: Uuid, error: &str) {
        let content = format!(
            "I apologize, but I encountered an error while processing your request: {}\n\nPlease try again or rephrase your question.",
            error
        );
        let updated = self.store.update_message(placeholder_id, |m| {
            m.content = content;
            m.is_streaming = false;
            m.stream_completed_at = Some(Utc::now());
            m.metadata.error = true;
            m.metadata.error_message = Some(error.to_string());
        });
        match updated {
            Ok(Some(message)) => self.hub.publish(StreamEvent::MessageCompleted {
                conversation_id,
                message,
            }),
            Ok(None) => tracing::error!(message_id = %placeholder_id, "placeholder message vanished"),
            Err(e) => tracing::error!(message_id = %placeholder_id, "failed to store apology: {}", e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_telemetry(
        &self,
        actor: &Actor,
        agent_name: &str,
        started: Instant,
        tokens_used: Option<u64>,
        error_message: Option<String>,
        conversation_id: Uuid,
        message_id: Uuid,
    ) {
        let row = AgentTelemetry {
            id: Uuid::new_v4(),
            tenant_id: actor.tenant_id,
            agent_name: agent_name.to_string(),
            task_type: CHAT_TASK.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            tokens_used,
            success: error_message.is_none(),
            error_message,
            metadata: serde_json::json!({
                "conversation_id": conversation_id,
                "message_id": message_id,
            }),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.record_telemetry(&row) {
            tracing::warn!(conversation_id = %conversation_id, "failed to record agent telemetry: {}", e);
        }
    }

    /// Ask the agent for a title; fall back to the message itself.
    async fn generate_title(self, conversation_id: Uuid, first_message: String) {
        let title = match self.agent.generate_title(&first_message).await {
            Ok(Some(title)) if !title.trim().is_empty() => title.trim().to_string(),
            Ok(_) => fallback_title(&first_message),
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, "title generation failed: {}", e);
                fallback_title(&first_message)
            }
        };

        let mut applied = false;
        let result = self.store.update_conversation(conversation_id, |c| {
            if c.title.is_none() {
                c.title = Some(title.clone());
                applied = true;
            }
        });
        match result {
            Ok(_) if applied => self.hub.publish(StreamEvent::TitleUpdated {
                conversation_id,
                title,
            }),
            Ok(_) => {}
            Err(e) => tracing::warn!(conversation_id = %conversation_id, "failed to store title: {}", e),
        }
    }

    async fn summarize(&self, conversation_id: Uuid) -> Result<(), ChatError> {
        let messages = self.store.recent_messages(conversation_id, SUMMARY_WINDOW)?;
        if messages.len() < MIN_MESSAGES_TO_SUMMARIZE {
            tracing::debug!(conversation_id = %conversation_id, count = messages.len(), "too few messages to summarize");
            return Ok(());
        }
        let transcript: Vec<TranscriptEntry> = messages
            .into_iter()
            .map(|m| TranscriptEntry {
                role: m.sender_type.transcript_role().to_string(),
                content: m.content,
            })
            .collect();

        let Some(summary) = self
            .agent
            .summarize(&transcript)
            .await?
            .filter(|s| !s.trim().is_empty())
        else {
            return Ok(());
        };
        self.store.insert_memory(&ConversationMemory {
            id: Uuid::new_v4(),
            conversation_id,
            summary,
            key_decisions: Vec::new(),
            action_items: Vec::new(),
            created_at: Utc::now(),
        })?;
        tracing::info!(conversation_id = %conversation_id, "conversation summary updated");
        Ok(())
    }

    // ── Access ────────────────────────────────────────────────────

    fn require(&self, actor: &Actor, permission: Permission) -> Result<(), ChatError> {
        if self.engine.permissions().has_permission(actor, permission) {
            Ok(())
        } else {
            Err(ChatError::AccessDenied {
                user_id: actor.user_id,
                reason: format!("missing permission {:?}", permission),
            })
        }
    }

    /// Missing, deleted or foreign-tenant conversations are `NotFound`;
    /// another user's conversation is `AccessDenied`.
    fn owned_conversation(&self, actor: &Actor, conversation_id: Uuid) -> Result<Conversation, ChatError> {
        let conversation = self
            .store
            .conversation(conversation_id)?
            .filter(|c| c.tenant_id == actor.tenant_id && !c.is_deleted())
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))?;
        if conversation.user_id != actor.user_id {
            return Err(ChatError::AccessDenied {
                user_id: actor.user_id,
                reason: format!("conversation {} belongs to another user", conversation_id),
            });
        }
        Ok(conversation)
    }
}

struct CompletedTurn {
    agent_name: String,
    tokens_used: Option<u64>,
    /// Conversation count after the reply was counted, if that succeeded.
    message_count: Option<u64>,
}

fn summary_due(message_count: u64) -> bool {
    message_count > 0 && message_count % SUMMARY_INTERVAL == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentReply;
    use crate::error::AgentError;
    use async_trait::async_trait;
    use dt_actions::{ActionRegistry, JsonDevtelBackend};
    use dt_proposals::{ProposalStatus, RolePermissions};
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeAgent {
        fail_process: bool,
        title: Option<String>,
        proposals: Vec<AgentProposal>,
        requests: Mutex<Vec<ProcessRequest>>,
        summarize_calls: Mutex<Vec<usize>>,
        /// Overwritten with garbage while the next request is in flight.
        corrupt_during_process: Mutex<Option<PathBuf>>,
    }

    #[async_trait]
    impl AgentService for FakeAgent {
        async fn process(&self, request: &ProcessRequest) -> Result<AgentReply, AgentError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(path) = self.corrupt_during_process.lock().unwrap().take() {
                std::fs::write(path, "{ not json").unwrap();
            }
            if self.fail_process {
                return Err(AgentError::Unavailable("connection refused".into()));
            }
            Ok(AgentReply {
                content: format!("You said: {}", request.content),
                agent_id: Some("planner".into()),
                proposals: self.proposals.clone(),
                tokens_used: Some(42),
            })
        }

        async fn generate_title(&self, _message: &str) -> Result<Option<String>, AgentError> {
            self.title
                .clone()
                .map(Some)
                .ok_or_else(|| AgentError::Unavailable("no titles today".into()))
        }

        async fn summarize(&self, messages: &[TranscriptEntry]) -> Result<Option<String>, AgentError> {
            self.summarize_calls.lock().unwrap().push(messages.len());
            Ok(Some(format!("{} messages discussed", messages.len())))
        }
    }

    struct Harness {
        _dir: TempDir,
        service: ChatService,
        agent: Arc<FakeAgent>,
        owner: Actor,
    }

    fn harness(agent: FakeAgent) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ChatStore::open(dir.path().join("chat")).unwrap());
        let devtel = Arc::new(JsonDevtelBackend::open(dir.path().join("devtel")).unwrap());
        let hub = EventHub::new(64);
        let mut engine = ProposalEngine::open(
            dir.path(),
            ActionRegistry::new(devtel.clone()),
            store.clone(),
            Arc::new(RolePermissions::default()),
        )
        .unwrap();
        engine.add_sink(Box::new(hub.clone()));

        let agent = Arc::new(agent);
        let service = ChatService::new(store, Arc::new(engine), agent.clone(), devtel, hub)
            .with_tool_sets(BTreeMap::from([("planner".to_string(), vec!["issues".to_string()])]));
        Harness {
            _dir: dir,
            service,
            agent,
            owner: Actor::new(Uuid::new_v4(), Uuid::new_v4()).with_name("Sam"),
        }
    }

    impl Harness {
        fn conversation(&self) -> Conversation {
            self.service
                .create_conversation(&self.owner, NewConversation::default())
                .unwrap()
        }

        async fn send(&self, conversation_id: Uuid, content: &str) -> SentMessage {
            let (sent, work) = self
                .service
                .submit(
                    &self.owner,
                    conversation_id,
                    SendMessage {
                        content: content.to_string(),
                        mentioned_entities: vec![],
                    },
                )
                .unwrap();
            work.processing.await.unwrap();
            if let Some(title) = work.title {
                title.await.unwrap();
            }
            sent
        }

        fn message(&self, id: Uuid) -> Message {
            self.service.store.message(id).unwrap().unwrap()
        }

        /// Give a conversation `count` prior messages, spaced in the past.
        fn seed(&self, conversation_id: Uuid, count: u64) {
            let start = Utc::now() - Duration::hours(1);
            for i in 0..count {
                let mut m = Message::from_user(conversation_id, format!("earlier {}", i), vec![]);
                m.created_at = start + Duration::seconds(i as i64);
                self.service.store.insert_message(&m).unwrap();
            }
            self.service
                .store
                .update_conversation(conversation_id, |c| {
                    c.message_count = count;
                    c.title = Some("seeded".into());
                })
                .unwrap();
        }
    }

    #[tokio::test]
    async fn send_returns_streaming_placeholder_then_completes() {
        let h = harness(FakeAgent {
            title: Some("Login bug triage".into()),
            ..FakeAgent::default()
        });
        let c = h.conversation();
        let mut events = h.service.hub().subscribe();

        let sent = h.send(c.id, "Who owns the login bug?").await;
        assert_eq!(sent.user_message.sender_type, SenderType::User);
        assert!(sent.agent_message.is_streaming);
        assert!(sent.agent_message.content.is_empty());

        let reply = h.message(sent.agent_message.id);
        assert!(!reply.is_streaming);
        assert!(reply.stream_completed_at.is_some());
        assert_eq!(reply.content, "You said: Who owns the login bug?");
        assert_eq!(reply.agent_id.as_deref(), Some("planner"));
        assert_eq!(reply.tokens_used, Some(42));

        let stored = h.service.store.conversation(c.id).unwrap().unwrap();
        assert_eq!(stored.message_count, 2);
        assert_eq!(stored.title.as_deref(), Some("Login bug triage"));

        let requests = h.agent.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].agent_tool_sets["planner"], vec!["issues".to_string()]);
        assert_eq!(requests[0].context.user.name.as_deref(), Some("Sam"));

        let telemetry = h.service.store.telemetry_for(h.owner.tenant_id).unwrap();
        assert_eq!(telemetry.len(), 1);
        assert!(telemetry[0].success);
        assert_eq!(telemetry[0].agent_name, "planner");
        assert_eq!(telemetry[0].task_type, "chat_response");

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert!(names.contains(&"message_completed"));
        assert!(names.contains(&"title_updated"));
    }

    #[tokio::test]
    async fn agent_failure_becomes_an_apology() {
        let h = harness(FakeAgent {
            fail_process: true,
            ..FakeAgent::default()
        });
        let c = h.conversation();

        let sent = h.send(c.id, "hello?").await;
        let reply = h.message(sent.agent_message.id);
        assert!(!reply.is_streaming);
        assert!(reply.stream_completed_at.is_some());
        assert!(reply
            .content
            .starts_with("I apologize, but I encountered an error while processing your request: "));
        assert!(reply.content.contains("connection refused"));
        assert!(reply
            .content
            .ends_with("\n\nPlease try again or rephrase your question."));
        assert!(reply.metadata.error);

        let telemetry = h.service.store.telemetry_for(h.owner.tenant_id).unwrap();
        assert_eq!(telemetry.len(), 1);
        assert!(!telemetry[0].success);
        assert_eq!(telemetry[0].agent_name, "chat-agent");
    }

    #[tokio::test]
    async fn title_falls_back_to_truncated_message() {
        let h = harness(FakeAgent::default());
        let c = h.conversation();
        let long = format!("{} tail that gets cut", "a".repeat(48));

        h.send(c.id, &long).await;
        let title = h.service.store.conversation(c.id).unwrap().unwrap().title.unwrap();
        assert_eq!(title, format!("{} t...", "a".repeat(48)));

        // Later messages leave the title alone.
        h.send(c.id, "second").await;
        let again = h.service.store.conversation(c.id).unwrap().unwrap().title.unwrap();
        assert_eq!(again, title);
    }

    #[tokio::test]
    async fn tenth_message_triggers_summary() {
        let h = harness(FakeAgent::default());
        let c = h.conversation();
        h.seed(c.id, 9);

        h.send(c.id, "the tenth").await;
        assert_eq!(h.agent.summarize_calls.lock().unwrap().clone(), vec![11]);
        let memory = h.service.store.latest_memory(c.id).unwrap().unwrap();
        assert_eq!(memory.summary, "11 messages discussed");
    }

    #[tokio::test]
    async fn reply_landing_on_tenth_triggers_summary() {
        let h = harness(FakeAgent::default());
        let c = h.conversation();
        h.seed(c.id, 8);

        h.send(c.id, "the ninth").await;
        assert_eq!(h.agent.summarize_calls.lock().unwrap().clone(), vec![10]);
        assert_eq!(h.service.store.conversation(c.id).unwrap().unwrap().message_count, 10);
    }

    #[tokio::test]
    async fn no_summary_between_intervals() {
        let h = harness(FakeAgent::default());
        let c = h.conversation();
        h.seed(c.id, 6);

        h.send(c.id, "seven and eight").await;
        assert!(h.agent.summarize_calls.lock().unwrap().is_empty());
        assert!(h.service.store.latest_memory(c.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn back_and_forth_conversation_is_summarized_every_ten_messages() {
        let h = harness(FakeAgent::default());
        let c = h.conversation();

        for i in 0..15 {
            h.send(c.id, &format!("question {}", i)).await;
            let calls = h.agent.summarize_calls.lock().unwrap().len();
            assert_eq!(calls, (i + 1) / 5, "after exchange {}", i + 1);
        }

        assert_eq!(h.service.store.conversation(c.id).unwrap().unwrap().message_count, 30);
        assert_eq!(h.agent.summarize_calls.lock().unwrap().clone(), vec![10, 20, 30]);
        let memory = h.service.store.latest_memory(c.id).unwrap().unwrap();
        assert_eq!(memory.summary, "30 messages discussed");
    }

    #[tokio::test]
    async fn counter_failure_keeps_the_agent_reply() {
        let h = harness(FakeAgent::default());
        let c = h
            .service
            .create_conversation(
                &h.owner,
                NewConversation {
                    title: Some("Release".into()),
                    ..NewConversation::default()
                },
            )
            .unwrap();
        let file = h
            ._dir
            .path()
            .join("chat/conversations")
            .join(format!("{}.json", c.id));
        *h.agent.corrupt_during_process.lock().unwrap() = Some(file);

        let sent = h.send(c.id, "status?").await;
        let reply = h.message(sent.agent_message.id);
        assert_eq!(reply.content, "You said: status?");
        assert!(!reply.is_streaming);
        assert!(!reply.metadata.error);

        let telemetry = h.service.store.telemetry_for(h.owner.tenant_id).unwrap();
        assert_eq!(telemetry.len(), 1);
        assert!(telemetry[0].success);
    }

    #[tokio::test]
    async fn invalid_agent_proposals_are_skipped() {
        let project = Uuid::new_v4();
        let h = harness(FakeAgent {
            title: Some("t".into()),
            proposals: vec![
                AgentProposal {
                    agent_id: None,
                    action_type: "create_issue".into(),
                    parameters: json!({ "projectId": project, "title": "Add retries" }),
                    reasoning: Some("flaky webhook".into()),
                    affected_entities: vec![],
                    confidence_score: Some(0.7),
                },
                AgentProposal {
                    agent_id: None,
                    action_type: "delete_project".into(),
                    parameters: json!({}),
                    reasoning: None,
                    affected_entities: vec![],
                    confidence_score: None,
                },
            ],
            ..FakeAgent::default()
        });
        let c = h.conversation();

        let sent = h.send(c.id, "file a ticket").await;
        let reply = h.message(sent.agent_message.id);
        assert_eq!(reply.metadata.proposal_ids.len(), 1);

        let pending = h
            .service
            .engine()
            .list_pending_proposals(&h.owner, c.id)
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, reply.metadata.proposal_ids[0]);
        assert_eq!(pending[0].agent_id, "planner");
        assert_eq!(pending[0].message_id, Some(reply.id));
        assert_eq!(pending[0].status, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn only_the_owner_can_send() {
        let h = harness(FakeAgent::default());
        let c = h.conversation();
        let colleague = Actor::new(h.owner.tenant_id, Uuid::new_v4());
        let input = SendMessage {
            content: "hi".into(),
            mentioned_entities: vec![],
        };

        assert!(matches!(
            h.service.send_message(&colleague, c.id, input.clone()).await,
            Err(ChatError::AccessDenied { .. })
        ));
        let outsider = Actor::new(Uuid::new_v4(), h.owner.user_id);
        assert!(matches!(
            h.service.send_message(&outsider, c.id, input).await,
            Err(ChatError::NotFound { .. })
        ));
        assert!(h.service.store.messages_for(c.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let h = harness(FakeAgent::default());
        let c = h.conversation();
        let err = h
            .service
            .send_message(
                &h.owner,
                c.id,
                SendMessage {
                    content: "   ".into(),
                    mentioned_entities: vec![],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn feedback_is_for_agent_messages_only() {
        let h = harness(FakeAgent {
            title: Some("t".into()),
            ..FakeAgent::default()
        });
        let c = h.conversation();
        let sent = h.send(c.id, "hello").await;

        assert!(matches!(
            h.service.submit_feedback(
                &h.owner,
                sent.user_message.id,
                FeedbackInput { rating: 5, categories: vec![], comment: None }
            ),
            Err(ChatError::NotFound { .. })
        ));
        assert!(matches!(
            h.service.submit_feedback(
                &h.owner,
                sent.agent_message.id,
                FeedbackInput { rating: 6, categories: vec![], comment: None }
            ),
            Err(ChatError::InvalidInput(_))
        ));

        let feedback = h
            .service
            .submit_feedback(
                &h.owner,
                sent.agent_message.id,
                FeedbackInput {
                    rating: 2,
                    categories: vec!["wrong".into()],
                    comment: Some("not helpful".into()),
                },
            )
            .unwrap();
        assert_eq!(feedback.agent_id.as_deref(), Some("planner"));
        assert_eq!(h.message(sent.agent_message.id).feedback_rating, Some(2));

        let summary = h
            .service
            .feedback_summary(&h.owner, &FeedbackQuery::default())
            .unwrap();
        assert_eq!(summary.by_agent[0].total_feedback, 1);
        assert_eq!(summary.by_agent[0].approval_rate, 0);
        assert_eq!(summary.recent_negative.len(), 1);
    }

    #[tokio::test]
    async fn conversation_crud() {
        let h = harness(FakeAgent {
            title: Some("t".into()),
            ..FakeAgent::default()
        });
        let c = h.conversation();
        h.send(c.id, "first").await;

        let detail = h.service.get_conversation(&h.owner, c.id, true).unwrap();
        assert_eq!(detail.messages.as_ref().unwrap().len(), 2);
        assert_eq!(detail.messages.unwrap()[0].sender_type, SenderType::User);

        let renamed = h
            .service
            .update_conversation(
                &h.owner,
                c.id,
                ConversationUpdate {
                    title: Some("Renamed".into()),
                    ..ConversationUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(renamed.title.as_deref(), Some("Renamed"));

        let page = h
            .service
            .list_conversations(&h.owner, &ConversationQuery::default())
            .unwrap();
        assert_eq!(page.count, 1);

        h.service.delete_conversation(&h.owner, c.id).unwrap();
        assert!(matches!(
            h.service.get_conversation(&h.owner, c.id, false),
            Err(ChatError::NotFound { .. })
        ));
        assert_eq!(
            h.service
                .list_conversations(&h.owner, &ConversationQuery::default())
                .unwrap()
                .count,
            0
        );
        // Messages survive the soft delete.
        assert_eq!(h.service.store.messages_for(c.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancel_stream_is_accepted_without_effect() {
        let h = harness(FakeAgent::default());
        let c = h.conversation();
        h.service.cancel_stream(&h.owner, c.id).unwrap();
        assert!(matches!(
            h.service.cancel_stream(&h.owner, Uuid::new_v4()),
            Err(ChatError::NotFound { .. })
        ));
    }
}
