//! # dt-chat
//!
//! The conversation layer of DevTel Copilot.
//!
//! A user talks to the agent service through [`ChatService`]. Each message
//! is stored immediately together with a streaming placeholder for the
//! reply; the agent round-trip then runs in the background and completes
//! the placeholder, publishing the result on the [`EventHub`]. Actions the
//! agent suggests become pending proposals in
//! [`dt_proposals::ProposalEngine`].
//!
//! [`ChatStore`] persists conversations, messages, summaries, telemetry
//! and feedback, and answers conversation ownership for the proposal
//! engine.

pub mod agent;
pub mod context;
pub mod error;
pub mod feedback;
pub mod hub;
pub mod model;
pub mod service;
pub mod store;

pub use agent::{
    AgentClientConfig, AgentProposal, AgentReply, AgentService, HttpAgentClient, ProcessRequest,
    TranscriptEntry, DEFAULT_AGENT_TIMEOUT, DEFAULT_AGENT_URL,
};
pub use context::{AgentContext, ContextBuilder, ResolvedEntity};
pub use error::{AgentError, ChatError};
pub use feedback::{AgentFeedbackStats, CategoryCount, FeedbackSummary};
pub use hub::{EventHub, StreamEvent, DEFAULT_HUB_CAPACITY};
pub use model::{
    AgentFeedback, AgentTelemetry, ContentType, Conversation, ConversationMemory,
    ConversationStatus, MentionedEntity, Message, MessageMetadata, SenderType,
};
pub use service::{
    ChatService, ConversationDetail, ConversationPage, ConversationQuery, ConversationUpdate,
    FeedbackInput, FeedbackQuery, MessageQuery, NewConversation, SendMessage, SentMessage,
};
pub use store::{ChatStore, ConversationFilter};
