// hub.rs — In-process publish/subscribe for conversation updates.
//
// Clients never wait on the agent round-trip; they subscribe and filter
// by conversation id. Proposal lifecycle events arrive here through the
// engine's notification sink interface.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use dt_proposals::{NotificationSink, ProposalError, ProposalEvent};

use crate::model::Message;

pub const DEFAULT_HUB_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// An agent reply finished, successfully or with an apology.
    MessageCompleted {
        conversation_id: Uuid,
        message: Message,
    },
    TitleUpdated {
        conversation_id: Uuid,
        title: String,
    },
    Proposal(ProposalEvent),
}

impl StreamEvent {
    pub fn conversation_id(&self) -> Uuid {
        match self {
            StreamEvent::MessageCompleted { conversation_id, .. }
            | StreamEvent::TitleUpdated { conversation_id, .. } => *conversation_id,
            StreamEvent::Proposal(event) => event.conversation_id(),
        }
    }

    /// Event name used on the wire (the SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::MessageCompleted { .. } => "message_completed",
            StreamEvent::TitleUpdated { .. } => "title_updated",
            StreamEvent::Proposal(event) => event.event_type(),
        }
    }
}

#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<StreamEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to every current subscriber. Having none is not an error.
    pub fn publish(&self, event: StreamEvent) {
        let name = event.name();
        let conversation_id = event.conversation_id();
        if self.sender.send(event).is_err() {
            tracing::debug!(event = name, %conversation_id, "no stream subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }
}

impl NotificationSink for EventHub {
    fn send(&self, event: &ProposalEvent) -> Result<(), ProposalError> {
        self.publish(StreamEvent::Proposal(event.clone()));
        Ok(())
    }
}
