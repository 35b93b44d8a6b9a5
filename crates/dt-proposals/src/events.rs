// events.rs — Lifecycle events and notification dispatch.
//
// The engine emits one event per transition. Sinks decide what to do with
// them: the JSONL log sink keeps a local record, the daemon's broadcast
// sink feeds the per-conversation event stream. Sink failures are logged
// and never fail the transition that produced the event.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dt_audit::ExecutedAction;

use crate::error::ProposalError;
use crate::proposal::ActionProposal;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ProposalEvent {
    ProposalCreated {
        conversation_id: Uuid,
        proposal: ActionProposal,
        timestamp: DateTime<Utc>,
    },
    /// Approved and run; `execution.status` says whether it succeeded.
    ProposalExecuted {
        conversation_id: Uuid,
        proposal_id: Uuid,
        execution: ExecutedAction,
        timestamp: DateTime<Utc>,
    },
    ProposalRejected {
        conversation_id: Uuid,
        proposal_id: Uuid,
        reason: Option<String>,
        rejected_by: Uuid,
        timestamp: DateTime<Utc>,
    },
    ProposalModified {
        conversation_id: Uuid,
        original_id: Uuid,
        proposal: ActionProposal,
        timestamp: DateTime<Utc>,
    },
    ActionReverted {
        conversation_id: Uuid,
        action_id: Uuid,
        reverted_by: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl ProposalEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProposalEvent::ProposalCreated { .. } => "proposal_created",
            ProposalEvent::ProposalExecuted { .. } => "proposal_executed",
            ProposalEvent::ProposalRejected { .. } => "proposal_rejected",
            ProposalEvent::ProposalModified { .. } => "proposal_modified",
            ProposalEvent::ActionReverted { .. } => "action_reverted",
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        match self {
            ProposalEvent::ProposalCreated { conversation_id, .. }
            | ProposalEvent::ProposalExecuted { conversation_id, .. }
            | ProposalEvent::ProposalRejected { conversation_id, .. }
            | ProposalEvent::ProposalModified { conversation_id, .. }
            | ProposalEvent::ActionReverted { conversation_id, .. } => *conversation_id,
        }
    }
}

pub trait NotificationSink: Send + Sync {
    /// Handle an event. Errors are logged but don't stop the system.
    fn send(&self, event: &ProposalEvent) -> Result<(), ProposalError>;
}

/// Appends events as JSONL to a file.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &ProposalEvent) -> Result<(), ProposalError> {
        let io_err = |e: std::io::Error| {
            ProposalError::NotificationError(format!("{}: {}", self.path.display(), e))
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        let json = serde_json::to_string(event)
            .map_err(|e| ProposalError::NotificationError(e.to_string()))?;
        writeln!(file, "{}", json).map_err(io_err)
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn dispatch(&self, event: &ProposalEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!(event_type = event.event_type(), "notification sink error: {}", e);
            }
        }
    }
}
