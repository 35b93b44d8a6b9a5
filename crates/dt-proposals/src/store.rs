// store.rs — Proposal persistence with status-guarded transitions.

use std::path::Path;

use uuid::Uuid;

use dt_store::{JsonFileStore, UpdateOutcome};

use crate::error::ProposalError;
use crate::proposal::{ActionProposal, ProposalStatus};

pub struct ProposalStore {
    records: JsonFileStore<ActionProposal>,
}

impl ProposalStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ProposalError> {
        Ok(Self {
            records: JsonFileStore::new(dir)?,
        })
    }

    pub fn insert(&self, proposal: &ActionProposal) -> Result<(), ProposalError> {
        Ok(self.records.insert(proposal)?)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ActionProposal>, ProposalError> {
        Ok(self.records.get(id)?)
    }

    /// Proposals in a conversation, newest first, optionally by stored status.
    pub fn list_for_conversation(
        &self,
        conversation_id: Uuid,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<ActionProposal>, ProposalError> {
        let mut proposals = self.records.filter(|p| {
            p.conversation_id == conversation_id && status.is_none_or(|s| p.status == s)
        })?;
        proposals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(proposals)
    }

    /// Move a proposal to `next` only if its current status allows it.
    ///
    /// `mutate` runs on the same locked read as the status check, so any
    /// fields written alongside the transition land atomically with it.
    pub fn transition<M>(
        &self,
        id: Uuid,
        next: ProposalStatus,
        mutate: M,
    ) -> Result<UpdateOutcome<ActionProposal>, ProposalError>
    where
        M: FnOnce(&mut ActionProposal),
    {
        Ok(self.records.update_if(
            id,
            |p| p.status.can_transition_to(next),
            |p| {
                p.status = next;
                mutate(p);
            },
        )?)
    }

    /// Remove a proposal that never became visible, e.g. an orphaned successor.
    pub fn discard(&self, id: Uuid) -> Result<bool, ProposalError> {
        Ok(self.records.remove(id)?)
    }
}
