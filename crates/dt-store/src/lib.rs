//! # dt-store
//!
//! Record persistence for DevTel Copilot.
//!
//! Every entity in the system (conversations, messages, proposals, executed
//! actions, compliance exports, DevTel issues) is persisted through a
//! [`JsonFileStore`]: one pretty-printed JSON file per record, keyed by the
//! record's UUID. The store is deliberately small but gives the one
//! guarantee the lifecycle engine depends on: [`JsonFileStore::update_if`]
//! performs read → check → write under a lock, so a state transition is
//! applied only if the record is still in the state the caller expects.
//!
//! ## Key components
//!
//! - [`Record`] — implemented by anything that can live in a store
//! - [`JsonFileStore`] — the directory-backed store
//! - [`UpdateOutcome`] — result of a conditional update

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{JsonFileStore, Record, UpdateOutcome};
