//! # dt-audit
//!
//! Everything that looks back at what the agents did.
//!
//! - [`ExecutionStore`] holds one immutable [`ExecutedAction`] per approved
//!   proposal. The only later write is the one-shot revert stamp.
//! - [`AuditLog`] is an append-only, hash-chained JSONL trail of every
//!   lifecycle transition.
//! - [`ImpactAnalyzer`] correlates an executed action with what happened to
//!   the same entity in the following 24 hours.
//! - [`ComplianceExporter`] renders a filtered slice of the execution log as
//!   CSV and signs it with HMAC-SHA256.
//!
//! ```rust,no_run
//! use dt_audit::{AuditAction, AuditEvent, AuditLog};
//!
//! let mut log = AuditLog::open("/tmp/audit.jsonl").unwrap();
//! let mut event = AuditEvent::new("user-1", AuditAction::ProposalApproved)
//!     .with_target("proposal://8d0c...");
//! log.append(&mut event).unwrap();
//! ```

pub mod compliance;
pub mod error;
pub mod event;
pub mod execution;
pub mod hasher;
pub mod impact;
pub mod log;

pub use compliance::{ComplianceExport, ComplianceExporter, ExportCriteria, GeneratedExport};
pub use error::AuditError;
pub use event::{AuditAction, AuditEvent};
pub use execution::{ExecutedAction, ExecutionFilter, ExecutionStatus, ExecutionStore};
pub use hasher::Signer;
pub use impact::{ImpactAnalyzer, ImpactHeuristics, ImpactReport, TimelineEntry, TimelineKind};
pub use log::AuditLog;
