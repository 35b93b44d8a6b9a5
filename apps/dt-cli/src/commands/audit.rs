// audit.rs — Audit subcommands: verify, tail.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use dt_audit::{AuditError, AuditLog};

use crate::DataPaths;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify the audit log hash chain.
    Verify {
        /// Path to audit log (defaults to <data-dir>/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Show recent audit events.
    Tail {
        /// Path to audit log (defaults to <data-dir>/audit.jsonl).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Number of events to show.
        #[arg(short, default_value = "10")]
        n: usize,
    },
}

pub fn execute(cmd: &AuditCommands, paths: &DataPaths) -> anyhow::Result<()> {
    match cmd {
        AuditCommands::Verify { log } => {
            let path = log.clone().unwrap_or_else(|| paths.audit_log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }
            let count = verify(&path)?;
            println!("Audit log verified: {} event(s), hash chain intact.", count);
        }

        AuditCommands::Tail { log, n } => {
            let path = log.clone().unwrap_or_else(|| paths.audit_log.clone());
            if !path.exists() {
                println!("No audit log found at {}", path.display());
                return Ok(());
            }

            let recent = AuditLog::tail(&path, *n)?;
            if recent.is_empty() {
                println!("No audit events.");
                return Ok(());
            }

            println!("{:<20} {:<38} {:<20} TARGET", "TIMESTAMP", "ACTOR", "ACTION");
            println!("{}", "-".repeat(100));
            for event in recent {
                println!(
                    "{:<20} {:<38} {:<20} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.actor,
                    format!("{:?}", event.action),
                    event.target_uri.as_deref().unwrap_or("-"),
                );
            }
        }
    }

    Ok(())
}

/// Recompute the chain; print the broken link and fail on tampering.
fn verify(path: &Path) -> anyhow::Result<usize> {
    match AuditLog::verify_chain(path) {
        Ok(count) => Ok(count),
        Err(AuditError::IntegrityViolation {
            line,
            expected,
            actual,
        }) => {
            println!("INTEGRITY VIOLATION at line {}:", line);
            println!("  Expected previous_hash: {}", expected);
            println!("  Actual previous_hash:   {}", actual);
            println!();
            println!("The audit log may have been tampered with.");
            anyhow::bail!("Audit log integrity check failed")
        }
        Err(e) => Err(e.into()),
    }
}
