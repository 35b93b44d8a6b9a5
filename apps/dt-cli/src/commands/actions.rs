// actions.rs — Executed-action subcommands: list.

use clap::Subcommand;
use dt_audit::{ExecutedAction, ExecutionFilter, ExecutionStore};
use uuid::Uuid;

use crate::DataPaths;

#[derive(Subcommand)]
pub enum ActionCommands {
    /// List executed actions for a tenant, newest last.
    List {
        /// Tenant to list.
        #[arg(long)]
        tenant: Uuid,
        /// Only actions from this conversation.
        #[arg(long)]
        conversation: Option<Uuid>,
        /// Only actions proposed by this agent.
        #[arg(long)]
        agent: Option<String>,
        /// Show at most this many (the most recent).
        #[arg(short, default_value = "20")]
        n: usize,
    },
}

pub fn execute(cmd: &ActionCommands, paths: &DataPaths) -> anyhow::Result<()> {
    match cmd {
        ActionCommands::List {
            tenant,
            conversation,
            agent,
            n,
        } => {
            if !paths.executions.exists() {
                println!("No execution log found at {}", paths.executions.display());
                return Ok(());
            }
            let store = ExecutionStore::open(&paths.executions)?;
            let filter = ExecutionFilter {
                conversation_id: *conversation,
                agent_ids: agent.iter().cloned().collect(),
                ..ExecutionFilter::for_tenant(*tenant)
            };
            let actions = store.query(&filter)?;
            let start = actions.len().saturating_sub(*n);
            let recent = &actions[start..];

            if recent.is_empty() {
                println!("No executed actions.");
                return Ok(());
            }

            println!(
                "{:<38} {:<20} {:<14} {:<8} {:<10} REVERTED",
                "ACTION ID", "EXECUTED", "TYPE", "STATUS", "AGENT"
            );
            println!("{}", "-".repeat(100));
            for action in recent {
                println!("{}", row(action));
            }
        }
    }

    Ok(())
}

fn row(action: &ExecutedAction) -> String {
    let reverted = match action.reverted_at {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None if action.is_reversible => "no".to_string(),
        None => "-".to_string(),
    };
    format!(
        "{:<38} {:<20} {:<14} {:<8} {:<10} {}",
        action.id,
        action.created_at.format("%Y-%m-%d %H:%M:%S"),
        action.action_type.to_string(),
        action.status.to_string(),
        action.agent_id,
        reverted,
    )
}
