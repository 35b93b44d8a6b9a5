//! # dt-cli
//!
//! Operator command-line interface for DevTel Copilot.
//!
//! Works directly on a daemon's data directory:
//! - `dt audit verify/tail` — inspect the tamper-evident audit trail
//! - `dt actions list` — executed actions for a tenant
//! - `dt export list/verify` — compliance exports and their signatures

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// DevTel Copilot CLI — audit and compliance tooling.
#[derive(Parser)]
#[command(name = "dt", version, about)]
struct Cli {
    /// Daemon data directory.
    #[arg(long, default_value = ".devtel")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
    /// Inspect executed actions.
    Actions {
        #[command(subcommand)]
        command: commands::actions::ActionCommands,
    },
    /// Inspect and verify compliance exports.
    Export {
        #[command(subcommand)]
        command: commands::export::ExportCommands,
    },
}

/// Where the daemon keeps each store under its data directory.
pub struct DataPaths {
    pub audit_log: PathBuf,
    pub executions: PathBuf,
    pub exports: PathBuf,
    pub config_file: PathBuf,
}

impl DataPaths {
    pub fn for_data_dir(data_dir: &std::path::Path) -> Self {
        Self {
            audit_log: data_dir.join("audit.jsonl"),
            executions: data_dir.join("executions"),
            exports: data_dir.join("exports"),
            config_file: data_dir.join("daemon.toml"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = DataPaths::for_data_dir(&cli.data_dir);

    match &cli.command {
        Commands::Audit { command } => commands::audit::execute(command, &paths),
        Commands::Actions { command } => commands::actions::execute(command, &paths),
        Commands::Export { command } => commands::export::execute(command, &paths),
    }
}
