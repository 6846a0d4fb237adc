//! # adr-cli
//!
//! Operator command line for the ADR safety core:
//! - `adr graph validate/order/effects`: check a graph against the active policy
//! - `adr policy show`: summarize the active Policy Constraint Set
//! - `adr audit verify/tail/export/attest/check-attestation`: inspect the action log
//! - `adr kill <command>` / `adr status`: talk to a running `adr-daemon`
//! - `adr approve <node> --operator <id>` / `adr grant <capability>`: feed its supervised run

mod commands;

use std::path::PathBuf;

use adr_daemon::DaemonConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// ADR operator CLI.
#[derive(Parser)]
#[command(name = "adr", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and inspect action graphs.
    Graph {
        #[command(subcommand)]
        command: commands::graph::GraphCommands,
    },
    /// Inspect the active policy.
    Policy {
        #[command(subcommand)]
        command: commands::policy::PolicyCommands,
    },
    /// Inspect the action log.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
    /// Send a command to the daemon's kill switch.
    Kill(commands::kill::KillArgs),
    /// Show the daemon's kill-switch state.
    Status(commands::kill::StatusArgs),
    /// Approve a node the daemon's run is waiting on.
    Approve(commands::run::ApproveArgs),
    /// Grant a capability to the daemon's run.
    Grant(commands::run::GrantArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("adr_cli=warn".parse()?))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let config = DaemonConfig::load(&project_root)?;

    match &cli.command {
        Commands::Graph { command } => commands::graph::execute(command, &config),
        Commands::Policy { command } => commands::policy::execute(command, &config),
        Commands::Audit { command } => commands::audit::execute(command, &config),
        Commands::Kill(args) => commands::kill::kill(args, &config),
        Commands::Status(args) => commands::kill::status(args, &config),
        Commands::Approve(args) => commands::run::approve(args, &config),
        Commands::Grant(args) => commands::run::grant(args, &config),
    }
}
