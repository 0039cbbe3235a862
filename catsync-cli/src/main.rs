//! catsync — idempotent catalog synchronization CLI.
//!
//! # Usage
//!
//! ```text
//! catsync ingest --config <yaml> --catalog <json> [--dry-run] [--skip-phase T]... [--reconcile]
//! catsync delete --config <yaml> [--catalog <json>] [--dry-run] [--reingest-after-delete]
//! catsync reconcile --config <yaml> --catalog <json> [--type T]...
//! catsync status --config <yaml> [--json]
//! catsync ledger clear --config <yaml> [--type T]
//! ```

mod commands;
mod http;
mod output;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use catsync_core::EntityType;
use commands::{
    delete::DeleteArgs, ingest::IngestArgs, ledger::LedgerCommand, reconcile::ReconcileArgs,
    status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "catsync",
    version,
    about = "Converge a remote catalog onto a desired entity set",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create every desired entity the remote does not have yet.
    Ingest(IngestArgs),

    /// Delete the catalog (ledger keys plus desired keys) in reverse dependency order.
    Delete(DeleteArgs),

    /// Find and remove remote orphans that are not part of the desired catalog.
    Reconcile(ReconcileArgs),

    /// Show per-type ledger counts.
    Status(StatusArgs),

    /// Inspect or reset the local idempotency ledger.
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared EntityType argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `EntityType` from CLI args.
#[derive(Debug, Clone, Copy)]
pub struct EntityTypeArg(pub EntityType);

impl FromStr for EntityTypeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<EntityType>().map(Self)
    }
}

impl fmt::Display for EntityTypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<EntityTypeArg> for EntityType {
    fn from(arg: EntityTypeArg) -> Self {
        arg.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    match cli.command {
        Commands::Ingest(args) => args.run(),
        Commands::Delete(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Ledger { command } => commands::ledger::run(command),
    }
}
