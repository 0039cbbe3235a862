//! `catsync ledger …` subcommands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use catsync_core::Ledger;
use catsync_engine::pipeline;

use super::load_config;
use crate::EntityTypeArg;

#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// Forget recorded keys so the next ingest resubmits them.
    Clear {
        /// Path to the catsync YAML config.
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Only clear these entity types (repeatable, default: all).
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<EntityTypeArg>,
    },
}

pub fn run(command: LedgerCommand) -> Result<()> {
    match command {
        LedgerCommand::Clear { config, types } => clear(&config, &types),
    }
}

fn clear(config_path: &Path, types: &[EntityTypeArg]) -> Result<()> {
    let config = load_config(config_path)?;
    let path = pipeline::ledger_path(&config).context("could not resolve ledger path")?;
    let mut ledger = Ledger::load(&path)
        .with_context(|| format!("failed to read ledger '{}'", path.display()))?;

    let before = ledger.total();
    if types.is_empty() {
        ledger.clear(None);
    } else {
        for ty in types {
            ledger.clear(Some(ty.0));
        }
    }
    let removed = before - ledger.total();
    ledger
        .save()
        .with_context(|| format!("failed to write ledger '{}'", path.display()))?;

    let scope = if types.is_empty() {
        "all types".to_string()
    } else {
        types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!(
        "{} cleared {removed} keys ({scope}) from '{}'",
        "✓".green(),
        path.display()
    );
    Ok(())
}
