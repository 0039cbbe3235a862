//! `catsync delete` — remove everything the ledger (and optionally a catalog) names.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use catsync_core::{DesiredState, RunOptions};
use catsync_engine::Workflow;

use super::{execute, load_catalog, load_config, RunFlags};

/// Arguments for `catsync delete`.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub flags: RunFlags,

    /// Desired catalog whose keys are deleted alongside the ledger's.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Skip the post-delete reconciliation.
    #[arg(long)]
    pub skip_validation: bool,

    /// Ingest the catalog again once the deletion converged.
    #[arg(long, requires = "catalog")]
    pub reingest_after_delete: bool,
}

impl DeleteArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config(&self.flags.config)?;
        let desired = match &self.catalog {
            Some(path) => load_catalog(path)?,
            None => DesiredState::default(),
        };
        let options = RunOptions {
            skip_validation: self.skip_validation,
            reingest_after_delete: self.reingest_after_delete,
            ..self.flags.options()
        };
        execute(&self.flags, &config, options, &desired, Workflow::Delete)
    }
}
