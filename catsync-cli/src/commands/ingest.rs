//! `catsync ingest` — create the desired catalog, skipping what the ledger already holds.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use catsync_core::RunOptions;
use catsync_engine::Workflow;

use super::{execute, load_catalog, load_config, RunFlags};
use crate::EntityTypeArg;

/// Arguments for `catsync ingest`.
#[derive(Args, Debug)]
pub struct IngestArgs {
    #[command(flatten)]
    pub flags: RunFlags,

    /// Desired catalog as a JSON document.
    #[arg(long)]
    pub catalog: PathBuf,

    /// Leave an entity type untouched (repeatable).
    #[arg(long = "skip-phase", value_name = "TYPE")]
    pub skip_phases: Vec<EntityTypeArg>,

    /// Do not wait for created entities to become visible.
    #[arg(long)]
    pub skip_validation: bool,

    /// Remove remote orphans once every phase has converged.
    #[arg(long)]
    pub reconcile: bool,
}

impl IngestArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config(&self.flags.config)?;
        let desired = load_catalog(&self.catalog)?;
        let options = RunOptions {
            skip_phases: self.skip_phases.iter().map(|t| t.0).collect(),
            skip_validation: self.skip_validation,
            reconcile_orphans: self.reconcile,
            ..self.flags.options()
        };
        execute(&self.flags, &config, options, &desired, Workflow::Ingest)
    }
}
