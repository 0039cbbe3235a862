//! `catsync reconcile` — standalone orphan detection and cleanup.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use catsync_engine::Workflow;

use super::{execute, load_catalog, load_config, RunFlags};
use crate::EntityTypeArg;

/// Arguments for `catsync reconcile`.
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    #[command(flatten)]
    pub flags: RunFlags,

    /// Desired catalog; remote keys outside it are orphans.
    #[arg(long)]
    pub catalog: PathBuf,

    /// Restrict to these entity types (repeatable, default: every type in the catalog).
    #[arg(long = "type", value_name = "TYPE")]
    pub types: Vec<EntityTypeArg>,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config(&self.flags.config)?;
        let desired = load_catalog(&self.catalog)?;
        let types = self.types.iter().map(|t| t.0).collect();
        let options = self.flags.options();
        execute(&self.flags, &config, options, &desired, Workflow::Reconcile(types))
    }
}
