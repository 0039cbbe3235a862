//! Subcommand implementations and the plumbing they share.

pub mod delete;
pub mod ingest;
pub mod ledger;
pub mod reconcile;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use catsync_core::{DesiredState, RunOptions, SyncConfig};
use catsync_engine::{pipeline, RunSummary, Workflow};

use crate::http::HttpRemote;
use crate::output;

/// Flags shared by every command that runs a workflow.
#[derive(Args, Debug)]
pub struct RunFlags {
    /// Path to the catsync YAML config.
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Report what would happen without calling the remote or writing the ledger.
    #[arg(long)]
    pub dry_run: bool,

    /// Scan entire entity types instead of a derived key pattern.
    #[arg(long)]
    pub force_full_scan: bool,

    /// Emit the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunFlags {
    fn options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            force_full_scan: self.force_full_scan,
            ..RunOptions::default()
        }
    }
}

pub fn load_config(path: &Path) -> Result<SyncConfig> {
    SyncConfig::load_at(path)
        .with_context(|| format!("failed to load config '{}'", path.display()))
}

pub fn load_catalog(path: &Path) -> Result<DesiredState> {
    DesiredState::load_at(path)
        .with_context(|| format!("failed to load catalog '{}'", path.display()))
}

/// Run `workflow` against the configured HTTP remote, print the summary and
/// fail when it did not succeed.
pub fn execute(
    flags: &RunFlags,
    config: &SyncConfig,
    options: RunOptions,
    desired: &DesiredState,
    workflow: Workflow,
) -> Result<()> {
    let remote = HttpRemote::from_config(&config.remote)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let summary = runtime.block_on(run_until_interrupted(
        remote, config, options, desired, workflow,
    ))?;

    output::print_summary(&summary, flags.json)?;
    if !summary.success {
        bail!("{} finished with issues", output::workflow_label(summary.workflow));
    }
    Ok(())
}

async fn run_until_interrupted(
    remote: HttpRemote,
    config: &SyncConfig,
    options: RunOptions,
    desired: &DesiredState,
    workflow: Workflow,
) -> Result<RunSummary> {
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after in-flight batches");
                cancel.cancel();
            }
        }
    });

    let result = pipeline::run(Arc::new(remote), config, options, desired, workflow, cancel).await;
    interrupt.abort();
    result.context("sync run failed")
}
