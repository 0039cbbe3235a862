//! Shared pipeline entrypoint used by the CLI and by library callers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use catsync_core::{DesiredState, EntityType, Ledger, RunOptions, SyncConfig};

use crate::orchestrator::{Orchestrator, RunSummary};
use crate::remote::CatalogRemote;
use crate::SyncError;

/// What a pipeline run does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workflow {
    Ingest,
    Delete,
    /// Orphan reconciliation for the given types (every desired type when empty).
    Reconcile(Vec<EntityType>),
}

/// Ledger location for `config`, resolving the default under `home`.
pub fn ledger_path_at(home: &Path, config: &SyncConfig) -> PathBuf {
    config
        .ledger_path
        .clone()
        .unwrap_or_else(|| Ledger::path_at(home, &config.tenant))
}

/// Ledger location for `config`, resolving the default under the user's home.
pub fn ledger_path(config: &SyncConfig) -> Result<PathBuf, SyncError> {
    match &config.ledger_path {
        Some(path) => Ok(path.clone()),
        None => Ok(Ledger::default_path(&config.tenant)?),
    }
}

/// Run a workflow against `remote` with the ledger at its configured location.
///
/// This is the canonical entrypoint for `catsync ingest|delete|reconcile`.
pub async fn run(
    remote: Arc<dyn CatalogRemote>,
    config: &SyncConfig,
    options: RunOptions,
    desired: &DesiredState,
    workflow: Workflow,
    cancel: CancellationToken,
) -> Result<RunSummary, SyncError> {
    let path = ledger_path(config)?;
    run_with_ledger(&path, remote, config, options, desired, workflow, cancel).await
}

/// Same as [`run`], resolving the default ledger location under `home`.
pub async fn run_at(
    home: &Path,
    remote: Arc<dyn CatalogRemote>,
    config: &SyncConfig,
    options: RunOptions,
    desired: &DesiredState,
    workflow: Workflow,
    cancel: CancellationToken,
) -> Result<RunSummary, SyncError> {
    let path = ledger_path_at(home, config);
    run_with_ledger(&path, remote, config, options, desired, workflow, cancel).await
}

async fn run_with_ledger(
    path: &Path,
    remote: Arc<dyn CatalogRemote>,
    config: &SyncConfig,
    options: RunOptions,
    desired: &DesiredState,
    workflow: Workflow,
    cancel: CancellationToken,
) -> Result<RunSummary, SyncError> {
    let ledger = Ledger::load_or_recover(path)?;
    tracing::debug!(path = %path.display(), keys = ledger.total(), "ledger loaded");

    let mut orchestrator =
        Orchestrator::new(remote, config.clone(), options, ledger)?.with_cancellation(cancel);
    match workflow {
        Workflow::Ingest => orchestrator.ingest(desired).await,
        Workflow::Delete => orchestrator.delete(desired).await,
        Workflow::Reconcile(types) => orchestrator.reconcile(desired, &types).await,
    }
}
