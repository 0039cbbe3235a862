//! Orchestrator — sequences entity-type phases and owns the ledger.
//!
//! Nothing else writes the ledger: the executor, poller and reconciler
//! report outcomes up, and only keys they confirm are committed. The ledger
//! is saved after every phase so a crash loses at most one phase of work.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use catsync_core::outcome::OutcomeCounts;
use catsync_core::{
    DesiredState, EntityType, FailedItem, Ledger, NaturalKey, OperationOutcome, RunOptions,
    SyncConfig,
};

use crate::batch::BatchExecutor;
use crate::error::SyncError;
use crate::poller::{ConvergencePoller, KeyExpectation, Observer, PollReport, PollStatus};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::remote::CatalogRemote;
use crate::retry::RetryPolicy;
use crate::sorter::sort_by_dependency;

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Ingest,
    Delete,
    Reconcile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Succeeded,
    Failed,
    Skipped,
    /// Not attempted because a phase it depends on failed.
    Aborted,
    Cancelled,
}

/// Convergence check attached to a phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    pub status: PollStatus,
    pub attempts: u32,
    pub confirmed: usize,
    pub expected: usize,
    pub message: String,
}

impl From<&PollReport> for Verification {
    fn from(report: &PollReport) -> Self {
        Self {
            status: report.status,
            attempts: report.attempts,
            confirmed: report.current,
            expected: report.expected,
            message: report.message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub entity_type: EntityType,
    pub status: PhaseStatus,
    pub counts: OutcomeCounts,
    /// Remote calls spent across all batches of the phase.
    pub attempts: u32,
    pub failed: Vec<FailedItem>,
    pub verification: Option<Verification>,
    pub issues: Vec<String>,
}

impl PhaseSummary {
    fn idle(entity_type: EntityType, status: PhaseStatus, issue: Option<String>) -> Self {
        Self {
            entity_type,
            status,
            counts: OutcomeCounts::default(),
            attempts: 0,
            failed: Vec::new(),
            verification: None,
            issues: issue.into_iter().collect(),
        }
    }

    fn from_outcome(
        entity_type: EntityType,
        status: PhaseStatus,
        outcome: &OperationOutcome,
    ) -> Self {
        Self {
            entity_type,
            status,
            counts: outcome.counts(),
            attempts: outcome.attempts(),
            failed: outcome.failed.clone(),
            verification: None,
            issues: Vec::new(),
        }
    }
}

/// Structured result of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub workflow: WorkflowKind,
    pub dry_run: bool,
    pub phases: Vec<PhaseSummary>,
    pub reconciliation: Vec<ReconcileReport>,
    /// False whenever a phase failed, a reconciliation is unclean or the run was cancelled.
    pub success: bool,
    pub cancelled: bool,
    /// The failed phase that caused later phases to be aborted.
    pub aborted_after: Option<EntityType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reingest: Option<Box<RunSummary>>,
}

impl RunSummary {
    fn new(workflow: WorkflowKind, dry_run: bool) -> Self {
        Self {
            workflow,
            dry_run,
            phases: Vec::new(),
            reconciliation: Vec::new(),
            success: false,
            cancelled: false,
            aborted_after: None,
            reingest: None,
        }
    }

    fn finalize(&mut self) {
        let phases_ok = self
            .phases
            .iter()
            .all(|p| matches!(p.status, PhaseStatus::Succeeded | PhaseStatus::Skipped));
        let clean = self.reconciliation.iter().all(|r| r.clean);
        let reingest_ok = self.reingest.as_ref().map_or(true, |r| r.success);
        self.success = phases_ok && clean && reingest_ok && !self.cancelled;
    }

    pub fn phase(&self, entity_type: EntityType) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.entity_type == entity_type)
    }

    /// Item counts summed over every phase.
    pub fn totals(&self) -> OutcomeCounts {
        self.phases.iter().fold(OutcomeCounts::default(), |mut acc, p| {
            acc.created += p.counts.created;
            acc.existing += p.counts.existing;
            acc.deleted += p.counts.deleted;
            acc.failed += p.counts.failed;
            acc.skipped += p.counts.skipped;
            acc
        })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    remote: Arc<dyn CatalogRemote>,
    config: SyncConfig,
    options: RunOptions,
    retry: RetryPolicy,
    poller: ConvergencePoller,
    ledger: Ledger,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Validates `config` once; every component is built from it here.
    pub fn new(
        remote: Arc<dyn CatalogRemote>,
        config: SyncConfig,
        options: RunOptions,
        ledger: Ledger,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let retry = RetryPolicy::new(config.retry.clone())?;
        let cancel = CancellationToken::new();
        let poller = ConvergencePoller::new(config.poll.clone())?.with_cancellation(cancel.clone());
        Ok(Self {
            remote,
            config,
            options,
            retry,
            poller,
            ledger,
            cancel,
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.poller = self.poller.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.poller = self.poller.with_observer(observer);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    fn executor(&self) -> BatchExecutor<'_> {
        BatchExecutor::new(self.remote.as_ref(), &self.retry, &self.cancel)
            .with_concurrency(self.config.concurrency)
            .with_dry_run(self.options.dry_run)
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(
            self.remote.as_ref(),
            &self.retry,
            &self.poller,
            &self.config,
            &self.options,
            &self.cancel,
        )
    }

    fn save(&mut self) -> Result<(), SyncError> {
        if self.options.dry_run {
            return Ok(());
        }
        self.ledger.save()?;
        Ok(())
    }

    fn verification_enabled(&self) -> bool {
        !self.options.skip_validation && !self.options.dry_run && !self.cancel.is_cancelled()
    }

    // -- ingest -------------------------------------------------------------

    /// Create every desired entity not yet in the ledger, type by type.
    pub async fn ingest(&mut self, desired: &DesiredState) -> Result<RunSummary, SyncError> {
        let mut summary = RunSummary::new(WorkflowKind::Ingest, self.options.dry_run);
        let mut failed: Vec<EntityType> = Vec::new();
        tracing::info!(
            tenant = %self.config.tenant,
            entities = desired.entities.len(),
            dry_run = self.options.dry_run,
            "ingest started",
        );

        for entity_type in desired.types() {
            if self.cancel.is_cancelled() {
                summary
                    .phases
                    .push(PhaseSummary::idle(entity_type, PhaseStatus::Cancelled, None));
                continue;
            }
            if self.options.skip_phases.contains(&entity_type) {
                tracing::info!(%entity_type, "phase skipped");
                summary
                    .phases
                    .push(PhaseSummary::idle(entity_type, PhaseStatus::Skipped, None));
                continue;
            }
            if let Some(blocker) = failed.iter().copied().find(|f| entity_type.depends_on(*f)) {
                tracing::warn!(%entity_type, %blocker, "phase aborted: prerequisite failed");
                summary.aborted_after.get_or_insert(blocker);
                summary.phases.push(PhaseSummary::idle(
                    entity_type,
                    PhaseStatus::Aborted,
                    Some(format!("aborted: depends on failed {blocker} phase")),
                ));
                continue;
            }

            let phase = self.ingest_phase(entity_type, desired).await?;
            if phase.status == PhaseStatus::Failed {
                tracing::error!(%entity_type, failed = phase.counts.failed, "phase failed");
                failed.push(entity_type);
            }
            summary.phases.push(phase);
        }

        if self.options.reconcile_orphans && !self.cancel.is_cancelled() {
            let succeeded: Vec<EntityType> = summary
                .phases
                .iter()
                .filter(|p| p.status == PhaseStatus::Succeeded)
                .map(|p| p.entity_type)
                .collect();
            self.reconcile_orphans(desired, &succeeded, &mut summary)
                .await?;
        }

        self.finish(summary)
    }

    async fn ingest_phase(
        &mut self,
        entity_type: EntityType,
        desired: &DesiredState,
    ) -> Result<PhaseSummary, SyncError> {
        let entities = sort_by_dependency(desired.of_type(entity_type));
        let batch_size = self.config.batch_size(entity_type);
        tracing::info!(%entity_type, entities = entities.len(), batch_size, "phase started");

        let mut outcome = self
            .executor()
            .execute_create(entity_type, entities, &self.ledger, batch_size)
            .await?;
        for key in &outcome.created {
            self.ledger.add(entity_type, key.clone());
        }
        self.save()?;

        let mut issues = Vec::new();
        let mut verification = None;
        let mut verification_failed = false;
        let pending: Vec<NaturalKey> = outcome
            .created
            .iter()
            .chain(outcome.unconfirmed.iter())
            .cloned()
            .collect();

        if self.verification_enabled() && !pending.is_empty() {
            let report = self
                .poller
                .poll_keys(self.remote.as_ref(), entity_type, &pending, KeyExpectation::Present)
                .await;

            let mut promoted = 0;
            for key in &report.confirmed {
                if outcome.promote(key) {
                    self.ledger.add(entity_type, key.clone());
                    promoted += 1;
                }
            }
            if promoted > 0 {
                tracing::info!(%entity_type, promoted, "unconfirmed keys verified by polling");
                self.save()?;
            }

            if report.status == PollStatus::TimedOut {
                let message = format!("verification {}", report.message());
                if entity_type == self.config.primary_type {
                    tracing::error!(%entity_type, "{message}");
                    verification_failed = true;
                } else {
                    tracing::warn!(%entity_type, "{message}");
                }
                issues.push(message);
            }
            verification = Some(Verification::from(&report));
        }

        let status = if self.cancel.is_cancelled() {
            PhaseStatus::Cancelled
        } else if !outcome.success() || verification_failed {
            PhaseStatus::Failed
        } else {
            PhaseStatus::Succeeded
        };

        let mut phase = PhaseSummary::from_outcome(entity_type, status, &outcome);
        phase.verification = verification;
        phase.issues = issues;
        let counts = phase.counts;
        tracing::info!(
            %entity_type,
            created = counts.created,
            existing = counts.existing,
            failed = counts.failed,
            skipped = counts.skipped,
            status = ?status,
            "phase finished",
        );
        Ok(phase)
    }

    // -- delete -------------------------------------------------------------

    /// Delete every ledger and desired key, dependents first.
    pub async fn delete(&mut self, desired: &DesiredState) -> Result<RunSummary, SyncError> {
        let mut summary = RunSummary::new(WorkflowKind::Delete, self.options.dry_run);
        let mut failed: Vec<EntityType> = Vec::new();
        tracing::info!(
            tenant = %self.config.tenant,
            ledger_keys = self.ledger.total(),
            "delete started",
        );

        for entity_type in EntityType::deletion_order() {
            let keys = self.deletion_keys(entity_type, desired);
            if keys.is_empty() {
                continue;
            }
            if self.cancel.is_cancelled() {
                summary
                    .phases
                    .push(PhaseSummary::idle(entity_type, PhaseStatus::Cancelled, None));
                continue;
            }
            if self.options.skip_phases.contains(&entity_type) {
                summary
                    .phases
                    .push(PhaseSummary::idle(entity_type, PhaseStatus::Skipped, None));
                continue;
            }
            // Prices that failed to delete still reference their products.
            if let Some(blocker) = failed.iter().copied().find(|f| f.depends_on(entity_type)) {
                tracing::warn!(%entity_type, %blocker, "delete phase aborted: dependents remain");
                summary.aborted_after.get_or_insert(blocker);
                summary.phases.push(PhaseSummary::idle(
                    entity_type,
                    PhaseStatus::Aborted,
                    Some(format!("aborted: dependent {blocker} phase failed")),
                ));
                continue;
            }

            let phase = self.delete_phase(entity_type, keys, &mut summary).await?;
            if phase.status == PhaseStatus::Failed {
                tracing::error!(%entity_type, "delete phase failed");
                failed.push(entity_type);
            }
            summary.phases.push(phase);
        }

        summary.cancelled = self.cancel.is_cancelled();
        summary.finalize();
        if self.options.reingest_after_delete && summary.success && !desired.is_empty() {
            tracing::info!("re-ingesting after delete");
            let reingest = self.ingest(desired).await?;
            summary.reingest = Some(Box::new(reingest));
        }

        self.finish(summary)
    }

    /// Desired keys (children before parents) followed by ledger-only keys.
    fn deletion_keys(&self, entity_type: EntityType, desired: &DesiredState) -> Vec<NaturalKey> {
        let mut sorted = sort_by_dependency(desired.of_type(entity_type));
        sorted.reverse();
        let mut keys: Vec<NaturalKey> = sorted.into_iter().map(|e| e.key).collect();
        let known: HashSet<NaturalKey> = keys.iter().cloned().collect();
        keys.extend(
            self.ledger
                .keys(entity_type)
                .into_iter()
                .filter(|k| !known.contains(k)),
        );
        keys
    }

    async fn delete_phase(
        &mut self,
        entity_type: EntityType,
        keys: Vec<NaturalKey>,
        summary: &mut RunSummary,
    ) -> Result<PhaseSummary, SyncError> {
        let batch_size = self.config.batch_size(entity_type);
        tracing::info!(%entity_type, keys = keys.len(), "delete phase started");

        let outcome = self
            .executor()
            .execute_delete(entity_type, keys.clone(), batch_size)
            .await?;
        for key in &outcome.deleted {
            self.ledger.remove(entity_type, key);
        }
        self.save()?;

        let mut issues = Vec::new();
        let mut verification = None;
        let mut unclean = false;
        if self.verification_enabled() {
            if !outcome.deleted.is_empty() {
                let report = self
                    .poller
                    .poll_keys(
                        self.remote.as_ref(),
                        entity_type,
                        &outcome.deleted,
                        KeyExpectation::Absent,
                    )
                    .await;
                verification = Some(Verification::from(&report));
            }

            let report = self.reconciler().reconcile(entity_type, &keys).await?;
            let mut removed = false;
            for key in &report.deleted {
                removed |= self.ledger.remove(entity_type, key);
            }
            if removed {
                self.save()?;
            }
            if !report.clean {
                issues.extend(report.issues.iter().cloned());
                unclean = true;
            }
            summary.reconciliation.push(report);
        }

        let status = if self.cancel.is_cancelled() {
            PhaseStatus::Cancelled
        } else if !outcome.success() || unclean {
            PhaseStatus::Failed
        } else {
            PhaseStatus::Succeeded
        };
        let mut phase = PhaseSummary::from_outcome(entity_type, status, &outcome);
        phase.verification = verification;
        phase.issues = issues;
        tracing::info!(
            %entity_type,
            deleted = phase.counts.deleted,
            failed = phase.counts.failed,
            status = ?status,
            "delete phase finished",
        );
        Ok(phase)
    }

    // -- reconcile ----------------------------------------------------------

    /// Remove remote orphans of `types` (every desired type when empty).
    pub async fn reconcile(
        &mut self,
        desired: &DesiredState,
        types: &[EntityType],
    ) -> Result<RunSummary, SyncError> {
        let mut summary = RunSummary::new(WorkflowKind::Reconcile, self.options.dry_run);
        let types = if types.is_empty() {
            desired.types()
        } else {
            types.to_vec()
        };
        self.reconcile_orphans(desired, &types, &mut summary).await?;
        self.finish(summary)
    }

    async fn reconcile_orphans(
        &mut self,
        desired: &DesiredState,
        types: &[EntityType],
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        for entity_type in EntityType::deletion_order().filter(|t| types.contains(t)) {
            if self.cancel.is_cancelled() {
                break;
            }
            let keys = desired.keys_of(entity_type);
            let report = self.reconciler().reconcile_desired(entity_type, &keys).await?;

            let mut removed = false;
            for key in &report.deleted {
                removed |= self.ledger.remove(entity_type, key);
            }
            if removed {
                self.save()?;
            }
            tracing::info!(
                %entity_type,
                clean = report.clean,
                orphans = report.orphans_found.len(),
                deleted = report.deleted.len(),
                "orphan reconciliation finished",
            );
            summary.reconciliation.push(report);
        }
        Ok(())
    }

    fn finish(&mut self, mut summary: RunSummary) -> Result<RunSummary, SyncError> {
        summary.cancelled = self.cancel.is_cancelled();
        if summary.cancelled {
            tracing::warn!("run cancelled; ledger saved");
        }
        self.save()?;
        summary.finalize();
        tracing::info!(workflow = ?summary.workflow, success = summary.success, "run finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use catsync_core::{Entity, PollConfig};
    use tempfile::TempDir;

    use crate::error::RemoteError;
    use crate::memory::{InMemoryRemote, Operation};

    fn config() -> SyncConfig {
        SyncConfig {
            poll: PollConfig {
                interval: Duration::from_secs(1),
                max_attempts: 5,
                ..PollConfig::default()
            },
            ..SyncConfig::default()
        }
    }

    fn orchestrator(
        remote: &Arc<InMemoryRemote>,
        dir: &TempDir,
        options: RunOptions,
    ) -> Orchestrator {
        let ledger = Ledger::empty(dir.path().join("ledger.json"));
        let remote: Arc<dyn CatalogRemote> = remote.clone();
        Orchestrator::new(remote, config(), options, ledger).unwrap()
    }

    fn catalog() -> DesiredState {
        DesiredState::new(vec![
            Entity::new(EntityType::Category, "C").with_parent("B"),
            Entity::new(EntityType::Category, "A"),
            Entity::new(EntityType::Category, "B").with_parent("A"),
            Entity::new(EntityType::Product, "SKU-1"),
            Entity::new(EntityType::Product, "SKU-2"),
            Entity::new(EntityType::PriceBook, "pb-eu"),
            Entity::new(EntityType::Price, "price-1"),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn ingest_sorts_commits_and_saves() {
        let remote = Arc::new(InMemoryRemote::new().with_indexing_lag(1));
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&remote, &dir, RunOptions::default());

        let summary = orch.ingest(&catalog()).await.unwrap();

        assert!(summary.success, "{summary:#?}");
        let order: Vec<String> = remote
            .submitted_keys(EntityType::Category)
            .into_iter()
            .map(|k| k.0)
            .collect();
        assert_eq!(order, ["A", "B", "C"]);
        assert_eq!(orch.ledger().len(EntityType::Category), 3);
        assert_eq!(orch.ledger().total(), 7);
        let phase = summary.phase(EntityType::Category).unwrap();
        assert_eq!(phase.counts.created, 3);
        assert!(phase.verification.as_ref().unwrap().status == PollStatus::Converged);

        let reloaded = Ledger::load(&dir.path().join("ledger.json")).unwrap();
        assert_eq!(reloaded.total(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_prerequisite_aborts_only_dependents() {
        let remote = Arc::new(InMemoryRemote::new().with_failures(
            Operation::Create,
            EntityType::Product,
            vec![RemoteError::status(422, "invalid product")],
        ));
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&remote, &dir, RunOptions::default());

        let summary = orch.ingest(&catalog()).await.unwrap();

        assert!(!summary.success);
        assert_eq!(summary.aborted_after, Some(EntityType::Product));
        let status = |t| summary.phase(t).unwrap().status;
        assert_eq!(status(EntityType::Category), PhaseStatus::Succeeded);
        assert_eq!(status(EntityType::Product), PhaseStatus::Failed);
        assert_eq!(status(EntityType::PriceBook), PhaseStatus::Succeeded);
        assert_eq!(status(EntityType::Price), PhaseStatus::Aborted);
        assert_eq!(remote.call_count(Operation::Create, EntityType::Price), 0);
        assert_eq!(orch.ledger().len(EntityType::Product), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_keys_are_promoted_after_polling() {
        let remote = Arc::new(
            InMemoryRemote::new()
                .with_rejections(&["SKU-2"], "bad")
                .with_aggregate_only_responses(),
        );
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&remote, &dir, RunOptions::default());
        let desired = DesiredState::new(vec![
            Entity::new(EntityType::Product, "SKU-1"),
            Entity::new(EntityType::Product, "SKU-2"),
        ]);

        let summary = orch.ingest(&desired).await.unwrap();

        let phase = summary.phase(EntityType::Product).unwrap();
        assert_eq!(phase.status, PhaseStatus::Failed);
        assert_eq!(phase.counts.created, 1);
        assert_eq!(phase.failed.len(), 1);
        assert_eq!(phase.failed[0].key.as_str(), "SKU-2");
        assert!(orch.ledger().has(EntityType::Product, &"SKU-1".into()));
        assert!(!orch.ledger().has(EntityType::Product, &"SKU-2".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn primary_type_timeout_fails_the_phase() {
        // Never visible within five polls.
        let remote = Arc::new(InMemoryRemote::new().with_indexing_lag(100));
        let dir = TempDir::new().unwrap();
        let mut orch = orchestrator(&remote, &dir, RunOptions::default());
        let desired = DesiredState::new(vec![
            Entity::new(EntityType::Metadata, "attr-color"),
            Entity::new(EntityType::Product, "SKU-1"),
        ]);

        let summary = orch.ingest(&desired).await.unwrap();

        let metadata = summary.phase(EntityType::Metadata).unwrap();
        assert_eq!(metadata.status, PhaseStatus::Succeeded);
        assert_eq!(metadata.issues.len(), 1);
        let product = summary.phase(EntityType::Product).unwrap();
        assert_eq!(product.status, PhaseStatus::Failed);
        assert!(product.issues[0].contains("not yet processed"));
        // Confirmed by the batch response, so still committed.
        assert!(orch.ledger().has(EntityType::Product, &"SKU-1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_phase_and_dry_run_leave_ledger_untouched() {
        let remote = Arc::new(InMemoryRemote::new());
        let dir = TempDir::new().unwrap();
        let options = RunOptions {
            dry_run: true,
            skip_phases: [EntityType::Price].into_iter().collect(),
            ..RunOptions::default()
        };
        let mut orch = orchestrator(&remote, &dir, options);

        let summary = orch.ingest(&catalog()).await.unwrap();

        assert!(summary.success);
        assert_eq!(summary.phase(EntityType::Price).unwrap().status, PhaseStatus::Skipped);
        assert_eq!(summary.totals().skipped, 6);
        assert!(remote.calls().is_empty());
        assert!(!dir.path().join("ledger.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_reports_cancelled() {
        let remote = Arc::new(InMemoryRemote::new());
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut orch =
            orchestrator(&remote, &dir, RunOptions::default()).with_cancellation(cancel);

        let summary = orch.ingest(&catalog()).await.unwrap();

        assert!(summary.cancelled);
        assert!(!summary.success);
        assert!(summary
            .phases
            .iter()
            .all(|p| p.status == PhaseStatus::Cancelled));
        assert!(dir.path().join("ledger.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn unwritable_ledger_stops_the_run() {
        let remote = Arc::new(InMemoryRemote::new());
        let dir = TempDir::new().unwrap();
        // A regular file where the ledger directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let ledger = Ledger::empty(blocker.join("ledger.json"));
        let shared: Arc<dyn CatalogRemote> = remote.clone();
        let mut orch = Orchestrator::new(shared, config(), RunOptions::default(), ledger).unwrap();

        let result = orch.ingest(&catalog()).await;

        assert!(matches!(result, Err(SyncError::Ledger(_))), "{result:?}");
        assert_eq!(remote.call_count(Operation::Create, EntityType::Category), 1);
        assert_eq!(remote.call_count(Operation::Create, EntityType::Product), 0);
    }

    #[test]
    fn summary_serializes_to_json() {
        let mut summary = RunSummary::new(WorkflowKind::Ingest, false);
        summary
            .phases
            .push(PhaseSummary::idle(EntityType::PriceBook, PhaseStatus::Skipped, None));
        summary.finalize();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["workflow"], "ingest");
        assert_eq!(json["phases"][0]["entity_type"], "price_book");
        assert_eq!(json["phases"][0]["status"], "skipped");
        assert_eq!(json["success"], true);
        assert!(json.get("reingest").is_none());
    }
}
