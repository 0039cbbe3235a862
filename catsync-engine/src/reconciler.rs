//! Orphan detection and cleanup.
//!
//! Two modes share one round loop:
//!
//! - [`Reconciler::reconcile`] verifies that a set of keys is gone: any of
//!   them still present, and any unknown key in the same key family, is an
//!   orphan.
//! - [`Reconciler::reconcile_desired`] checks the remote against the desired
//!   key set: family members that are not desired are orphans, desired keys
//!   that are not visible are a shortfall. Shortfalls are reported, never
//!   deleted.
//!
//! Each round checks, deletes the orphans through the batch executor and
//! polls for their absence. After `max_rounds` cleanups a final check
//! decides whether the type is clean.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use catsync_core::{EntityType, NaturalKey, RunOptions, SyncConfig};

use crate::batch::BatchExecutor;
use crate::error::{RetryError, SyncError};
use crate::pattern::{derive_pattern, KeyPattern};
use crate::poller::{ConvergencePoller, KeyExpectation};
use crate::remote::{CatalogRemote, PageRequest};
use crate::retry::RetryPolicy;

/// Keys listed verbatim in an issue before it is summarized.
const ISSUE_SAMPLE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub entity_type: EntityType,
    pub clean: bool,
    pub issues: Vec<String>,
    /// Cleanup rounds performed.
    pub rounds: u32,
    pub orphans_found: Vec<NaturalKey>,
    pub deleted: Vec<NaturalKey>,
    pub missing: Vec<NaturalKey>,
    pub cancelled: bool,
}

enum Mode<'k> {
    /// These keys must be absent.
    Absent(&'k [NaturalKey]),
    /// Exactly these keys should exist within their family.
    Desired(&'k [NaturalKey]),
}

impl Mode<'_> {
    fn keys(&self) -> &[NaturalKey] {
        match self {
            Mode::Absent(keys) | Mode::Desired(keys) => keys,
        }
    }
}

#[derive(Debug, Default)]
struct Check {
    still_present: Vec<NaturalKey>,
    unknown: Vec<NaturalKey>,
    missing: Vec<NaturalKey>,
    errors: Vec<String>,
    pattern: Option<String>,
    cancelled: bool,
}

impl Check {
    fn is_clean(&self) -> bool {
        self.still_present.is_empty()
            && self.unknown.is_empty()
            && self.missing.is_empty()
            && self.errors.is_empty()
    }

    fn orphans(&self) -> Vec<NaturalKey> {
        let mut orphans = self.still_present.clone();
        orphans.extend(self.unknown.iter().cloned());
        orphans
    }

    fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.still_present.is_empty() {
            issues.push(format!(
                "{} still exist: {}",
                self.still_present.len(),
                sample(&self.still_present)
            ));
        }
        if !self.unknown.is_empty() {
            let family = self.pattern.as_deref().unwrap_or("full scan");
            issues.push(format!(
                "{} unknown orphans matching {family}: {}",
                self.unknown.len(),
                sample(&self.unknown)
            ));
        }
        if !self.missing.is_empty() {
            issues.push(format!(
                "{} missing: {}",
                self.missing.len(),
                sample(&self.missing)
            ));
        }
        issues.extend(self.errors.iter().cloned());
        issues
    }
}

fn sample(keys: &[NaturalKey]) -> String {
    let shown: Vec<&str> = keys.iter().take(ISSUE_SAMPLE).map(NaturalKey::as_str).collect();
    let mut text = shown.join(", ");
    if keys.len() > ISSUE_SAMPLE {
        text.push_str(&format!(" and {} more", keys.len() - ISSUE_SAMPLE));
    }
    text
}

/// Detects and removes remote entities that should not be there.
pub struct Reconciler<'a> {
    remote: &'a dyn CatalogRemote,
    retry: &'a RetryPolicy,
    poller: &'a ConvergencePoller,
    config: &'a SyncConfig,
    options: &'a RunOptions,
    cancel: &'a CancellationToken,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        remote: &'a dyn CatalogRemote,
        retry: &'a RetryPolicy,
        poller: &'a ConvergencePoller,
        config: &'a SyncConfig,
        options: &'a RunOptions,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            remote,
            retry,
            poller,
            config,
            options,
            cancel,
        }
    }

    /// Verify `expected_keys` are gone, deleting leftovers and unknown family members.
    pub async fn reconcile(
        &self,
        entity_type: EntityType,
        expected_keys: &[NaturalKey],
    ) -> Result<ReconcileReport, SyncError> {
        self.run(entity_type, Mode::Absent(expected_keys)).await
    }

    /// Delete remote family members that are not in `desired_keys`.
    pub async fn reconcile_desired(
        &self,
        entity_type: EntityType,
        desired_keys: &[NaturalKey],
    ) -> Result<ReconcileReport, SyncError> {
        self.run(entity_type, Mode::Desired(desired_keys)).await
    }

    async fn run(
        &self,
        entity_type: EntityType,
        mode: Mode<'_>,
    ) -> Result<ReconcileReport, SyncError> {
        let mut report = ReconcileReport {
            entity_type,
            clean: false,
            issues: Vec::new(),
            rounds: 0,
            orphans_found: Vec::new(),
            deleted: Vec::new(),
            missing: Vec::new(),
            cancelled: false,
        };
        let mut found: BTreeSet<NaturalKey> = BTreeSet::new();

        let executor = BatchExecutor::new(self.remote, self.retry, self.cancel)
            .with_concurrency(self.config.concurrency);
        let batch_size = self.config.batch_size(entity_type);

        for round in 1..=self.config.reconcile.max_rounds {
            let check = self.check(entity_type, &mode).await;
            found.extend(check.orphans());
            if check.cancelled {
                return Ok(self.finish(report, found, &check, true));
            }
            if check.is_clean() {
                return Ok(self.finish(report, found, &check, false));
            }
            if self.options.dry_run {
                tracing::info!(%entity_type, issues = ?check.issues(), "dry run; not cleaning up");
                return Ok(self.finish(report, found, &check, false));
            }

            let orphans = check.orphans();
            if orphans.is_empty() {
                // Only a shortfall or a failed scan: give indexing one more interval.
                tracing::debug!(%entity_type, round, "nothing to delete; waiting for indexing");
                if !self.poller.wait_interval().await {
                    report.cancelled = true;
                    return Ok(self.finish(report, found, &check, true));
                }
                continue;
            }

            report.rounds = round;
            tracing::info!(%entity_type, round, orphans = orphans.len(), "deleting orphans");
            let outcome = executor
                .execute_delete(entity_type, orphans.clone(), batch_size)
                .await?;
            report.deleted.extend(outcome.deleted.iter().cloned());

            let poll = self
                .poller
                .poll_keys(self.remote, entity_type, &orphans, KeyExpectation::Absent)
                .await;
            if !poll.converged() {
                tracing::warn!(
                    %entity_type,
                    round,
                    "orphan removal not yet visible: {}",
                    poll.message()
                );
            }
            if self.cancel.is_cancelled() {
                return Ok(self.finish(report, found, &check, true));
            }
        }

        let check = self.check(entity_type, &mode).await;
        let cancelled = check.cancelled;
        let report = self.finish(report, found, &check, cancelled);
        if !report.clean {
            tracing::warn!(%entity_type, issues = ?report.issues, "reconciliation left issues");
        }
        Ok(report)
    }

    fn finish(
        &self,
        mut report: ReconcileReport,
        found: BTreeSet<NaturalKey>,
        check: &Check,
        cancelled: bool,
    ) -> ReconcileReport {
        report.clean = !cancelled && check.is_clean();
        report.issues = check.issues();
        if cancelled {
            report.issues.push("reconciliation cancelled".to_string());
        }
        report.cancelled = cancelled;
        report.orphans_found = found.into_iter().collect();
        report.missing = check.missing.clone();
        let mut seen = HashSet::new();
        report.deleted.retain(|k| seen.insert(k.clone()));
        report
    }

    async fn check(&self, entity_type: EntityType, mode: &Mode<'_>) -> Check {
        let mut check = Check::default();
        let keys = mode.keys();
        let key_set: HashSet<&NaturalKey> = keys.iter().collect();

        if let Mode::Absent(expected) = mode {
            for chunk in expected.chunks(self.config.poll.sample_batch_size) {
                let label = format!("query {entity_type}");
                let result = self
                    .retry
                    .run(&label, self.cancel, |_| self.remote.query_by_keys(entity_type, chunk))
                    .await;
                match result {
                    Ok(retried) => check.still_present.extend(retried.value.found),
                    Err(RetryError::Cancelled { .. }) => {
                        check.cancelled = true;
                        return check;
                    }
                    Err(err) => check.errors.push(format!("query failed: {err}")),
                }
            }
        }

        let pattern = if self.options.force_full_scan {
            None
        } else {
            match derive_pattern(keys) {
                Some(pattern) => Some(pattern),
                // No key family to look for.
                None => return check,
            }
        };
        check.pattern = pattern.as_ref().map(|p| p.to_string());

        let remote_keys = match self.scan_all(entity_type, pattern.as_ref()).await {
            Ok(keys) => keys,
            Err(RetryError::Cancelled { .. }) => {
                check.cancelled = true;
                return check;
            }
            Err(err) => {
                check.errors.push(format!("scan failed: {err}"));
                return check;
            }
        };

        check.unknown = remote_keys
            .iter()
            .filter(|k| !key_set.contains(k))
            .cloned()
            .collect();
        if let Mode::Desired(desired) = mode {
            let visible: HashSet<&NaturalKey> = remote_keys.iter().collect();
            let mut seen = HashSet::new();
            check.missing = desired
                .iter()
                .filter(|k| !visible.contains(k) && seen.insert(*k))
                .cloned()
                .collect();
        }
        check
    }

    /// Page through every key of `entity_type` matching `pattern`.
    async fn scan_all(
        &self,
        entity_type: EntityType,
        pattern: Option<&KeyPattern>,
    ) -> Result<BTreeSet<NaturalKey>, RetryError> {
        let limit = self.config.reconcile.scan_page_size;
        let mut keys = BTreeSet::new();
        let mut offset = 0;
        loop {
            let page = PageRequest { offset, limit };
            let label = format!("scan {entity_type} @{offset}");
            let page = self
                .retry
                .run(&label, self.cancel, |_| self.remote.scan(entity_type, pattern, page))
                .await?
                .value;

            let received = page.items.len();
            // Re-filter: remotes may treat the pattern as a hint only.
            keys.extend(
                page.items
                    .into_iter()
                    .filter(|k| pattern.map_or(true, |p| p.matches(k))),
            );
            offset += received;
            if received == 0 || offset >= page.total_count {
                break;
            }
        }
        tracing::debug!(%entity_type, matched = keys.len(), "scan complete");
        Ok(keys)
    }
}
