//! Batch executor — chunked remote writes with retry and per-item outcomes.
//!
//! Hierarchical types are submitted strictly in order, one batch at a time,
//! because later batches may reference entities created by earlier ones.
//! Other types may run up to `concurrency` batches at once; their results
//! are folded back in batch order so outcomes stay deterministic.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use catsync_core::config::MAX_BATCH_SIZE;
use catsync_core::{
    BatchReport, Entity, EntityType, ErrorInfo, ItemOutcome, ItemResult, Ledger, NaturalKey,
    OperationOutcome,
};

use crate::error::{RetryError, SyncError};
use crate::remote::CatalogRemote;
use crate::retry::{Retried, RetryPolicy};

/// Result of one submitted batch before it is folded into an outcome.
#[derive(Debug)]
struct BatchResult {
    report: BatchReport,
    items: Vec<ItemOutcome>,
    unconfirmed: Vec<NaturalKey>,
}

impl BatchResult {
    fn uniform(
        index: usize,
        keys: Vec<NaturalKey>,
        attempts: u32,
        item: impl Fn(NaturalKey) -> ItemOutcome,
    ) -> Self {
        let size = keys.len();
        Self {
            report: BatchReport {
                index,
                size,
                attempts,
                accepted: 0,
                rejected: 0,
            },
            items: keys.into_iter().map(item).collect(),
            unconfirmed: Vec::new(),
        }
    }

    fn skipped(index: usize, keys: Vec<NaturalKey>, attempts: u32) -> Self {
        Self::uniform(index, keys, attempts, |key| ItemOutcome::ok(key, ItemResult::Skipped))
    }

    fn failed(index: usize, keys: Vec<NaturalKey>, err: &RetryError) -> Self {
        let info = err.to_error_info();
        let mut result = Self::uniform(index, keys, err.attempts(), |key| {
            ItemOutcome::failed(key, info.clone())
        });
        result.report.rejected = result.report.size;
        result
    }
}

/// Applies remote writes to ordered entity collections.
pub struct BatchExecutor<'a> {
    remote: &'a dyn CatalogRemote,
    retry: &'a RetryPolicy,
    cancel: &'a CancellationToken,
    concurrency: usize,
    dry_run: bool,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        remote: &'a dyn CatalogRemote,
        retry: &'a RetryPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            remote,
            retry,
            cancel,
            concurrency: 1,
            dry_run: false,
        }
    }

    /// Worker pool size for non-hierarchical types.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Report everything that would be submitted as `Skipped` without calling the remote.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Create `entities` (already dependency-sorted).
    ///
    /// Keys the ledger already records are reported `Existing` and never
    /// resubmitted. The ledger is only read here.
    pub async fn execute_create(
        &self,
        entity_type: EntityType,
        entities: Vec<Entity>,
        ledger: &Ledger,
        batch_size: usize,
    ) -> Result<OperationOutcome, SyncError> {
        check_batch_size(entity_type, batch_size)?;

        let mut outcome = OperationOutcome::default();
        let mut seen = HashSet::new();
        let mut pending = Vec::with_capacity(entities.len());
        for entity in entities {
            if !seen.insert(entity.key.clone()) {
                tracing::warn!(
                    %entity_type,
                    key = %entity.key,
                    "duplicate key in input; submitting once",
                );
                continue;
            }
            if ledger.has(entity_type, &entity.key) {
                outcome.record(ItemOutcome::ok(entity.key, ItemResult::Existing));
            } else {
                pending.push(entity);
            }
        }

        tracing::debug!(
            %entity_type,
            existing = outcome.existing.len(),
            pending = pending.len(),
            "filtered against ledger",
        );

        if self.dry_run {
            for entity in pending {
                outcome.record(ItemOutcome::ok(entity.key, ItemResult::Skipped));
            }
            return Ok(outcome);
        }

        let chunks = into_chunks(pending, batch_size);
        let results = self
            .run_batches(entity_type, chunks, |index, chunk| {
                self.create_batch(entity_type, index, chunk)
            })
            .await;
        fold(&mut outcome, results);
        Ok(outcome)
    }

    /// Delete `keys`, in the given order for hierarchical types.
    pub async fn execute_delete(
        &self,
        entity_type: EntityType,
        keys: Vec<NaturalKey>,
        batch_size: usize,
    ) -> Result<OperationOutcome, SyncError> {
        check_batch_size(entity_type, batch_size)?;

        let mut seen = HashSet::new();
        let keys: Vec<NaturalKey> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let mut outcome = OperationOutcome::default();
        if self.dry_run {
            for key in keys {
                outcome.record(ItemOutcome::ok(key, ItemResult::Skipped));
            }
            return Ok(outcome);
        }

        let chunks = into_chunks(keys, batch_size);
        let results = self
            .run_batches(entity_type, chunks, |index, chunk| {
                self.delete_batch(entity_type, index, chunk)
            })
            .await;
        fold(&mut outcome, results);
        Ok(outcome)
    }

    async fn run_batches<T, F, Fut>(
        &self,
        entity_type: EntityType,
        chunks: Vec<Vec<T>>,
        run: F,
    ) -> Vec<BatchResult>
    where
        F: Fn(usize, Vec<T>) -> Fut,
        Fut: Future<Output = BatchResult>,
    {
        let total = chunks.len();
        tracing::debug!(
            %entity_type,
            batches = total,
            concurrency = self.concurrency,
            "submitting",
        );

        if entity_type.is_hierarchical() || self.concurrency == 1 {
            let mut results = Vec::with_capacity(total);
            for (index, chunk) in chunks.into_iter().enumerate() {
                results.push(run(index, chunk).await);
            }
            return results;
        }

        let mut results: Vec<BatchResult> = stream::iter(chunks.into_iter().enumerate())
            .map(|(index, chunk)| run(index, chunk))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|r| r.report.index);
        results
    }

    async fn create_batch(
        &self,
        entity_type: EntityType,
        index: usize,
        chunk: Vec<Entity>,
    ) -> BatchResult {
        let keys: Vec<NaturalKey> = chunk.iter().map(|e| e.key.clone()).collect();
        if self.cancel.is_cancelled() {
            return BatchResult::skipped(index, keys, 0);
        }

        let label = format!("create {entity_type} batch {index}");
        let response = self
            .retry
            .run(&label, self.cancel, |_| self.remote.create(entity_type, &chunk))
            .await;

        let Retried { value, attempts } = match response {
            Ok(retried) => retried,
            Err(RetryError::Cancelled { attempts }) => {
                return BatchResult::skipped(index, keys, attempts);
            }
            Err(err) => {
                tracing::warn!(%entity_type, batch = index, error = %err, "batch failed");
                return BatchResult::failed(index, keys, &err);
            }
        };

        let size = keys.len();
        let mut result = BatchResult {
            report: BatchReport {
                index,
                size,
                attempts,
                accepted: value.accepted_count.min(size),
                rejected: size.saturating_sub(value.accepted_count),
            },
            items: Vec::with_capacity(size),
            unconfirmed: Vec::new(),
        };

        let detailed = value.rejected.is_some();
        let batch_keys: HashSet<&NaturalKey> = keys.iter().collect();
        let mut rejected: HashMap<NaturalKey, String> = HashMap::new();
        for rejection in value.rejected.unwrap_or_default() {
            if batch_keys.contains(&rejection.key) {
                rejected.insert(rejection.key, rejection.error);
            } else {
                tracing::warn!(
                    %entity_type,
                    key = %rejection.key,
                    "rejection for a key not in the batch",
                );
            }
        }

        // Keys neither rejected nor covered by the accepted count cannot be
        // attributed, so none of the unrejected keys count as created.
        let unattributed = size - rejected.len() > value.accepted_count;
        if unattributed {
            tracing::warn!(
                %entity_type,
                batch = index,
                accepted = value.accepted_count,
                rejected = rejected.len(),
                size,
                detailed,
                "partial acceptance without per-item detail; batch marked failed",
            );
        } else {
            result.report.rejected = rejected.len();
            result.report.accepted = size - rejected.len();
        }

        let shortfall = ErrorInfo {
            message: format!(
                "remote accepted {} of {size} items without per-item detail",
                value.accepted_count
            ),
            status: None,
            attempts,
        };
        for key in keys {
            let item = match rejected.remove(&key) {
                Some(message) => {
                    let info = ErrorInfo {
                        message,
                        status: None,
                        attempts,
                    };
                    ItemOutcome::failed(key, info)
                }
                None if unattributed => {
                    result.unconfirmed.push(key.clone());
                    ItemOutcome::failed(key, shortfall.clone())
                }
                None => ItemOutcome::ok(key, ItemResult::Created),
            };
            result.items.push(item);
        }

        tracing::debug!(
            %entity_type,
            batch = index,
            size,
            attempts,
            accepted = result.report.accepted,
            "batch done",
        );
        result
    }

    async fn delete_batch(
        &self,
        entity_type: EntityType,
        index: usize,
        chunk: Vec<NaturalKey>,
    ) -> BatchResult {
        if self.cancel.is_cancelled() {
            return BatchResult::skipped(index, chunk, 0);
        }

        let label = format!("delete {entity_type} batch {index}");
        let response = self
            .retry
            .run(&label, self.cancel, |_| self.remote.delete(entity_type, &chunk))
            .await;

        match response {
            Ok(Retried { value, attempts }) => {
                let size = chunk.len();
                if value.accepted_count >= size {
                    let mut result = BatchResult::uniform(index, chunk, attempts, |key| {
                        ItemOutcome::ok(key, ItemResult::Deleted)
                    });
                    result.report.accepted = size;
                    return result;
                }
                let info = ErrorInfo {
                    message: format!("remote accepted {} of {size} deletes", value.accepted_count),
                    status: None,
                    attempts,
                };
                let mut result = BatchResult::uniform(index, chunk.clone(), attempts, |key| {
                    ItemOutcome::failed(key, info.clone())
                });
                result.report.accepted = value.accepted_count;
                result.report.rejected = size - value.accepted_count;
                result.unconfirmed = chunk;
                result
            }
            Err(RetryError::Cancelled { attempts }) => BatchResult::skipped(index, chunk, attempts),
            Err(err) => {
                tracing::warn!(%entity_type, batch = index, error = %err, "delete batch failed");
                BatchResult::failed(index, chunk, &err)
            }
        }
    }
}

fn check_batch_size(entity_type: EntityType, size: usize) -> Result<(), SyncError> {
    if size == 0 || size > MAX_BATCH_SIZE {
        return Err(SyncError::InvalidBatchSize {
            entity_type,
            size,
            max: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}

fn into_chunks<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

fn fold(outcome: &mut OperationOutcome, results: Vec<BatchResult>) {
    for result in results {
        for item in result.items {
            outcome.record(item);
        }
        outcome.unconfirmed.extend(result.unconfirmed);
        outcome.batches.push(result.report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use catsync_core::RetryConfig;
    use tempfile::TempDir;
    use tokio::time::Instant;

    use crate::error::RemoteError;
    use crate::memory::{InMemoryRemote, Operation};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig::default()).unwrap()
    }

    fn products(n: usize) -> Vec<Entity> {
        (1..=n)
            .map(|i| Entity::new(EntityType::Product, format!("P{i:03}")))
            .collect()
    }

    fn ledger() -> (TempDir, Ledger) {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::empty(dir.path().join("ledger.json"));
        (dir, ledger)
    }

    #[test]
    fn chunks_are_bounded_and_ordered() {
        let chunks = into_chunks((0..120).collect::<Vec<_>>(), 50);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, [50, 50, 20]);
        assert_eq!(chunks[1][0], 50);
        assert!(into_chunks(Vec::<u8>::new(), 10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_batch_recovers_after_two_503s() {
        // P051 is the first key of batch 2.
        let remote = InMemoryRemote::new().with_failures_for_batch_containing(
            "P051",
            vec![
                RemoteError::status(503, "unavailable"),
                RemoteError::status(503, "unavailable"),
            ],
        );
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, ledger) = ledger();

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .with_concurrency(5)
            .execute_create(EntityType::Product, products(120), &ledger, 50)
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.created.len(), 120);
        let sizes: Vec<usize> = outcome.batches.iter().map(|b| b.size).collect();
        assert_eq!(sizes, [50, 50, 20]);
        assert_eq!(outcome.batches[1].attempts, 3);
        assert_eq!(outcome.batches[0].attempts, 1);
        assert_eq!(remote.call_count(Operation::Create, EntityType::Product), 5);
    }

    #[tokio::test]
    async fn ledger_keys_are_existing_and_never_resubmitted() {
        let remote = InMemoryRemote::new();
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, mut ledger) = ledger();
        ledger.add(EntityType::Product, "P001".into());
        ledger.add(EntityType::Product, "P002".into());

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .execute_create(EntityType::Product, products(3), &ledger, 50)
            .await
            .unwrap();

        assert_eq!(outcome.existing, vec![NaturalKey::from("P001"), "P002".into()]);
        assert_eq!(outcome.created, vec![NaturalKey::from("P003")]);
        assert_eq!(remote.submitted_keys(EntityType::Product), vec![NaturalKey::from("P003")]);
    }

    #[tokio::test]
    async fn per_item_rejections_are_attributed() {
        let remote = InMemoryRemote::new().with_rejections(&["P002"], "missing category");
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, ledger) = ledger();

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .execute_create(EntityType::Product, products(3), &ledger, 50)
            .await
            .unwrap();

        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].key.as_str(), "P002");
        assert_eq!(outcome.failed[0].error.message, "missing category");
        assert!(outcome.unconfirmed.is_empty());
        assert_eq!(outcome.batches[0].accepted, 2);
        assert_eq!(outcome.batches[0].rejected, 1);
    }

    #[tokio::test]
    async fn unattributed_shortfall_fails_unrejected_keys() {
        // P003 is dropped silently: the count says 1 accepted, the rejection
        // list names only P002.
        let remote = InMemoryRemote::new()
            .with_rejections(&["P002"], "missing category")
            .with_silent_drops(&["P003"]);
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, ledger) = ledger();

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .execute_create(EntityType::Product, products(3), &ledger, 50)
            .await
            .unwrap();

        assert!(outcome.created.is_empty());
        assert_eq!(outcome.failed.len(), 3);
        let p002 = outcome.failed.iter().find(|f| f.key.as_str() == "P002").unwrap();
        assert_eq!(p002.error.message, "missing category");
        assert_eq!(
            outcome.unconfirmed,
            vec![NaturalKey::from("P001"), "P003".into()]
        );
        assert_eq!(outcome.batches[0].accepted, 1);
        assert_eq!(outcome.batches[0].rejected, 2);
    }

    #[tokio::test]
    async fn empty_rejection_list_with_short_count_is_not_created() {
        let remote = InMemoryRemote::new().with_silent_drops(&["P002"]);
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, ledger) = ledger();

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .execute_create(EntityType::Product, products(2), &ledger, 50)
            .await
            .unwrap();

        assert!(!outcome.success());
        assert!(outcome.created.is_empty());
        assert_eq!(outcome.unconfirmed.len(), 2);
        assert_eq!(
            outcome.failed[0].error.message,
            "remote accepted 1 of 2 items without per-item detail"
        );
    }

    #[tokio::test]
    async fn aggregate_partial_acceptance_fails_whole_batch() {
        let remote = InMemoryRemote::new()
            .with_rejections(&["P002"], "missing category")
            .with_aggregate_only_responses();
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, ledger) = ledger();

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .execute_create(EntityType::Product, products(3), &ledger, 50)
            .await
            .unwrap();

        assert!(outcome.created.is_empty());
        assert_eq!(outcome.failed.len(), 3);
        assert_eq!(outcome.unconfirmed.len(), 3);
        assert_eq!(outcome.batches[0].accepted, 2);
        assert_eq!(outcome.batches[0].rejected, 1);
    }

    #[tokio::test]
    async fn client_error_fails_batch_without_retry() {
        let remote = InMemoryRemote::new().with_failures(
            Operation::Create,
            EntityType::Category,
            vec![RemoteError::status(400, "bad payload")],
        );
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, ledger) = ledger();
        let categories = vec![
            Entity::new(EntityType::Category, "A"),
            Entity::new(EntityType::Category, "B").with_parent("A"),
        ];

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .execute_create(EntityType::Category, categories, &ledger, 1)
            .await
            .unwrap();

        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].key.as_str(), "A");
        assert_eq!(outcome.failed[0].error.status, Some(400));
        assert_eq!(outcome.failed[0].error.attempts, 1);
        assert_eq!(outcome.created, vec![NaturalKey::from("B")]);
    }

    #[tokio::test]
    async fn hierarchical_batches_are_sequential_in_order() {
        let remote = InMemoryRemote::new();
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, ledger) = ledger();
        let categories: Vec<Entity> = (0..10)
            .map(|i| Entity::new(EntityType::Category, format!("C{i}")))
            .collect();

        BatchExecutor::new(&remote, &retry, &cancel)
            .with_concurrency(8)
            .execute_create(EntityType::Category, categories, &ledger, 3)
            .await
            .unwrap();

        let submitted: Vec<String> = remote
            .submitted_keys(EntityType::Category)
            .into_iter()
            .map(|k| k.0)
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("C{i}")).collect();
        assert_eq!(submitted, expected);
        assert_eq!(remote.batch_sizes(Operation::Create, EntityType::Category), [3, 3, 3, 1]);
    }

    #[tokio::test]
    async fn dry_run_submits_nothing() {
        let remote = InMemoryRemote::new();
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, ledger) = ledger();

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .with_dry_run(true)
            .execute_create(EntityType::Product, products(4), &ledger, 50)
            .await
            .unwrap();

        assert_eq!(outcome.skipped.len(), 4);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_executor_skips_remaining_batches() {
        let remote = InMemoryRemote::new();
        let retry = policy();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_dir, ledger) = ledger();

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .execute_create(EntityType::Product, products(4), &ledger, 2)
            .await
            .unwrap();

        assert_eq!(outcome.skipped.len(), 4);
        assert!(outcome.success());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_batch_size_is_a_client_bug() {
        let remote = InMemoryRemote::new();
        let retry = policy();
        let cancel = CancellationToken::new();
        let (_dir, ledger) = ledger();
        let executor = BatchExecutor::new(&remote, &retry, &cancel);

        for size in [0, MAX_BATCH_SIZE + 1] {
            let err = executor
                .execute_create(EntityType::Product, products(1), &ledger, size)
                .await
                .unwrap_err();
            assert!(matches!(err, SyncError::InvalidBatchSize { .. }));
        }
    }

    #[tokio::test]
    async fn deletes_report_deleted_items() {
        let remote = InMemoryRemote::new().with_existing(EntityType::Price, &["X1", "X2", "X3"]);
        let retry = policy();
        let cancel = CancellationToken::new();
        let keys: Vec<NaturalKey> = ["X1", "X2", "X3", "X1"]
            .into_iter()
            .map(NaturalKey::from)
            .collect();

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .execute_delete(EntityType::Price, keys, 2)
            .await
            .unwrap();

        assert_eq!(outcome.deleted.len(), 3);
        assert_eq!(remote.batch_sizes(Operation::Delete, EntityType::Price), [2, 1]);
        remote.flush();
        assert!(remote.visible_keys(EntityType::Price).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_every_item_with_attempt_count() {
        let remote = InMemoryRemote::new().with_failures(
            Operation::Delete,
            EntityType::Price,
            vec![RemoteError::status(502, "bad gateway"); 4],
        );
        let retry = policy();
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let outcome = BatchExecutor::new(&remote, &retry, &cancel)
            .execute_delete(EntityType::Price, vec!["X1".into(), "X2".into()], 50)
            .await
            .unwrap();

        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.failed.iter().all(|f| f.error.attempts == 4));
        assert_eq!(outcome.batches[0].attempts, 4);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
