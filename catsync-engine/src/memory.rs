//! Deterministic, eventually consistent in-memory remote catalog.
//!
//! Writes are accepted immediately but only become visible to reads after
//! `indexing_lag` further read calls (`query_by_keys` / `scan`). Failures
//! are injected through builder methods; every call is recorded.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use catsync_core::config::MAX_BATCH_SIZE;
use catsync_core::{Entity, EntityType, NaturalKey};

use crate::error::RemoteError;
use crate::pattern::KeyPattern;
use crate::remote::{
    CatalogRemote, CreateResponse, DeleteResponse, PageRequest, QueryResponse, Rejection,
    ScanPage,
};

/// Remote operation kinds, used for scripting failures and inspecting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Delete,
    Query,
    Scan,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub entity_type: EntityType,
    pub keys: Vec<NaturalKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Upsert,
    Remove,
}

#[derive(Debug)]
struct Pending {
    entity_type: EntityType,
    key: NaturalKey,
    change: Change,
    visible_at: u64,
}

#[derive(Debug, Default)]
struct State {
    visible: BTreeMap<EntityType, BTreeSet<NaturalKey>>,
    pending: Vec<Pending>,
    reads: u64,
    indexing_lag: u64,
    scripted: HashMap<(Operation, EntityType), VecDeque<RemoteError>>,
    scripted_for_key: HashMap<NaturalKey, VecDeque<RemoteError>>,
    rejected: HashMap<NaturalKey, String>,
    aggregate_only: bool,
    dropped: HashSet<NaturalKey>,
    undeletable: HashSet<NaturalKey>,
    calls: Vec<Call>,
}

impl State {
    /// Advance the read clock and publish every change that is now due.
    fn tick_reads(&mut self) {
        self.reads += 1;
        let now = self.reads;
        let (due, later): (Vec<Pending>, Vec<Pending>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.visible_at <= now);
        self.pending = later;
        for change in due {
            let keys = self.visible.entry(change.entity_type).or_default();
            match change.change {
                Change::Upsert => {
                    keys.insert(change.key);
                }
                Change::Remove => {
                    keys.remove(&change.key);
                }
            }
        }
    }

    fn enqueue(&mut self, entity_type: EntityType, key: NaturalKey, change: Change) {
        let visible_at = self.reads + self.indexing_lag + 1;
        self.pending.push(Pending {
            entity_type,
            key,
            change,
            visible_at,
        });
    }

    fn scripted_failure(
        &mut self,
        operation: Operation,
        entity_type: EntityType,
    ) -> Option<RemoteError> {
        self.scripted
            .get_mut(&(operation, entity_type))
            .and_then(VecDeque::pop_front)
    }

    fn visible_of(&self, entity_type: EntityType) -> impl Iterator<Item = &NaturalKey> {
        self.visible.get(&entity_type).into_iter().flatten()
    }
}

/// In-memory [`CatalogRemote`] with indexing lag and failure injection.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- builder ------------------------------------------------------------

    /// Hide every write from the next `reads` read calls.
    pub fn with_indexing_lag(self, reads: u64) -> Self {
        self.state().indexing_lag = reads;
        self
    }

    /// Keys that already exist remotely and are immediately visible.
    pub fn with_existing(self, entity_type: EntityType, keys: &[&str]) -> Self {
        {
            let mut state = self.state();
            let visible = state.visible.entry(entity_type).or_default();
            visible.extend(keys.iter().map(|k| NaturalKey::from(*k)));
        }
        self
    }

    /// The next calls of `operation` on `entity_type` fail with `errors`, in order.
    pub fn with_failures(
        self,
        operation: Operation,
        entity_type: EntityType,
        errors: Vec<RemoteError>,
    ) -> Self {
        self.state()
            .scripted
            .entry((operation, entity_type))
            .or_default()
            .extend(errors);
        self
    }

    /// The next create calls whose batch contains `key` fail with `errors`.
    pub fn with_failures_for_batch_containing(self, key: &str, errors: Vec<RemoteError>) -> Self {
        self.state()
            .scripted_for_key
            .entry(NaturalKey::from(key))
            .or_default()
            .extend(errors);
        self
    }

    /// Reject `keys` on create. They are never stored.
    pub fn with_rejections(self, keys: &[&str], message: &str) -> Self {
        {
            let mut state = self.state();
            for key in keys {
                state.rejected.insert(NaturalKey::from(*key), message.to_string());
            }
        }
        self
    }

    /// Report only an accepted count on create, never per-item rejections.
    pub fn with_aggregate_only_responses(self) -> Self {
        self.state().aggregate_only = true;
        self
    }

    /// Drop `keys` on create without listing them as rejections; only the
    /// accepted count reflects them.
    pub fn with_silent_drops(self, keys: &[&str]) -> Self {
        self.state()
            .dropped
            .extend(keys.iter().map(|k| NaturalKey::from(*k)));
        self
    }

    /// Deletes of `keys` are acknowledged but never take effect.
    pub fn with_undeletable(self, keys: &[&str]) -> Self {
        self.state()
            .undeletable
            .extend(keys.iter().map(|k| NaturalKey::from(*k)));
        self
    }

    // -- inspection ---------------------------------------------------------

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, operation: Operation, entity_type: EntityType) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation && c.entity_type == entity_type)
            .count()
    }

    /// Sizes of the batches sent for `operation`, in call order.
    pub fn batch_sizes(&self, operation: Operation, entity_type: EntityType) -> Vec<usize> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation && c.entity_type == entity_type)
            .map(|c| c.keys.len())
            .collect()
    }

    /// Every key ever submitted in a create call, in submission order.
    pub fn submitted_keys(&self, entity_type: EntityType) -> Vec<NaturalKey> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == Operation::Create && c.entity_type == entity_type)
            .flat_map(|c| c.keys.iter().cloned())
            .collect()
    }

    /// Currently visible keys. Does not advance the read clock.
    pub fn visible_keys(&self, entity_type: EntityType) -> BTreeSet<NaturalKey> {
        self.state().visible_of(entity_type).cloned().collect()
    }

    /// Publish every pending change now.
    pub fn flush(&self) {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.pending);
        for change in pending {
            let keys = state.visible.entry(change.entity_type).or_default();
            match change.change {
                Change::Upsert => {
                    keys.insert(change.key);
                }
                Change::Remove => {
                    keys.remove(&change.key);
                }
            }
        }
    }
}

fn oversized(len: usize) -> Option<RemoteError> {
    (len > MAX_BATCH_SIZE).then(|| {
        RemoteError::status(413, format!("batch of {len} exceeds limit {MAX_BATCH_SIZE}"))
    })
}

#[async_trait]
impl CatalogRemote for InMemoryRemote {
    async fn create(
        &self,
        entity_type: EntityType,
        batch: &[Entity],
    ) -> Result<CreateResponse, RemoteError> {
        let mut state = self.state();
        let keys: Vec<NaturalKey> = batch.iter().map(|e| e.key.clone()).collect();
        state.calls.push(Call {
            operation: Operation::Create,
            entity_type,
            keys: keys.clone(),
        });

        if let Some(err) = oversized(batch.len()) {
            return Err(err);
        }
        if let Some(err) = state.scripted_failure(Operation::Create, entity_type) {
            return Err(err);
        }
        for key in &keys {
            if let Some(err) = state.scripted_for_key.get_mut(key).and_then(VecDeque::pop_front) {
                return Err(err);
            }
        }

        let mut rejected = Vec::new();
        let mut dropped = 0;
        for key in keys {
            if state.dropped.contains(&key) {
                dropped += 1;
                continue;
            }
            match state.rejected.get(&key).cloned() {
                Some(error) => rejected.push(Rejection { key, error }),
                None => state.enqueue(entity_type, key, Change::Upsert),
            }
        }

        let accepted_count = batch.len() - rejected.len() - dropped;
        let rejected = if state.aggregate_only {
            None
        } else {
            Some(rejected)
        };
        Ok(CreateResponse {
            accepted_count,
            rejected,
        })
    }

    async fn delete(
        &self,
        entity_type: EntityType,
        keys: &[NaturalKey],
    ) -> Result<DeleteResponse, RemoteError> {
        let mut state = self.state();
        state.calls.push(Call {
            operation: Operation::Delete,
            entity_type,
            keys: keys.to_vec(),
        });

        if let Some(err) = oversized(keys.len()) {
            return Err(err);
        }
        if let Some(err) = state.scripted_failure(Operation::Delete, entity_type) {
            return Err(err);
        }

        for key in keys {
            if !state.undeletable.contains(key) {
                state.enqueue(entity_type, key.clone(), Change::Remove);
            }
        }
        Ok(DeleteResponse {
            accepted_count: keys.len(),
        })
    }

    async fn query_by_keys(
        &self,
        entity_type: EntityType,
        keys: &[NaturalKey],
    ) -> Result<QueryResponse, RemoteError> {
        let mut state = self.state();
        state.calls.push(Call {
            operation: Operation::Query,
            entity_type,
            keys: keys.to_vec(),
        });

        if let Some(err) = oversized(keys.len()) {
            return Err(err);
        }
        if let Some(err) = state.scripted_failure(Operation::Query, entity_type) {
            return Err(err);
        }

        state.tick_reads();
        let visible = state.visible.get(&entity_type);
        let found = keys
            .iter()
            .filter(|k| visible.is_some_and(|v| v.contains(*k)))
            .cloned()
            .collect();
        Ok(QueryResponse { found })
    }

    async fn scan(
        &self,
        entity_type: EntityType,
        pattern: Option<&KeyPattern>,
        page: PageRequest,
    ) -> Result<ScanPage, RemoteError> {
        let mut state = self.state();
        state.calls.push(Call {
            operation: Operation::Scan,
            entity_type,
            keys: Vec::new(),
        });

        if let Some(err) = state.scripted_failure(Operation::Scan, entity_type) {
            return Err(err);
        }

        state.tick_reads();
        let matching: Vec<NaturalKey> = state
            .visible_of(entity_type)
            .filter(|k| pattern.map_or(true, |p| p.matches(k)))
            .cloned()
            .collect();
        let total_count = matching.len();
        let items = matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok(ScanPage { items, total_count })
    }
}
