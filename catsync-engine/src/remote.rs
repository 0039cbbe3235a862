//! Boundary contract of the remote catalog service.
//!
//! The wire protocol is an implementation detail of each adapter. Writes are
//! accepted asynchronously: a successful `create` only means "accepted", and
//! the result becomes visible to `query_by_keys` / `scan` after an indexing
//! delay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use catsync_core::{Entity, EntityType, NaturalKey};

use crate::error::RemoteError;
use crate::pattern::KeyPattern;

/// Per-item rejection, reported only by remotes that support it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub key: NaturalKey,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub accepted_count: usize,
    /// `None` when the remote gives no per-item detail.
    #[serde(default)]
    pub rejected: Option<Vec<Rejection>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub accepted_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub found: Vec<NaturalKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPage {
    pub items: Vec<NaturalKey>,
    pub total_count: usize,
}

/// The remote catalog as seen by the engine.
#[async_trait]
pub trait CatalogRemote: Send + Sync {
    async fn create(
        &self,
        entity_type: EntityType,
        batch: &[Entity],
    ) -> Result<CreateResponse, RemoteError>;

    async fn delete(
        &self,
        entity_type: EntityType,
        keys: &[NaturalKey],
    ) -> Result<DeleteResponse, RemoteError>;

    async fn query_by_keys(
        &self,
        entity_type: EntityType,
        keys: &[NaturalKey],
    ) -> Result<QueryResponse, RemoteError>;

    /// One page of keys of a type. `pattern` is a narrowing hint: adapters
    /// may push its prefixes down to the remote, callers always re-filter.
    async fn scan(
        &self,
        entity_type: EntityType,
        pattern: Option<&KeyPattern>,
        page: PageRequest,
    ) -> Result<ScanPage, RemoteError>;
}
