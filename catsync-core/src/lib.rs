//! catsync core library — domain types, ledger persistence, config, errors.
//!
//! - [`types`] — entity types, natural keys, desired state
//! - [`outcome`] — per-item / per-batch outcome accounting
//! - [`ledger`] — persisted idempotency ledger
//! - [`config`] — YAML sync configuration and run options
//! - [`error`] — [`LedgerError`], [`ConfigError`], [`CatalogError`]

pub mod config;
pub mod error;
pub mod ledger;
pub mod outcome;
pub mod types;

pub use config::{PollConfig, ReconcileConfig, RetryConfig, RunOptions, SyncConfig};
pub use error::{CatalogError, ConfigError, LedgerError};
pub use ledger::Ledger;
pub use outcome::{BatchReport, ErrorInfo, FailedItem, ItemOutcome, ItemResult, OperationOutcome};
pub use types::{DesiredState, Entity, EntityType, NaturalKey};
