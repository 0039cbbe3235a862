//! # catsync-engine
//!
//! Idempotent synchronization and convergence engine.
//!
//! Call [`pipeline::run`] to ingest, delete or reconcile a desired catalog
//! against a [`CatalogRemote`], or drive an [`Orchestrator`] directly.

pub mod batch;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod pattern;
pub mod pipeline;
pub mod poller;
pub mod reconciler;
pub mod remote;
pub mod retry;
pub mod sorter;

pub use error::{NetworkFault, RemoteError, RetryError, SyncError};
pub use orchestrator::{Orchestrator, PhaseStatus, PhaseSummary, RunSummary, WorkflowKind};
pub use pattern::{derive_pattern, KeyPattern};
pub use pipeline::Workflow;
pub use poller::{ConvergencePoller, KeyExpectation, Observation, PollReport, PollStatus};
pub use reconciler::{ReconcileReport, Reconciler};
pub use remote::CatalogRemote;
pub use retry::RetryPolicy;
