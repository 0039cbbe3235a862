//! Error types for catsync-engine.

use std::fmt;

use thiserror::Error;

use catsync_core::{ConfigError, EntityType, ErrorInfo, LedgerError};

/// Network-level fault classes. All of them are retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFault {
    ConnectionReset,
    ConnectionRefused,
    Timeout,
    Dns,
}

impl fmt::Display for NetworkFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkFault::ConnectionReset => "connection reset",
            NetworkFault::ConnectionRefused => "connection refused",
            NetworkFault::Timeout => "timed out",
            NetworkFault::Dns => "DNS resolution failed",
        };
        f.write_str(s)
    }
}

/// A failed call to the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(NetworkFault),

    #[error("remote returned status {code}: {message}")]
    Status { code: u16, message: String },

    /// The remote answered with something we could not interpret.
    #[error("remote protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        RemoteError::Status {
            code,
            message: message.into(),
        }
    }

    /// Network faults and 429/500/502/503/504 are retryable; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network(_) => true,
            RemoteError::Status { code, .. } => matches!(code, 429 | 500 | 502 | 503 | 504),
            RemoteError::Protocol(_) => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: RemoteError },

    #[error("non-retryable failure on attempt {attempts}: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Fatal { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    pub fn remote_error(&self) -> Option<&RemoteError> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::Fatal { source, .. } => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }

    /// Flatten into the per-item error record.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            message: self.to_string(),
            status: self.remote_error().and_then(RemoteError::status_code),
            attempts: self.attempts(),
        }
    }
}

/// Type-level or ledger-level failures that unwind to the caller.
///
/// Per-item failures never surface here; they are collected in outcomes.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid batch size {size} for {entity_type} (allowed 1..={max})")]
    InvalidBatchSize {
        entity_type: EntityType,
        size: usize,
        max: usize,
    },
}
