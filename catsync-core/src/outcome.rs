//! Per-item and per-batch outcome accounting.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::NaturalKey;

/// What happened to one entity during a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemResult {
    Created,
    Existing,
    Deleted,
    Failed,
    Skipped,
}

impl fmt::Display for ItemResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemResult::Created => "created",
            ItemResult::Existing => "existing",
            ItemResult::Deleted => "deleted",
            ItemResult::Failed => "failed",
            ItemResult::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Error detail attached to a failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Attempts spent on the call that produced this error.
    pub attempts: u32,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            attempts: 1,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub key: NaturalKey,
    pub result: ItemResult,
    pub error: Option<ErrorInfo>,
}

impl ItemOutcome {
    pub fn ok(key: NaturalKey, result: ItemResult) -> Self {
        Self {
            key,
            result,
            error: None,
        }
    }

    pub fn failed(key: NaturalKey, error: ErrorInfo) -> Self {
        Self {
            key,
            result: ItemResult::Failed,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub key: NaturalKey,
    pub error: ErrorInfo,
}

/// Aggregate view of one submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub index: usize,
    pub size: usize,
    pub attempts: u32,
    pub accepted: usize,
    pub rejected: usize,
}

/// Accumulated outcomes for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub created: Vec<NaturalKey>,
    pub existing: Vec<NaturalKey>,
    pub deleted: Vec<NaturalKey>,
    pub failed: Vec<FailedItem>,
    pub skipped: Vec<NaturalKey>,
    /// Keys from partially accepted batches the remote gave no per-item
    /// detail for. They are also listed in `failed` until confirmed.
    pub unconfirmed: Vec<NaturalKey>,
    pub batches: Vec<BatchReport>,
}

/// Item counts of an [`OperationOutcome`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub created: usize,
    pub existing: usize,
    pub deleted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl OperationOutcome {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn record(&mut self, item: ItemOutcome) {
        match item.result {
            ItemResult::Created => self.created.push(item.key),
            ItemResult::Existing => self.existing.push(item.key),
            ItemResult::Deleted => self.deleted.push(item.key),
            ItemResult::Skipped => self.skipped.push(item.key),
            ItemResult::Failed => self.failed.push(FailedItem {
                key: item.key,
                error: item
                    .error
                    .unwrap_or_else(|| ErrorInfo::new("unspecified failure")),
            }),
        }
    }

    pub fn merge(&mut self, other: OperationOutcome) {
        self.created.extend(other.created);
        self.existing.extend(other.existing);
        self.deleted.extend(other.deleted);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
        self.unconfirmed.extend(other.unconfirmed);
        self.batches.extend(other.batches);
    }

    /// Move a key confirmed after the fact from `failed`/`unconfirmed` to `created`.
    ///
    /// Returns `false` if the key was not unconfirmed.
    pub fn promote(&mut self, key: &NaturalKey) -> bool {
        let Some(pos) = self.unconfirmed.iter().position(|k| k == key) else {
            return false;
        };
        self.unconfirmed.remove(pos);
        self.failed.retain(|f| &f.key != key);
        self.created.push(key.clone());
        true
    }

    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts {
            created: self.created.len(),
            existing: self.existing.len(),
            deleted: self.deleted.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
        }
    }

    /// Total attempts spent across all batches.
    pub fn attempts(&self) -> u32 {
        self.batches.iter().map(|b| b.attempts).sum()
    }
}
