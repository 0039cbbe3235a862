//! Sync configuration — one YAML document per remote tenant.
//!
//! Every component gets its own explicit config struct; the whole document
//! is validated once, right after loading. All sections have defaults, so a
//! file containing only `tenant:` is a valid configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::EntityType;

/// Largest batch any remote endpoint accepts.
pub const MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const MAX_CONCURRENCY: usize = 16;

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Component configs
// ---------------------------------------------------------------------------

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > 10 {
            return Err(ConfigError::invalid("retry.max_retries", "must be at most 10"));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid(
                "retry.jitter_factor",
                "must be within [0, 1]",
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must not be smaller than initial_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Convergence polling cadence and ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    pub max_attempts: u32,
    /// Keys checked per remote query when sampling a key-set target.
    pub sample_batch_size: usize,
    /// Sliding-window size used for rate / ETA estimation.
    pub window: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10_000),
            max_attempts: 60,
            sample_batch_size: DEFAULT_BATCH_SIZE,
            window: 5,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid("poll.interval_ms", "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("poll.max_attempts", "must be at least 1"));
        }
        if self.sample_batch_size == 0 || self.sample_batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::invalid(
                "poll.sample_batch_size",
                format!("must be within 1..={MAX_BATCH_SIZE}"),
            ));
        }
        if self.window < 2 {
            return Err(ConfigError::invalid("poll.window", "must be at least 2"));
        }
        Ok(())
    }

    /// Hard ceiling on how long one polling loop may take.
    pub fn ceiling(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

/// Orphan reconciliation rounds and scan paging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub max_rounds: u32,
    pub scan_page_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            scan_page_size: MAX_BATCH_SIZE,
        }
    }
}

impl ReconcileConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::invalid("reconcile.max_rounds", "must be at least 1"));
        }
        if self.scan_page_size == 0 {
            return Err(ConfigError::invalid(
                "reconcile.scan_page_size",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Where the remote catalog lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Environment variable holding a bearer token, if the remote needs one.
    pub token_env: Option<String>,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            token_env: None,
            timeout: Duration::from_millis(30_000),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level document
// ---------------------------------------------------------------------------

/// Root of a `catsync.yaml` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub tenant: String,
    pub remote: RemoteConfig,
    pub ledger_path: Option<PathBuf>,
    /// Convergence timeouts are fatal for this type only.
    pub primary_type: EntityType,
    /// Worker pool size for non-hierarchical types.
    pub concurrency: usize,
    pub batch_sizes: BTreeMap<EntityType, usize>,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    pub reconcile: ReconcileConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tenant: "default".to_string(),
            remote: RemoteConfig::default(),
            ledger_path: None,
            primary_type: EntityType::Product,
            concurrency: 5,
            batch_sizes: BTreeMap::new(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load and validate a YAML config.
    ///
    /// Returns `ConfigError::NotFound` if absent and `ConfigError::Parse`
    /// (with path + line context) if malformed.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SyncConfig =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tenant.trim().is_empty() {
            return Err(ConfigError::invalid("tenant", "must not be empty"));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::invalid(
                "concurrency",
                format!("must be within 1..={MAX_CONCURRENCY}"),
            ));
        }
        for (ty, size) in &self.batch_sizes {
            if *size == 0 || *size > MAX_BATCH_SIZE {
                return Err(ConfigError::invalid(
                    format!("batch_sizes.{ty}"),
                    format!("must be within 1..={MAX_BATCH_SIZE}"),
                ));
            }
        }
        self.retry.validate()?;
        self.poll.validate()?;
        self.reconcile.validate()?;
        Ok(())
    }

    pub fn batch_size(&self, entity_type: EntityType) -> usize {
        self.batch_sizes
            .get(&entity_type)
            .copied()
            .unwrap_or(DEFAULT_BATCH_SIZE)
    }
}

/// Per-run switches, typically mapped one-to-one from CLI flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    pub skip_phases: BTreeSet<EntityType>,
    pub skip_validation: bool,
    pub force_full_scan: bool,
    pub reconcile_orphans: bool,
    pub reingest_after_delete: bool,
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
