//! Idempotency ledger — which natural keys have been confirmed synchronized.
//!
//! # Storage layout
//!
//! ```text
//! ~/.catsync/
//!   ledgers/
//!     <tenant>.json     (one whole-document snapshot per remote tenant, mode 0600)
//! ```
//!
//! A key is only ever added after the remote confirmed its creation. The
//! document is loaded fully before a run and saved after every phase; saves
//! use the `.tmp` + rename pattern so a crash never leaves a partial file.

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::{EntityType, NaturalKey};

/// Current on-disk schema version.
pub const LEDGER_VERSION: u32 = 1;

/// On-disk ledger payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerFile {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub entities: BTreeMap<EntityType, Vec<NaturalKey>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LedgerCompat {
    Versioned(VersionedCompat),
    Legacy(LegacyCompat),
}

#[derive(Debug, Deserialize)]
struct VersionedCompat {
    version: u32,
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    entities: BTreeMap<EntityType, Vec<NaturalKey>>,
}

/// Unversioned shape: entity types at the top level next to `lastUpdated`.
#[derive(Debug, Deserialize)]
struct LegacyCompat {
    #[serde(rename = "lastUpdated")]
    last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    entities: BTreeMap<EntityType, Vec<NaturalKey>>,
}

/// In-memory ledger bound to its persistence path.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    last_updated: DateTime<Utc>,
    entries: BTreeMap<EntityType, HashSet<NaturalKey>>,
}

impl Ledger {
    /// `<home>/.catsync/ledgers/<tenant>.json`. Pure, no I/O.
    pub fn path_at(home: &Path, tenant: &str) -> PathBuf {
        home.join(".catsync")
            .join("ledgers")
            .join(format!("{tenant}.json"))
    }

    /// `path_at` convenience wrapper using `dirs::home_dir()`.
    pub fn default_path(tenant: &str) -> Result<PathBuf, LedgerError> {
        let home = dirs::home_dir().ok_or(LedgerError::HomeNotFound)?;
        Ok(Self::path_at(&home, tenant))
    }

    /// An empty ledger that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_updated: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the ledger at `path`.
    ///
    /// Returns an empty ledger if the file does not exist yet, and
    /// [`LedgerError::Corrupt`] if it cannot be parsed.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(source) => {
                return Err(LedgerError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let parsed =
            serde_json::from_str::<LedgerCompat>(&contents).map_err(|source| {
                LedgerError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        let (last_updated, entities) = match parsed {
            LedgerCompat::Versioned(doc) => {
                if doc.version > LEDGER_VERSION {
                    return Err(LedgerError::UnsupportedVersion {
                        path: path.to_path_buf(),
                        found: doc.version,
                        supported: LEDGER_VERSION,
                    });
                }
                (doc.last_updated, doc.entities)
            }
            LedgerCompat::Legacy(doc) => {
                tracing::info!(path = %path.display(), "migrating unversioned ledger document");
                (doc.last_updated, doc.entities)
            }
        };

        let entries = entities
            .into_iter()
            .map(|(ty, keys)| (ty, keys.into_iter().collect::<HashSet<_>>()))
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            last_updated: last_updated.unwrap_or_else(Utc::now),
            entries,
        })
    }

    /// Like [`Ledger::load`], but a corrupt document is treated as empty.
    ///
    /// Other failures (unreadable file, newer schema) are still returned.
    pub fn load_or_recover(path: &Path) -> Result<Self, LedgerError> {
        match Self::load(path) {
            Err(LedgerError::Corrupt { path, source }) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %source,
                    "ledger is corrupt; starting from an empty ledger",
                );
                Ok(Self::empty(path))
            }
            other => other,
        }
    }

    /// Atomically persist the whole document.
    ///
    /// Write flow: serialize → `<file>.json.tmp` → `chmod 0600` → `rename`.
    pub fn save(&mut self) -> Result<(), LedgerError> {
        self.last_updated = Utc::now();
        let doc = self.to_file();
        let json = serde_json::to_string_pretty(&doc)?;

        let persistence = |path: &Path, source: std::io::Error| LedgerError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| persistence(dir, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| persistence(&tmp, e))?;
        set_file_permissions(&tmp).map_err(|e| persistence(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(persistence(&self.path, e));
        }
        tracing::debug!(path = %self.path.display(), total = self.total(), "ledger saved");
        Ok(())
    }

    /// Serializable snapshot with keys sorted per type.
    pub fn to_file(&self) -> LedgerFile {
        let entities = self
            .entries
            .iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(ty, keys)| {
                let mut sorted: Vec<NaturalKey> = keys.iter().cloned().collect();
                sorted.sort();
                (*ty, sorted)
            })
            .collect();
        LedgerFile {
            version: LEDGER_VERSION,
            last_updated: self.last_updated,
            entities,
        }
    }

    pub fn has(&self, entity_type: EntityType, key: &NaturalKey) -> bool {
        self.entries
            .get(&entity_type)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    /// Record a confirmed key. Returns `true` if it was not yet present.
    pub fn add(&mut self, entity_type: EntityType, key: NaturalKey) -> bool {
        self.entries.entry(entity_type).or_default().insert(key)
    }

    /// Returns `true` if the key was present.
    pub fn remove(&mut self, entity_type: EntityType, key: &NaturalKey) -> bool {
        self.entries
            .get_mut(&entity_type)
            .map(|keys| keys.remove(key))
            .unwrap_or(false)
    }

    /// Clear one type, or everything when `entity_type` is `None`.
    pub fn clear(&mut self, entity_type: Option<EntityType>) {
        match entity_type {
            Some(ty) => {
                self.entries.remove(&ty);
            }
            None => self.entries.clear(),
        }
    }

    /// Keys recorded for a type, sorted.
    pub fn keys(&self, entity_type: EntityType) -> Vec<NaturalKey> {
        let mut keys: Vec<NaturalKey> = self
            .entries
            .get(&entity_type)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self, entity_type: EntityType) -> usize {
        self.entries.get(&entity_type).map(HashSet::len).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.entries.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
