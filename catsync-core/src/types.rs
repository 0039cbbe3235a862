//! Domain types for catalog synchronization.
//!
//! Entity payloads are opaque JSON; the engine only ever looks at the
//! entity type, the natural key and the optional same-type parent key.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The stable external identifier of an entity (SKU, category code, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(pub String);

impl NaturalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for NaturalKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NaturalKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Entity types
// ---------------------------------------------------------------------------

/// Kind of catalog entity. The declaration order is the ingest order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Category,
    Metadata,
    Product,
    Variant,
    PriceBook,
    Price,
}

impl EntityType {
    /// Phase order for ingest. Deletion runs the exact reverse.
    pub const INGEST_ORDER: [EntityType; 6] = [
        EntityType::Category,
        EntityType::Metadata,
        EntityType::Product,
        EntityType::Variant,
        EntityType::PriceBook,
        EntityType::Price,
    ];

    pub fn all() -> &'static [EntityType] {
        &Self::INGEST_ORDER
    }

    /// Phase order for deletion workflows.
    pub fn deletion_order() -> impl Iterator<Item = EntityType> {
        Self::INGEST_ORDER.into_iter().rev()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Category => "category",
            EntityType::Metadata => "metadata",
            EntityType::Product => "product",
            EntityType::Variant => "variant",
            EntityType::PriceBook => "price_book",
            EntityType::Price => "price",
        }
    }

    /// Types whose entities reference a parent of the same type.
    pub fn is_hierarchical(&self) -> bool {
        matches!(self, EntityType::Category | EntityType::PriceBook)
    }

    /// Types that must be synchronized before this one.
    pub fn dependencies(&self) -> &'static [EntityType] {
        match self {
            EntityType::Product => &[EntityType::Category, EntityType::Metadata],
            EntityType::Variant => &[EntityType::Product],
            EntityType::Price => &[EntityType::Product, EntityType::Variant, EntityType::PriceBook],
            EntityType::Category | EntityType::Metadata | EntityType::PriceBook => &[],
        }
    }

    /// True when `self` depends on `other`, directly or transitively.
    pub fn depends_on(&self, other: EntityType) -> bool {
        self.dependencies()
            .iter()
            .any(|dep| *dep == other || dep.depends_on(other))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "category" | "categories" => Ok(EntityType::Category),
            "metadata" => Ok(EntityType::Metadata),
            "product" | "products" => Ok(EntityType::Product),
            "variant" | "variants" => Ok(EntityType::Variant),
            "price_book" | "price_books" | "pricebook" => Ok(EntityType::PriceBook),
            "price" | "prices" => Ok(EntityType::Price),
            other => Err(format!(
                "unknown entity type '{other}'; expected: \
                 category, metadata, product, variant, price_book, price"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities and desired state
// ---------------------------------------------------------------------------

/// A single locally declared catalog entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub key: NaturalKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<NaturalKey>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Entity {
    pub fn new(entity_type: EntityType, key: impl Into<NaturalKey>) -> Self {
        Self {
            entity_type,
            key: key.into(),
            parent_key: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<NaturalKey>) -> Self {
        self.parent_key = Some(parent.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// The full locally declared catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl DesiredState {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    /// Load a desired-state JSON document.
    pub fn load_at(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Entities of one type, in declaration order.
    pub fn of_type(&self, entity_type: EntityType) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect()
    }

    pub fn keys_of(&self, entity_type: EntityType) -> Vec<NaturalKey> {
        self.entities
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| e.key.clone())
            .collect()
    }

    /// Entity types present, in ingest order.
    pub fn types(&self) -> Vec<EntityType> {
        EntityType::INGEST_ORDER
            .into_iter()
            .filter(|t| self.entities.iter().any(|e| e.entity_type == *t))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
