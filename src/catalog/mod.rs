//! Read-only view of the indexes available to the optimizer.
//!
//! Rules never talk to storage. The driver captures a [`CatalogSnapshot`] of
//! the collections a plan touches once, up front, through the
//! [`IndexCatalog`] seam; every rule in the run sees that same snapshot.

mod memory;
mod snapshot;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::AttributePath;

pub use memory::InMemoryCatalog;
pub use snapshot::CatalogSnapshot;

/// Provides collection and index metadata to the optimizer.
pub trait IndexCatalog: Send + Sync {
    /// Metadata for `name`, or `None` when the collection is unknown.
    fn collection(&self, name: &str) -> Result<Option<CollectionInfo>>;
}

/// Index implementation families.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Built-in `_key` index.
    Primary,
    /// Built-in `_from`/`_to` index of edge collections.
    Edge,
    /// Unordered hash index.
    Hash,
    /// Ordered skiplist index.
    Skiplist,
    /// Ordered persistent (RocksDB-style) index.
    Persistent,
    /// Full-text index; never used for filtering or sorting here.
    Fulltext,
    /// Geo index; never used for filtering or sorting here.
    Geo,
}

impl IndexKind {
    /// Name used in explain output.
    pub fn as_str(self) -> &'static str {
        match self {
            IndexKind::Primary => "primary",
            IndexKind::Edge => "edge",
            IndexKind::Hash => "hash",
            IndexKind::Skiplist => "skiplist",
            IndexKind::Persistent => "persistent",
            IndexKind::Fulltext => "fulltext",
            IndexKind::Geo => "geo",
        }
    }

    /// Iterates entries in field order and therefore supports range scans
    /// and index-provided sort order.
    pub fn is_sorted(self) -> bool {
        matches!(
            self,
            IndexKind::Primary | IndexKind::Skiplist | IndexKind::Persistent
        )
    }

    /// Usable for equality lookups on its fields.
    pub fn supports_lookup(self) -> bool {
        !matches!(self, IndexKind::Fulltext | IndexKind::Geo)
    }

    /// Attributes stored in every entry in addition to the declared fields.
    pub fn implicit_fields(self) -> &'static [&'static str] {
        match self {
            IndexKind::Primary => &["_key", "_id"],
            IndexKind::Edge => &["_from", "_to"],
            _ => &[],
        }
    }
}

/// Description of one index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    /// Catalog identifier; used as the final tie-breaker between indexes.
    pub id: u64,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Implementation family.
    pub kind: IndexKind,
    /// Indexed attribute paths, most significant first.
    pub fields: Vec<AttributePath>,
    /// Each key combination occurs at most once.
    #[serde(default)]
    pub unique: bool,
    /// Documents with a null or missing field are not indexed.
    #[serde(default)]
    pub sparse: bool,
    /// Distinct values divided by document count, in `(0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectivity_estimate: Option<f64>,
}

impl IndexDescriptor {
    /// Creates a non-unique, non-sparse index over dotted field paths.
    pub fn new(id: u64, kind: IndexKind, fields: &[&str]) -> Self {
        Self {
            id,
            name: None,
            kind,
            fields: fields.iter().map(|f| AttributePath::parse(f)).collect(),
            unique: false,
            sparse: false,
            selectivity_estimate: None,
        }
    }

    /// The built-in primary index.
    pub fn primary(id: u64) -> Self {
        let mut index = Self::new(id, IndexKind::Primary, &["_key"]).unique();
        index.name = Some("primary".to_owned());
        index.selectivity_estimate = Some(1.0);
        index
    }

    /// Marks the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the index sparse.
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Sets the selectivity estimate.
    pub fn with_selectivity(mut self, selectivity: f64) -> Self {
        self.selectivity_estimate = Some(selectivity);
        self
    }

    /// Sets the display name.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    /// Name for explain output.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("idx_{}", self.id))
    }

    /// Whether the index can order a scan.
    pub fn is_sorted(&self) -> bool {
        self.kind.is_sorted()
    }

    /// True when the index stores `path`, i.e. some declared or implicit
    /// field is `path` itself or one of its ancestors.
    pub fn covers(&self, path: &AttributePath) -> bool {
        self.fields.iter().any(|f| !f.is_empty() && f.is_prefix_of(path))
            || self
                .kind
                .implicit_fields()
                .iter()
                .any(|f| AttributePath::parse(f).is_prefix_of(path))
    }
}

/// Collection metadata as seen by the optimizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Approximate number of documents.
    #[serde(default)]
    pub document_count: u64,
    /// Available indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

impl CollectionInfo {
    /// Collection without indexes.
    pub fn new(name: &str, document_count: u64) -> Self {
        Self {
            name: name.to_owned(),
            document_count,
            indexes: Vec::new(),
        }
    }

    /// Adds an index.
    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }
}
