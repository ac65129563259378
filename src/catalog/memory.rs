use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::Deserialize;

use super::{CollectionInfo, IndexCatalog, IndexDescriptor};
use crate::error::Result;

/// Mutable in-memory catalog for tests, tools and embedders.
///
/// Lookups take a read lock, so the catalog can be shared with a running
/// optimizer while indexes are added or dropped; each optimizer run works
/// against the snapshot it captured at the start.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    collections: RwLock<BTreeMap<String, CollectionInfo>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Wrapped { collections: Vec<CollectionInfo> },
    List(Vec<CollectionInfo>),
}

impl InMemoryCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration of a collection.
    pub fn with_collection(self, info: CollectionInfo) -> Self {
        self.add_collection(info);
        self
    }

    /// Builder-style registration of an index on an existing or new
    /// collection.
    pub fn with_index(self, collection: &str, index: IndexDescriptor) -> Self {
        self.add_index(collection, index);
        self
    }

    /// Registers or replaces a collection.
    pub fn add_collection(&self, info: CollectionInfo) {
        self.collections.write().insert(info.name.clone(), info);
    }

    /// Adds an index, creating an empty collection entry if needed.
    pub fn add_index(&self, collection: &str, index: IndexDescriptor) {
        self.collections
            .write()
            .entry(collection.to_owned())
            .or_insert_with(|| CollectionInfo::new(collection, 0))
            .indexes
            .push(index);
    }

    /// Drops the index with `id`. Returns whether it existed.
    pub fn drop_index(&self, collection: &str, id: u64) -> bool {
        let mut guard = self.collections.write();
        let Some(info) = guard.get_mut(collection) else {
            return false;
        };
        let before = info.indexes.len();
        info.indexes.retain(|idx| idx.id != id);
        info.indexes.len() != before
    }

    /// Updates the document count used for estimates.
    pub fn set_document_count(&self, collection: &str, count: u64) {
        self.collections
            .write()
            .entry(collection.to_owned())
            .or_insert_with(|| CollectionInfo::new(collection, 0))
            .document_count = count;
    }

    /// Parses either `{"collections": [...]}` or a bare array of collections.
    pub fn from_json(raw: &str) -> Result<Self> {
        let doc: CatalogDocument = serde_json::from_str(raw)?;
        let collections = match doc {
            CatalogDocument::Wrapped { collections } | CatalogDocument::List(collections) => {
                collections
            }
        };
        let catalog = Self::new();
        for info in collections {
            catalog.add_collection(info);
        }
        Ok(catalog)
    }

    /// Reads a JSON catalog file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

impl IndexCatalog for InMemoryCatalog {
    fn collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        Ok(self.collections.read().get(name).cloned())
    }
}
