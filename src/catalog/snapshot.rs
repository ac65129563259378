use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{CollectionInfo, IndexCatalog, IndexDescriptor};
use crate::error::Result;

/// Immutable copy of the catalog entries one optimizer run needs.
///
/// Cloning is cheap; all clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    collections: Arc<BTreeMap<String, CollectionInfo>>,
}

impl CatalogSnapshot {
    /// Copies the entries for `names` out of `catalog`. Unknown collections
    /// are recorded as absent.
    pub fn capture<I, S>(catalog: &dyn IndexCatalog, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut collections = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            match catalog.collection(name)? {
                Some(info) => {
                    collections.insert(name.to_owned(), info);
                }
                None => debug!(collection = name, "collection not present in index catalog"),
            }
        }
        Ok(Self {
            collections: Arc::new(collections),
        })
    }

    /// Snapshot over explicit collection entries.
    pub fn from_collections(infos: Vec<CollectionInfo>) -> Self {
        Self {
            collections: Arc::new(infos.into_iter().map(|c| (c.name.clone(), c)).collect()),
        }
    }

    /// Entry for `name`.
    pub fn collection(&self, name: &str) -> Option<&CollectionInfo> {
        self.collections.get(name)
    }

    /// Indexes of `name`; empty for unknown collections.
    pub fn indexes(&self, name: &str) -> &[IndexDescriptor] {
        self.collections
            .get(name)
            .map(|c| c.indexes.as_slice())
            .unwrap_or(&[])
    }

    /// Document count of `name`; zero for unknown collections.
    pub fn document_count(&self, name: &str) -> u64 {
        self.collections.get(name).map_or(0, |c| c.document_count)
    }

    /// Number of captured collections.
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// True when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl IndexCatalog for CatalogSnapshot {
    fn collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        Ok(self.collections.get(name).cloned())
    }
}
