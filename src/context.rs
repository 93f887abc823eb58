//! Per-run ownership of loaded indexes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::catalog::CatalogRef;
use crate::error::Result;
use crate::index::{IndexTable, store};
use crate::storage::ObjectStore;

/// Owns the index tables loaded during one pipeline run.
///
/// Each catalog's index is loaded at most once per context; later lookups
/// share the same immutable table. Dropping the context releases them.
#[derive(Debug)]
pub struct CatalogContext {
    store: Arc<dyn ObjectStore>,
    indexes: HashMap<CatalogRef, Arc<IndexTable>>,
}

impl CatalogContext {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            indexes: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Index of `catalog`, loading it on first use.
    pub async fn index(&mut self, catalog: &CatalogRef) -> Result<Arc<IndexTable>> {
        if let Some(table) = self.indexes.get(catalog) {
            debug!(catalog = %catalog.name, "index cache hit");
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(store::load(self.store.as_ref(), catalog).await?);
        self.indexes.insert(catalog.clone(), Arc::clone(&table));
        Ok(table)
    }

    pub fn loaded(&self) -> usize {
        self.indexes.len()
    }
}
