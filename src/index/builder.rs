use tracing::{debug, info, warn};

use crate::catalog::{CatalogRef, is_parquet};
use crate::columnar;
use crate::error::{MatchError, Result};
use crate::storage::ObjectStore;

use super::IndexTable;
use super::store::index_columns;

/// Rebuild the index of a catalog from its bulk partitions.
///
/// Only the index columns of each partition file are decoded. Every row must
/// carry the key of the directory it is stored under; a disagreement means the
/// catalog was written inconsistently and is reported rather than repaired.
/// Files outside a partition directory (including the index partition itself)
/// are ignored.
pub async fn build_index(store: &dyn ObjectStore, catalog: &CatalogRef) -> Result<IndexTable> {
    let name = &catalog.name;
    let files = store
        .list(&catalog.split_prefix())
        .await
        .map_err(|e| MatchError::storage(name, e))?;

    let columns = index_columns(catalog);
    let mut parts = Vec::new();
    let mut scanned = 0usize;

    for path in &files {
        let Some(partition) = catalog.partition_of(path) else {
            continue;
        };
        if !is_parquet(path) {
            warn!(catalog = %name, path = %path, "skipping non-parquet file in partition");
            continue;
        }
        scanned += 1;

        let bytes = store.get(path).await.map_err(|e| MatchError::storage(name, e))?;
        for batch in columnar::decode_parquet(name, bytes, Some(columns.as_slice()))? {
            let part = IndexTable::from_record_batch(name, &batch, catalog.partition_column())?;
            if let Some(row) = part.partitions().iter().position(|&k| k != partition) {
                return Err(MatchError::PartitionMismatch {
                    catalog: name.clone(),
                    partition,
                    object_id: part.object_ids()[row].clone(),
                    found: part.partitions()[row],
                });
            }
            debug!(catalog = %name, partition, rows = part.len(), "indexed partition file");
            parts.push(part);
        }
    }

    let table = IndexTable::concat(name.clone(), parts)?;
    info!(
        catalog = %name,
        files = scanned,
        objects = table.len(),
        partitions = table.partition_keys().len(),
        "index built"
    );
    Ok(table)
}
