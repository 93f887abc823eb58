use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use tracing::{debug, info};

use crate::catalog::{CatalogRef, is_parquet};
use crate::columnar::{self, DEC, OBJECT_ID, RA};
use crate::error::{MatchError, Result};
use crate::storage::{ObjectStore, join_path};

use super::IndexTable;

const INDEX_FILE: &str = "index.parquet";

impl IndexTable {
    /// Convert into the four-column artifact schema.
    pub fn to_record_batch(&self, partition_column: &str) -> Result<RecordBatch> {
        let ids = columnar::object_id_array(self.object_ids());
        let schema = Arc::new(Schema::new(vec![
            Field::new(OBJECT_ID, ids.data_type().clone(), false),
            Field::new(RA, DataType::Float64, false),
            Field::new(DEC, DataType::Float64, false),
            Field::new(partition_column, DataType::Int64, false),
        ]));
        Ok(RecordBatch::try_new(
            schema,
            vec![
                ids,
                Arc::new(Float64Array::from(self.ra().to_vec())),
                Arc::new(Float64Array::from(self.dec().to_vec())),
                Arc::new(Int64Array::from(self.partitions().to_vec())),
            ],
        )?)
    }

    /// Read the four index columns out of any batch carrying them.
    pub fn from_record_batch(catalog: &str, batch: &RecordBatch, partition_column: &str) -> Result<Self> {
        Self::new(
            catalog,
            columnar::object_id_column(catalog, batch)?,
            columnar::f64_column(catalog, batch, RA)?,
            columnar::f64_column(catalog, batch, DEC)?,
            columnar::i64_column(catalog, batch, partition_column)?,
        )
    }
}

pub(crate) fn index_columns(catalog: &CatalogRef) -> Vec<String> {
    vec![
        OBJECT_ID.to_string(),
        RA.to_string(),
        DEC.to_string(),
        catalog.partition_column().to_string(),
    ]
}

/// Write the index artifact of `catalog`. Returns the object path written.
pub async fn save(store: &dyn ObjectStore, catalog: &CatalogRef, table: &IndexTable) -> Result<String> {
    let batch = table.to_record_batch(catalog.partition_column())?;
    let path = join_path(&[&catalog.index_prefix(), INDEX_FILE]);
    store
        .put(&path, columnar::encode_parquet(&batch)?)
        .await
        .map_err(|e| MatchError::storage(&catalog.name, e))?;
    debug!(catalog = %catalog.name, path = %path, rows = table.len(), "index saved");
    Ok(path)
}

/// Load the complete index of `catalog` into memory.
///
/// Every parquet file under the index partition is read and concatenated;
/// only the four index columns are decoded.
pub async fn load(store: &dyn ObjectStore, catalog: &CatalogRef) -> Result<IndexTable> {
    let prefix = catalog.index_prefix();
    let files: Vec<String> = store
        .list(&prefix)
        .await
        .map_err(|e| MatchError::storage(&catalog.name, e))?
        .into_iter()
        .filter(|p| is_parquet(p))
        .collect();

    if files.is_empty() {
        return Err(MatchError::IndexNotFound {
            catalog: catalog.name.clone(),
            path: prefix,
        });
    }

    let columns = index_columns(catalog);
    let mut parts = Vec::new();
    for path in &files {
        let bytes = store
            .get(path)
            .await
            .map_err(|e| MatchError::storage(&catalog.name, e))?;
        for batch in columnar::decode_parquet(&catalog.name, bytes, Some(columns.as_slice()))? {
            parts.push(IndexTable::from_record_batch(
                &catalog.name,
                &batch,
                catalog.partition_column(),
            )?);
        }
    }

    let table = IndexTable::concat(catalog.name.clone(), parts)?;
    info!(
        catalog = %catalog.name,
        files = files.len(),
        objects = table.len(),
        partitions = table.partition_keys().len(),
        "index loaded"
    );
    Ok(table)
}
