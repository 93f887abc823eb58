//! Catalog references and the on-store layout of a partitioned catalog.
//!
//! ```text
//! <root>/<split>/_index/*.parquet                  index artifact
//! <root>/<split>/<partition_column>=<key>/*.parquet   bulk partitions
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Int64Array, UInt32Array};
use arrow::compute::take_record_batch;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::columnar::{self, DEC, RA};
use crate::error::{MatchError, Result};
use crate::healpix;
use crate::index::{self, IndexTable};
use crate::storage::{ObjectStore, join_path};

/// Directory naming conventions shared by every catalog in a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub split: String,
    /// Reserved partition name holding the index artifact.
    pub index_partition: String,
    /// Column carrying the partition key; also names the partition directories.
    pub partition_column: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            split: "train".to_string(),
            index_partition: "_index".to_string(),
            partition_column: "healpix".to_string(),
        }
    }
}

/// A named catalog rooted at a prefix of an object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogRef {
    pub name: String,
    pub root: String,
    pub layout: Layout,
}

impl CatalogRef {
    pub fn new(name: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            layout: Layout::default(),
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn partition_column(&self) -> &str {
        &self.layout.partition_column
    }

    pub fn split_prefix(&self) -> String {
        join_path(&[&self.root, &self.layout.split])
    }

    pub fn index_prefix(&self) -> String {
        join_path(&[&self.split_prefix(), &self.layout.index_partition])
    }

    pub fn partition_prefix(&self, key: i64) -> String {
        join_path(&[
            &self.split_prefix(),
            &format!("{}={key}", self.layout.partition_column),
        ])
    }

    /// Partition key of a bulk file path, if it lives in a partition directory
    /// directly under the split.
    pub fn partition_of(&self, path: &str) -> Option<i64> {
        let split = self.split_prefix();
        let rest = path.strip_prefix(&split)?.trim_start_matches('/');
        let (dir, _file) = rest.split_once('/')?;
        let value = dir.strip_prefix(&self.layout.partition_column)?.strip_prefix('=')?;
        value.parse().ok()
    }
}

pub(crate) fn is_parquet(path: &str) -> bool {
    path.ends_with(".parquet")
}

/// Append a HEALPix nested partition column computed from `ra`/`dec` (degrees).
pub fn assign_partitions(catalog: &CatalogRef, batch: &RecordBatch, depth: u8) -> Result<RecordBatch> {
    let column = catalog.partition_column();
    if depth > healpix::MAX_DEPTH {
        return Err(MatchError::Config(format!(
            "HEALPix depth {depth} exceeds the maximum of {}",
            healpix::MAX_DEPTH
        )));
    }
    if batch.column_by_name(column).is_some() {
        return Err(MatchError::schema(&catalog.name, column, "partition column already present"));
    }

    let ra = columnar::f64_column(&catalog.name, batch, RA)?;
    let dec = columnar::f64_column(&catalog.name, batch, DEC)?;
    let keys: Int64Array = ra
        .iter()
        .zip(&dec)
        .map(|(&ra, &dec)| healpix::partition_key(ra, dec, depth))
        .collect::<Vec<_>>()
        .into();

    let mut fields: Vec<Field> = batch.schema().fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new(column, DataType::Int64, false));
    let mut columns = batch.columns().to_vec();
    columns.push(Arc::new(keys));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub partitions: usize,
    pub rows: usize,
}

/// Write `batch` as a partitioned catalog: one `data.parquet` per partition
/// key, followed by the index artifact covering every row.
pub async fn write_catalog(
    store: &dyn ObjectStore,
    catalog: &CatalogRef,
    batch: &RecordBatch,
) -> Result<WriteSummary> {
    let name = &catalog.name;
    let keys = columnar::i64_column(name, batch, catalog.partition_column())?;
    let table = IndexTable::new(
        name.clone(),
        columnar::object_id_column(name, batch)?,
        columnar::f64_column(name, batch, RA)?,
        columnar::f64_column(name, batch, DEC)?,
        keys.clone(),
    )?;

    let mut groups: BTreeMap<i64, Vec<u32>> = BTreeMap::new();
    for (row, key) in keys.iter().enumerate() {
        groups.entry(*key).or_default().push(row as u32);
    }

    for (key, rows) in &groups {
        let part = take_record_batch(batch, &UInt32Array::from(rows.clone()))?;
        let path = join_path(&[&catalog.partition_prefix(*key), "data.parquet"]);
        debug!(catalog = %name, partition = key, rows = rows.len(), "writing partition");
        store
            .put(&path, columnar::encode_parquet(&part)?)
            .await
            .map_err(|e| MatchError::storage(name, e))?;
    }

    index::store::save(store, catalog, &table).await?;
    info!(catalog = %name, partitions = groups.len(), rows = table.len(), "catalog written");

    Ok(WriteSummary {
        partitions: groups.len(),
        rows: table.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use arrow::array::{Float64Array, StringArray};

    fn flat_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("object_id", DataType::Utf8, false),
            Field::new("ra", DataType::Float64, false),
            Field::new("dec", DataType::Float64, false),
            Field::new("z", DataType::Float64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["A", "B", "C"])),
                Arc::new(Float64Array::from(vec![10.0, 10.0005, 50.0])),
                Arc::new(Float64Array::from(vec![20.0, 20.0, 50.0])),
                Arc::new(Float64Array::from(vec![0.1, 0.2, 0.3])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn paths() {
        let cat = CatalogRef::new("sdss", "mmu/sdss");
        assert_eq!(cat.split_prefix(), "mmu/sdss/train");
        assert_eq!(cat.index_prefix(), "mmu/sdss/train/_index");
        assert_eq!(cat.partition_prefix(1175), "mmu/sdss/train/healpix=1175");

        assert_eq!(cat.partition_of("mmu/sdss/train/healpix=1175/data.parquet"), Some(1175));
        assert_eq!(cat.partition_of("mmu/sdss/train/_index/index.parquet"), None);
        assert_eq!(cat.partition_of("mmu/sdss/train/healpix=x/data.parquet"), None);
        assert_eq!(cat.partition_of("other/train/healpix=1/data.parquet"), None);
        assert_eq!(cat.partition_of("mmu/sdss/train/healpix=-4/part-0.parquet"), Some(-4));
    }

    #[test]
    fn custom_layout_paths() {
        let cat = CatalogRef::new("hsc", "/data/hsc").with_layout(Layout {
            split: "all".into(),
            index_partition: "index".into(),
            partition_column: "hpx".into(),
        });
        assert_eq!(cat.index_prefix(), "/data/hsc/all/index");
        assert_eq!(cat.partition_prefix(3), "/data/hsc/all/hpx=3");
        assert_eq!(cat.partition_of("/data/hsc/all/hpx=3/a.parquet"), Some(3));
    }

    #[test]
    fn assigns_healpix_keys() {
        let cat = CatalogRef::new("sdss", "");
        let out = assign_partitions(&cat, &flat_batch(), 5).unwrap();
        let keys = columnar::i64_column("sdss", &out, "healpix").unwrap();
        assert_eq!(keys, vec![4965, 4965, 786]);

        let err = assign_partitions(&cat, &out, 5).unwrap_err();
        assert!(matches!(err, MatchError::Schema { .. }));
        assert!(matches!(
            assign_partitions(&cat, &flat_batch(), 30),
            Err(MatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn writes_partitions_and_index() {
        let store = MemoryStore::new();
        let cat = CatalogRef::new("sdss", "sdss");
        let batch = assign_partitions(&cat, &flat_batch(), 5).unwrap();

        let summary = write_catalog(&store, &cat, &batch).await.unwrap();
        assert_eq!(summary, WriteSummary { partitions: 2, rows: 3 });
        assert_eq!(
            store.paths(),
            vec![
                "sdss/train/_index/index.parquet".to_string(),
                "sdss/train/healpix=4965/data.parquet".to_string(),
                "sdss/train/healpix=786/data.parquet".to_string(),
            ]
        );
    }
}
