//! Selective retrieval of bulk partitions.
//!
//! Only the partitions named in a [`PartitionPlan`] are listed and read, and
//! within each only the planned object ids are kept. Partitions are fetched
//! concurrently on a [`JoinSet`], bounded by a semaphore. Each partition fetch
//! has a timeout and is retried with exponential backoff when it times out or
//! the store reports a transient failure. Anything else, and retries running
//! out, fails the whole fetch; the remaining tasks are aborted and nothing
//! fetched so far is returned.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::BooleanArray;
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogRef, is_parquet};
use crate::columnar::{self, DEC, OBJECT_ID, RA};
use crate::error::{MatchError, Result};
use crate::index::ObjectId;
use crate::resolve::PartitionPlan;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Partitions fetched at the same time.
    pub max_concurrency: usize,
    /// Budget for one attempt at one partition.
    pub timeout_ms: u64,
    /// Extra attempts after the first one fails.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            timeout_ms: 30_000,
            max_retries: 3,
            backoff_ms: 200,
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(MatchError::Config("fetch.max_concurrency must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(MatchError::Config("fetch.timeout_ms must be at least 1".into()));
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << attempt.min(20)))
    }
}

/// Bulk rows of one catalog, restricted to the objects a plan asked for.
#[derive(Debug, Clone)]
pub struct BulkTable {
    catalog: String,
    batch: RecordBatch,
    rows: FxHashMap<ObjectId, usize>,
}

impl BulkTable {
    /// Concatenate per-partition batches and index their rows by object id.
    pub fn from_batches(catalog: impl Into<String>, batches: Vec<RecordBatch>) -> Result<Self> {
        let catalog = catalog.into();
        let schema: SchemaRef = match batches.first() {
            Some(b) => b.schema(),
            None => Arc::new(Schema::empty()),
        };
        let batch = concat_batches(&schema, &batches)?;

        let mut rows = FxHashMap::default();
        if batch.num_rows() > 0 {
            rows.reserve(batch.num_rows());
            for (row, id) in columnar::object_id_column(&catalog, &batch)?.into_iter().enumerate() {
                if rows.contains_key(&id) {
                    return Err(MatchError::DuplicateObject { catalog, object_id: id });
                }
                rows.insert(id, row);
            }
        }
        Ok(Self { catalog, batch, rows })
    }

    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    /// Row of `object_id` in [`Self::batch`].
    pub fn row(&self, object_id: &ObjectId) -> Option<usize> {
        self.rows.get(object_id).copied()
    }

    pub fn contains(&self, object_id: &ObjectId) -> bool {
        self.rows.contains_key(object_id)
    }
}

/// Columns to decode: the requested ones plus the key columns the assembler
/// relies on. `None` decodes everything.
fn projection(catalog: &CatalogRef, columns: Option<&[String]>) -> Option<Vec<String>> {
    let requested = columns?;
    let mut out: Vec<String> = [OBJECT_ID, RA, DEC, catalog.partition_column()]
        .into_iter()
        .map(str::to_string)
        .collect();
    for c in requested {
        if !out.contains(c) {
            out.push(c.clone());
        }
    }
    Some(out)
}

#[derive(Debug, Clone)]
pub struct PartitionFetcher {
    store: Arc<dyn ObjectStore>,
    config: FetchConfig,
}

impl PartitionFetcher {
    pub fn new(store: Arc<dyn ObjectStore>, config: FetchConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch the planned rows of `catalog`.
    ///
    /// With `columns`, only those columns (plus `object_id`, `ra`, `dec` and
    /// the partition column) are decoded. Row order across partitions is
    /// unspecified.
    pub async fn fetch(
        &self,
        catalog: &CatalogRef,
        plan: &PartitionPlan,
        columns: Option<&[String]>,
    ) -> Result<BulkTable> {
        self.config.validate()?;
        let projection = projection(catalog, columns).map(Arc::new);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));

        let mut tasks = JoinSet::new();
        let mut task_partition = FxHashMap::default();
        for (key, ids) in plan.iter() {
            let store = Arc::clone(&self.store);
            let catalog = catalog.clone();
            let ids = ids.clone();
            let projection = projection.clone();
            let config = self.config.clone();
            let semaphore = Arc::clone(&semaphore);

            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| MatchError::FetchFailed {
                    catalog: catalog.name.clone(),
                    partition: key,
                    attempts: 0,
                    reason: "fetcher closed".into(),
                })?;
                let columns = projection.as_deref().map(Vec::as_slice);
                fetch_with_retry(store.as_ref(), &catalog, key, &ids, columns, &config).await
            });
            task_partition.insert(handle.id(), key);
        }

        let mut parts = Vec::with_capacity(plan.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, result)) => parts.push(result?),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    return Err(MatchError::FetchFailed {
                        catalog: catalog.name.clone(),
                        partition: task_partition.get(&e.id()).copied().unwrap_or_default(),
                        attempts: 0,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let bulk = BulkTable::from_batches(catalog.name.clone(), parts)?;
        info!(
            catalog = %catalog.name,
            partitions = plan.len(),
            rows = bulk.len(),
            columns = bulk.schema().fields().len(),
            "bulk fetch complete"
        );
        Ok(bulk)
    }
}

async fn fetch_with_retry(
    store: &dyn ObjectStore,
    catalog: &CatalogRef,
    key: i64,
    ids: &BTreeSet<ObjectId>,
    columns: Option<&[String]>,
    config: &FetchConfig,
) -> Result<RecordBatch> {
    let mut attempt = 0u32;
    loop {
        let reason = match timeout(config.timeout(), fetch_partition(store, catalog, key, ids, columns)).await {
            Ok(Ok(batch)) => return Ok(batch),
            Ok(Err(MatchError::Storage { source, .. })) if source.is_transient() => source.to_string(),
            Ok(Err(e)) => return Err(e),
            Err(_) => format!("timed out after {} ms", config.timeout_ms),
        };

        if attempt >= config.max_retries {
            return Err(MatchError::FetchFailed {
                catalog: catalog.name.clone(),
                partition: key,
                attempts: attempt + 1,
                reason,
            });
        }
        let delay = config.backoff(attempt);
        warn!(
            catalog = %catalog.name,
            partition = key,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %reason,
            "partition fetch failed, retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// One attempt at one partition: read its files and keep the rows of `ids`.
async fn fetch_partition(
    store: &dyn ObjectStore,
    catalog: &CatalogRef,
    key: i64,
    ids: &BTreeSet<ObjectId>,
    columns: Option<&[String]>,
) -> Result<RecordBatch> {
    let name = &catalog.name;
    let files: Vec<String> = store
        .list(&catalog.partition_prefix(key))
        .await
        .map_err(|e| MatchError::storage(name, e))?
        .into_iter()
        .filter(|p| is_parquet(p))
        .collect();
    if files.is_empty() {
        return Err(MatchError::PartitionNotFound {
            catalog: name.clone(),
            partition: key,
        });
    }

    let mut schema: Option<SchemaRef> = None;
    let mut kept = Vec::new();
    let mut seen: FxHashSet<ObjectId> = FxHashSet::default();
    for path in &files {
        let bytes = store.get(path).await.map_err(|e| MatchError::storage(name, e))?;
        for batch in columnar::decode_parquet(name, bytes, columns)? {
            schema.get_or_insert_with(|| batch.schema());
            let batch_ids = columnar::object_id_column(name, &batch)?;
            let keys = columnar::i64_column(name, &batch, catalog.partition_column())?;

            let mut mask = Vec::with_capacity(batch_ids.len());
            for (id, found) in batch_ids.into_iter().zip(keys) {
                let wanted = ids.contains(&id);
                mask.push(wanted);
                if !wanted {
                    continue;
                }
                if found != key {
                    return Err(MatchError::PartitionMismatch {
                        catalog: name.clone(),
                        partition: key,
                        object_id: id,
                        found,
                    });
                }
                if !seen.insert(id.clone()) {
                    return Err(MatchError::DuplicateObject {
                        catalog: name.clone(),
                        object_id: id,
                    });
                }
            }

            let mask = BooleanArray::from(mask);
            if mask.true_count() > 0 {
                kept.push(filter_record_batch(&batch, &mask)?);
            }
        }
    }

    if let Some(missing) = ids.iter().find(|id| !seen.contains(*id)) {
        return Err(MatchError::ObjectIdMismatch {
            catalog: name.clone(),
            partition: key,
            object_id: missing.clone(),
        });
    }

    let schema = schema.unwrap_or_else(|| Arc::new(Schema::empty()));
    let batch = concat_batches(&schema, &kept)?;
    debug!(catalog = %name, partition = key, files = files.len(), rows = batch.num_rows(), "partition fetched");
    Ok(batch)
}
