//! Fixtures shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;

use crate::catalog::{CatalogRef, write_catalog};
use crate::storage::{MemoryStore, ObjectStore, StoreError};

/// `(object_id, ra, dec, partition)`
pub type Row<'a> = (&'a str, f64, f64, i64);

/// A bulk batch with two magnitude columns derived from the row number.
pub fn bulk_batch(rows: &[Row<'_>]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("object_id", DataType::Utf8, false),
        Field::new("ra", DataType::Float64, false),
        Field::new("dec", DataType::Float64, false),
        Field::new("mag_g", DataType::Float64, false),
        Field::new("mag_r", DataType::Float64, false),
        Field::new("healpix", DataType::Int64, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.1))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.2))),
            Arc::new(Float64Array::from_iter_values((0..rows.len()).map(|i| 18.0 + i as f64))),
            Arc::new(Float64Array::from_iter_values((0..rows.len()).map(|i| 17.5 + i as f64))),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.3))),
        ],
    )
    .unwrap()
}

/// Write `rows` as a partitioned catalog rooted at `name`.
pub async fn write_fixture(store: &dyn ObjectStore, name: &str, rows: &[Row<'_>]) -> CatalogRef {
    let catalog = CatalogRef::new(name, name);
    write_catalog(store, &catalog, &bulk_batch(rows)).await.unwrap();
    catalog
}

/// Wraps a [`MemoryStore`], failing the first `failures` reads and
/// optionally stalling every read.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failures: AtomicU32,
    delay: Option<Duration>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }

    async fn get(&self, path: &str) -> Result<Bytes, StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable {
                path: path.to_string(),
                message: "connection reset".to_string(),
            });
        }
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<(), StoreError> {
        self.inner.put(path, data).await
    }
}

/// Wraps a [`MemoryStore`], stalling every read by `delay` and counting how
/// many reads are in flight at once.
#[derive(Debug, Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
    completed: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: MemoryStore, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            ..Self::default()
        }
    }

    /// Highest number of concurrent `get`s seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }

    async fn get(&self, path: &str) -> Result<Bytes, StoreError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<(), StoreError> {
        self.inner.put(path, data).await
    }
}
