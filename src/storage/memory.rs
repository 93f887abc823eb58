use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::{ObjectStore, StoreError};

/// In-process store. Every `get` is recorded so callers can audit exactly
/// which objects a pipeline touched.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
    reads: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(path.into(), data.into());
    }

    pub fn remove(&self, path: &str) -> Option<Bytes> {
        self.objects.write().remove(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Paths passed to `get`, in call order.
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().clone()
    }

    pub fn clear_reads(&self) {
        self.reads.lock().clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let trimmed = prefix.trim_end_matches('/');
        let dir = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        Ok(self
            .objects
            .read()
            .range(dir.clone()..)
            .take_while(|(k, _)| k.starts_with(&dir))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn get(&self, path: &str) -> Result<Bytes, StoreError> {
        self.reads.lock().push(path.to_string());
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<(), StoreError> {
        self.insert(path, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_scoped_to_directory() {
        let store = MemoryStore::new();
        store.insert("c/train/healpix=1/a.parquet", Bytes::from_static(b"1"));
        store.insert("c/train/healpix=10/a.parquet", Bytes::from_static(b"2"));
        store.insert("c/train/healpix=1/b.parquet", Bytes::from_static(b"3"));

        let listed = store.list("c/train/healpix=1").await.unwrap();
        assert_eq!(
            listed,
            vec![
                "c/train/healpix=1/a.parquet".to_string(),
                "c/train/healpix=1/b.parquet".to_string(),
            ]
        );
        assert!(store.reads().is_empty());
    }

    #[tokio::test]
    async fn gets_are_recorded() {
        let store = MemoryStore::new();
        store.insert("a", Bytes::from_static(b"1"));

        store.get("a").await.unwrap();
        assert!(matches!(
            store.get("b").await,
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.reads(), vec!["a".to_string(), "b".to_string()]);

        store.clear_reads();
        assert!(store.reads().is_empty());
    }
}
