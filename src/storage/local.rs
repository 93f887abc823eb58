use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStore, StoreError, join_path};

/// Store backed by the local filesystem. Relative object paths resolve
/// against `root`; absolute ones are used as-is.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(Path::new(path))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let base = self.resolve(prefix);
        let mut out = Vec::new();
        let mut pending = vec![(base, String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(prefix, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child_rel = join_path(&[&rel, &name]);
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(prefix, e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), child_rel));
                } else {
                    out.push(join_path(&[prefix, &child_rel]));
                }
            }
        }

        out.sort();
        Ok(out)
    }

    async fn get(&self, path: &str) -> Result<Bytes, StoreError> {
        tokio::fs::read(self.resolve(path))
            .await
            .map(Bytes::from)
            .map_err(|e| StoreError::io(path, e))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<(), StoreError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(path, e))?;
        }
        tokio::fs::write(&target, &data)
            .await
            .map_err(|e| StoreError::io(path, e))
    }
}
