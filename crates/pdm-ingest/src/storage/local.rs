use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ListPage, ObjectEntry, ObjectStore, StorageError};

/// A directory tree laid out like the capture bucket
/// (`<root>/<machine>/raw_dat/<sensor>/<file>.dat`).
///
/// Listing is not paginated; one call returns every file directly under the
/// prefix directory.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn list_page(
        &self,
        prefix: &str,
        _continuation: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let list_err = |e: std::io::Error| StorageError::List {
            prefix: prefix.to_string(),
            message: e.to_string(),
        };

        let dir = self.resolve(prefix);
        let key_prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };

        let mut entries = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Prefix directory does not exist");
                return Ok(ListPage::default());
            }
            Err(e) => return Err(list_err(e)),
        };

        while let Some(entry) = read_dir.next_entry().await.map_err(list_err)? {
            let metadata = entry.metadata().await.map_err(list_err)?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(ObjectEntry {
                key: format!("{}{}", key_prefix, name),
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(ListPage {
            entries,
            next_token: None,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Bytes, StorageError> {
        tokio::fs::read(self.resolve(key))
            .await
            .map(Bytes::from)
            .map_err(|e| StorageError::Fetch {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    async fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError> {
        match tokio::fs::metadata(self.resolve(key)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn check(&self) -> Result<(), StorageError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Unreachable(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) => Err(StorageError::Unreachable(format!(
                "{}: {}",
                self.root.display(),
                e
            ))),
        }
    }
}
