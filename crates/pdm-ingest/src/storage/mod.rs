//! Object storage boundary
//!
//! Everything that reads captures goes through [`ObjectStore`], so the
//! catalog, the workers and the downloader work the same against S3 and a
//! local directory tree laid out like the bucket.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use thiserror::Error;

pub mod config;
pub mod local;
pub mod s3;

pub use config::StorageConfig;
pub use local::LocalDirStore;
pub use s3::S3Store;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to list '{prefix}': {message}")]
    List { prefix: String, message: String },

    #[error("Failed to fetch '{key}': {message}")]
    Fetch { key: String, message: String },

    #[error("Object store unreachable: {0}")]
    Unreachable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// One page of a listing; `next_token` is `None` on the last page
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ObjectEntry>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short description for logs, e.g. `s3://bucket` or a directory path
    fn describe(&self) -> String;

    /// List one page of keys under `prefix`
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError>;

    /// Read a whole object
    async fn fetch(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Object size, `None` when the key does not exist
    async fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError>;

    /// Cheap reachability probe
    async fn check(&self) -> Result<(), StorageError>;
}

/// Stream every entry under `prefix`, one page in memory at a time.
pub fn list_prefix(
    store: &dyn ObjectStore,
    prefix: impl Into<String>,
) -> BoxStream<'_, Result<ObjectEntry, StorageError>> {
    enum Cursor {
        Start,
        Next(String),
        Done,
    }

    stream::try_unfold(
        (prefix.into(), Cursor::Start),
        move |(prefix, cursor)| async move {
            let token = match cursor {
                Cursor::Start => None,
                Cursor::Next(token) => Some(token),
                Cursor::Done => return Ok::<_, StorageError>(None),
            };
            let page = store.list_page(&prefix, token).await?;
            let next = match page.next_token {
                Some(token) => Cursor::Next(token),
                None => Cursor::Done,
            };
            let entries = stream::iter(page.entries.into_iter().map(Ok::<_, StorageError>));
            Ok::<_, StorageError>(Some((entries, (prefix, next))))
        },
    )
    .try_flatten()
    .boxed()
}
