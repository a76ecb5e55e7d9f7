//! Mirror discovered captures to a local directory
//!
//! Files land in `<output_dir>/<SENSOR>/<YYYY-MM-DD>/<file name>`. A file that
//! already exists with the expected size is left alone, so an interrupted
//! download can simply be re-run.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::capture::CaptureFile;
use crate::catalog::{discover, CatalogRequest};
use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
}

enum FileOutcome {
    Downloaded(u64),
    AlreadyPresent,
    Failed,
}

/// Local path of a capture under `output_dir`
pub fn local_path(output_dir: &Path, file: &CaptureFile) -> PathBuf {
    output_dir
        .join(file.sensor.label())
        .join(file.base_time.format("%Y-%m-%d").to_string())
        .join(&file.file_name)
}

/// Discover the captures of `request` and write them under `output_dir`.
///
/// Listing errors are returned; a failed file is logged and counted.
pub async fn download_captures(
    store: &dyn ObjectStore,
    request: &CatalogRequest,
    output_dir: &Path,
    concurrency: usize,
) -> Result<DownloadStats, StorageError> {
    let catalog = discover(store, request).await?;
    let total = catalog.files.len();
    info!(
        files = total,
        bytes = catalog.total_bytes(),
        output_dir = %output_dir.display(),
        "Starting download"
    );

    let outcomes: Vec<FileOutcome> = stream::iter(catalog.files.iter())
        .map(|file| download_one(store, output_dir, file))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut stats = DownloadStats::default();
    for outcome in outcomes {
        match outcome {
            FileOutcome::Downloaded(bytes) => {
                stats.downloaded += 1;
                stats.bytes += bytes;
            }
            FileOutcome::AlreadyPresent => stats.skipped += 1,
            FileOutcome::Failed => stats.failed += 1,
        }
    }

    info!(
        downloaded = stats.downloaded,
        skipped = stats.skipped,
        failed = stats.failed,
        bytes = stats.bytes,
        "Download finished"
    );
    Ok(stats)
}

async fn download_one(store: &dyn ObjectStore, output_dir: &Path, file: &CaptureFile) -> FileOutcome {
    let path = local_path(output_dir, file);

    if let Ok(meta) = tokio::fs::metadata(&path).await {
        if meta.len() == file.size {
            debug!(path = %path.display(), "Already downloaded");
            return FileOutcome::AlreadyPresent;
        }
    }

    match fetch_to(store, file, &path).await {
        Ok(bytes) => FileOutcome::Downloaded(bytes),
        Err(e) => {
            warn!(key = %file.key, error = %e, "Download failed");
            FileOutcome::Failed
        }
    }
}

/// Write through a `.part` file so a partial download never looks complete.
/// The `.part` file is removed again if writing or renaming fails.
async fn fetch_to(store: &dyn ObjectStore, file: &CaptureFile, path: &Path) -> Result<u64, StorageError> {
    let body = store.fetch(&file.key).await?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = path.with_extension("dat.part");
    if let Err(e) = write_and_rename(&partial, path, &body).await {
        match tokio::fs::remove_file(&partial).await {
            Ok(()) => debug!(path = %partial.display(), "Removed partial download"),
            Err(cleanup) if cleanup.kind() == std::io::ErrorKind::NotFound => {}
            Err(cleanup) => {
                warn!(path = %partial.display(), error = %cleanup, "Could not remove partial download")
            }
        }
        return Err(e.into());
    }

    Ok(body.len() as u64)
}

async fn write_and_rename(partial: &Path, path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut out = tokio::fs::File::create(partial).await?;
    out.write_all(body).await?;
    out.flush().await?;
    drop(out);
    tokio::fs::rename(partial, path).await
}
