//! Decode workers
//!
//! A worker turns one [`Batch`] into a [`BatchResult`]: fetch each capture,
//! decode it on the blocking pool, and format its rows into the batch's
//! per-table COPY buffers. Per-file errors are recorded and the next file
//! proceeds. Workers never touch the database or the progress tracker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use pdm_common::SensorKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::rows::{append_capture_rows, DownsamplePlan};
use super::types::{Batch, BatchResult, FileErrorKind, FileFailure, TableBuffer, TableNames};
use crate::capture::{decode_full_with_hint, CaptureFile};
use crate::storage::ObjectStore;

#[derive(Clone)]
pub struct DecodeWorker {
    store: Arc<dyn ObjectStore>,
    machine_id: Arc<str>,
    tables: Arc<TableNames>,
    downsample: Option<DownsamplePlan>,
}

impl DecodeWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        machine_id: impl Into<Arc<str>>,
        tables: TableNames,
        downsample: Option<DownsamplePlan>,
    ) -> Self {
        Self {
            store,
            machine_id: machine_id.into(),
            tables: Arc::new(tables),
            downsample,
        }
    }

    /// Decode every file of `batch`, stopping early if `cancel` fires.
    pub async fn process_batch(&self, batch: Batch, cancel: &CancellationToken) -> BatchResult {
        let total = batch.files.len();
        let mut result = BatchResult {
            batch_index: batch.index,
            ..Default::default()
        };
        let mut buffers: BTreeMap<SensorKind, TableBuffer> = BTreeMap::new();

        for (position, file) in batch.files.into_iter().enumerate() {
            if cancel.is_cancelled() {
                result.files_not_started = total - position;
                debug!(
                    batch_index = result.batch_index,
                    not_started = result.files_not_started,
                    "Batch interrupted by cancellation"
                );
                break;
            }

            match self.process_file(file).await {
                Ok(file_rows) => {
                    buffers
                        .entry(file_rows.sensor)
                        .or_insert_with(|| TableBuffer::new(file_rows.table.clone(), file_rows.sensor))
                        .absorb(file_rows);
                    result.files_processed += 1;
                }
                Err(failure) => {
                    warn!(
                        batch_index = result.batch_index,
                        key = %failure.key,
                        kind = ?failure.kind,
                        error = %failure.error,
                        "Capture skipped"
                    );
                    result.files_skipped += 1;
                    result.failures.push(failure);
                }
            }
        }

        result.tables = buffers.into_values().filter(|b| !b.is_empty()).collect();
        debug!(
            batch_index = result.batch_index,
            processed = result.files_processed,
            skipped = result.files_skipped,
            rows = result.total_rows(),
            "Batch decoded"
        );
        result
    }

    async fn process_file(&self, file: CaptureFile) -> Result<TableBuffer, FileFailure> {
        let failure = |kind: FileErrorKind, error: String, key: &str| FileFailure {
            key: key.to_string(),
            kind,
            error,
        };

        let bytes = self
            .store
            .fetch(&file.key)
            .await
            .map_err(|e| failure(FileErrorKind::Fetch, e.to_string(), &file.key))?;

        let key = file.key.clone();
        let table = self.tables.for_sensor(file.sensor).to_string();
        let machine_id = Arc::clone(&self.machine_id);
        let plan = self.downsample;

        let decoded = tokio::task::spawn_blocking(move || {
            let samples = decode_full_with_hint(&bytes[..], file.profile(), Some(bytes.len() as u64))
                .map_err(|e| e.to_string())?;
            let mut buffer = TableBuffer::new(table, file.sensor);
            append_capture_rows(&mut buffer, &file, &machine_id, &samples, plan.as_ref())
                .map_err(|e| e.to_string())?;
            Ok::<_, String>(buffer)
        })
        .await;

        match decoded {
            Ok(Ok(buffer)) => Ok(buffer),
            Ok(Err(error)) => Err(failure(FileErrorKind::Decode, error, &key)),
            Err(join) => Err(failure(
                FileErrorKind::Decode,
                format!("decode task failed: {}", join),
                &key,
            )),
        }
    }
}

/// What the pool hands the loader for each planned batch
#[derive(Debug)]
pub enum BatchOutcome {
    Decoded(BatchResult),
    /// Cancelled before the batch was submitted
    NotStarted { batch_index: usize, files: usize },
    TimedOut { batch_index: usize, files: usize },
    /// The batch task panicked or was aborted
    Crashed {
        batch_index: usize,
        files: usize,
        error: String,
    },
}

impl BatchOutcome {
    pub fn batch_index(&self) -> usize {
        match self {
            BatchOutcome::Decoded(result) => result.batch_index,
            BatchOutcome::NotStarted { batch_index, .. }
            | BatchOutcome::TimedOut { batch_index, .. }
            | BatchOutcome::Crashed { batch_index, .. } => *batch_index,
        }
    }

    pub fn file_count(&self) -> usize {
        match self {
            BatchOutcome::Decoded(result) => result.file_count(),
            BatchOutcome::NotStarted { files, .. }
            | BatchOutcome::TimedOut { files, .. }
            | BatchOutcome::Crashed { files, .. } => *files,
        }
    }
}

/// Run batches on spawned tasks, at most `worker_count` at a time, and yield
/// their outcomes in submission order.
///
/// Each batch gets `batch_timeout` from the moment it is submitted; a batch
/// that overruns is aborted.
pub fn decode_pool(
    worker: DecodeWorker,
    batches: Vec<Batch>,
    worker_count: usize,
    batch_timeout: Duration,
    cancel: CancellationToken,
) -> BoxStream<'static, BatchOutcome> {
    stream::iter(batches)
        .map(move |batch| {
            let worker = worker.clone();
            let cancel = cancel.clone();
            async move {
                let batch_index = batch.index;
                let files = batch.len();
                if cancel.is_cancelled() {
                    return BatchOutcome::NotStarted { batch_index, files };
                }

                let mut handle =
                    tokio::spawn(async move { worker.process_batch(batch, &cancel).await });

                match tokio::time::timeout(batch_timeout, &mut handle).await {
                    Ok(Ok(result)) => BatchOutcome::Decoded(result),
                    Ok(Err(join)) => {
                        error!(batch_index, error = %join, "Batch task failed");
                        BatchOutcome::Crashed {
                            batch_index,
                            files,
                            error: join.to_string(),
                        }
                    }
                    Err(_) => {
                        handle.abort();
                        warn!(
                            batch_index,
                            timeout_secs = batch_timeout.as_secs(),
                            "Batch timed out and was aborted"
                        );
                        BatchOutcome::TimedOut { batch_index, files }
                    }
                }
            }
        })
        .buffered(worker_count.max(1))
        .boxed()
}
