//! Sequential bulk loader
//!
//! Consumes batch outcomes in submission order and writes each table buffer
//! through the [`RowSink`]. A failed insert is logged and counted; loading
//! continues with the next batch. Every `compression_interval` batches, chunks
//! that no later batch can write to are compressed.

use chrono::NaiveDateTime;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{EventSender, PipelineEvent};
use super::progress::{ProgressSnapshot, ProgressTracker};
use super::sink::RowSink;
use super::types::BatchResult;
use super::worker::BatchOutcome;

/// What the loader saw, for post-load maintenance
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Latest loaded row timestamp, per table
    pub loaded_until: BTreeMap<String, NaiveDateTime>,
    pub cancelled: bool,
}

impl LoadReport {
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.loaded_until.keys().map(String::as_str)
    }
}

pub struct BulkLoader {
    sink: Arc<dyn RowSink>,
    compression_interval: usize,
    cancel: CancellationToken,
    events: EventSender,
    progress: watch::Sender<ProgressSnapshot>,
    pending_floors: Vec<BTreeMap<String, NaiveDateTime>>,
}

impl BulkLoader {
    pub fn new(
        sink: Arc<dyn RowSink>,
        compression_interval: usize,
        cancel: CancellationToken,
        events: EventSender,
        progress: watch::Sender<ProgressSnapshot>,
    ) -> Self {
        Self {
            sink,
            compression_interval,
            cancel,
            events,
            progress,
            pending_floors: Vec::new(),
        }
    }

    /// Per-batch floors from [`pending_floors`](super::planner::pending_floors).
    /// Without them, periodic compression stops at each table's latest
    /// loaded row.
    pub fn with_pending_floors(mut self, floors: Vec<BTreeMap<String, NaiveDateTime>>) -> Self {
        self.pending_floors = floors;
        self
    }

    /// Load every outcome of `outcomes` in order.
    ///
    /// On cancellation the batch in hand is finished, then the remaining
    /// outcomes are drained without loading and their files are counted as
    /// not started.
    pub async fn run<S>(&self, mut outcomes: S, tracker: &mut ProgressTracker) -> LoadReport
    where
        S: Stream<Item = BatchOutcome> + Unpin,
    {
        let mut report = LoadReport::default();

        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                self.drain(&mut outcomes, tracker).await;
                break;
            }

            let Some(outcome) = outcomes.next().await else {
                break;
            };

            match outcome {
                BatchOutcome::Decoded(result) => {
                    self.load_batch(&result, tracker, &mut report).await;
                    if self.compression_due(result.batch_index) {
                        self.compress(result.batch_index, &report).await;
                    }
                }
                BatchOutcome::NotStarted { files, .. } => {
                    tracker.add_not_started(files);
                }
                BatchOutcome::TimedOut { batch_index, files } => {
                    tracker.add_skipped(files);
                    tracker.add_failed_batch();
                    self.events.emit(PipelineEvent::BatchFailed {
                        batch_index,
                        table: None,
                        reason: "batch timed out".to_string(),
                    });
                }
                BatchOutcome::Crashed {
                    batch_index,
                    files,
                    error,
                } => {
                    tracker.add_skipped(files);
                    tracker.add_failed_batch();
                    self.events.emit(PipelineEvent::BatchFailed {
                        batch_index,
                        table: None,
                        reason: error,
                    });
                }
            }

            self.publish(tracker);
        }

        report
    }

    async fn load_batch(
        &self,
        result: &BatchResult,
        tracker: &mut ProgressTracker,
        report: &mut LoadReport,
    ) {
        let batch_index = result.batch_index;
        let mut rows = 0u64;
        let mut failed_files = 0usize;
        let mut failed = false;

        for failure in &result.failures {
            self.events.emit(PipelineEvent::FileSkipped {
                key: failure.key.clone(),
                reason: failure.error.clone(),
            });
        }

        for buffer in &result.tables {
            match self.sink.insert(buffer).await {
                Ok(inserted) => {
                    rows += inserted;
                    if let Some(max_time) = buffer.max_time {
                        report
                            .loaded_until
                            .entry(buffer.table.clone())
                            .and_modify(|until| *until = (*until).max(max_time))
                            .or_insert(max_time);
                    }
                    debug!(batch_index, table = %buffer.table, rows = inserted, "Table buffer loaded");
                }
                Err(e) => {
                    error!(batch_index, table = %e.table, error = %e.message, "Insert failed, batch rolled back for this table");
                    failed = true;
                    failed_files += buffer.files;
                    self.events.emit(PipelineEvent::BatchFailed {
                        batch_index,
                        table: Some(e.table.clone()),
                        reason: e.message.clone(),
                    });
                }
            }
        }

        let failed_files = failed_files.min(result.files_processed);
        tracker.add_processed(result.files_processed - failed_files);
        tracker.add_skipped(result.files_skipped + failed_files);
        tracker.add_not_started(result.files_not_started);
        tracker.add_inserted_rows(rows);

        if failed {
            tracker.add_failed_batch();
        } else {
            tracker.add_loaded_batch();
            self.events.emit(PipelineEvent::BatchLoaded { batch_index, rows });
        }

        info!(
            batch_index,
            rows,
            processed = result.files_processed - failed_files,
            skipped = result.files_skipped + failed_files,
            total_rows = tracker.state().inserted_rows,
            "Batch finished"
        );
    }

    fn compression_due(&self, batch_index: usize) -> bool {
        self.compression_interval > 0
            && batch_index > 0
            && batch_index % self.compression_interval == 0
    }

    /// Chunks ending before the earliest capture still to come are closed.
    /// A table with nothing left to load is closed up to its latest row.
    fn watermark(&self, batch_index: usize, table: &str, loaded_until: NaiveDateTime) -> NaiveDateTime {
        self.pending_floors
            .get(batch_index)
            .and_then(|floors| floors.get(table))
            .map_or(loaded_until, |floor| (*floor).min(loaded_until))
    }

    async fn compress(&self, batch_index: usize, report: &LoadReport) {
        for (table, until) in &report.loaded_until {
            let watermark = self.watermark(batch_index, table, *until);
            match self.sink.compress_closed(table, Some(watermark)).await {
                Ok(chunks) => info!(%table, chunks, %watermark, "Compressed closed chunks"),
                Err(e) => warn!(%table, error = %e, "Chunk compression failed"),
            }
        }
    }

    async fn drain<S>(&self, outcomes: &mut S, tracker: &mut ProgressTracker)
    where
        S: Stream<Item = BatchOutcome> + Unpin,
    {
        let mut drained = 0usize;
        while let Some(outcome) = outcomes.next().await {
            tracker.add_not_started(outcome.file_count());
            drained += 1;
        }
        if drained > 0 {
            info!(batches = drained, "Drained unloaded batches after cancellation");
        }
        self.publish(tracker);
    }

    fn publish(&self, tracker: &ProgressTracker) {
        let snapshot = tracker.snapshot();
        self.progress.send_replace(snapshot.clone());
        self.events.emit(PipelineEvent::Progress(snapshot));
    }
}
