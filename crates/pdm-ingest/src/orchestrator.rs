//! Pipeline orchestrator
//!
//! Owns the run state machine and wires discovery, planning, the decode pool
//! and the bulk loader together:
//!
//! ```text
//! Idle -> Discovering -> Planning -> Running -> (Cancelling) -> Completed | Failed | Cancelled
//! ```
//!
//! Progress is readable at any time through [`PipelineOrchestrator::status`]
//! and streamed to one subscriber as [`PipelineEvent`]s.

use chrono::NaiveDate;
use pdm_common::SensorKind;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::{discover, CaptureSource, CatalogRequest};
use crate::framework::{
    decode_pool, pending_floors, plan_batches, BatchConfig, BulkLoader, DecodeWorker, DownsamplePlan,
    EventSender, PipelineEvent, ProgressSnapshot, ProgressTracker, RowSink, RunPhase,
    RunSummary, SinkError, TableNames, DEFAULT_EVENT_CAPACITY,
};
use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid run parameters: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("A run is already in progress")]
    AlreadyRunning,
}

/// Parameters of one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub machine_id: String,
    pub sensors: Vec<SensorKind>,
    /// Inclusive
    pub start: NaiveDate,
    /// Inclusive
    pub end: NaiveDate,
    pub batch: BatchConfig,
    pub downsample: Option<DownsamplePlan>,
    pub source: CaptureSource,
    pub legacy_names: bool,
}

impl RunParams {
    /// Scan `<machine_id>/raw_dat/<sensor>/` with default batching
    pub fn directory_scan(
        machine_id: impl Into<String>,
        sensors: Vec<SensorKind>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        let machine_id = machine_id.into();
        Self {
            source: CaptureSource::DirectoryScan {
                machine_id: machine_id.clone(),
            },
            machine_id,
            sensors,
            start,
            end,
            batch: BatchConfig::default(),
            downsample: None,
            legacy_names: false,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |message: &str| Err(PipelineError::Configuration(message.to_string()));

        if self.machine_id.trim().is_empty() {
            return invalid("machine id cannot be empty");
        }
        if self.sensors.is_empty() {
            return invalid("select at least one sensor");
        }
        if self.start > self.end {
            return Err(PipelineError::Configuration(format!(
                "start date {} is after end date {}",
                self.start, self.end
            )));
        }
        if self.batch.batch_size == 0 {
            return invalid("batch size must be greater than 0");
        }
        if self.batch.worker_count == 0 {
            return invalid("worker count must be greater than 0");
        }
        if self.batch.compression_interval == 0 {
            return invalid("compression interval must be greater than 0");
        }
        if self.batch.batch_timeout.is_zero() {
            return invalid("batch timeout must be greater than 0");
        }
        if let Some(plan) = &self.downsample {
            if plan.samples_per_second == 0 || plan.seconds == 0 {
                return invalid("downsampling needs samples per second and seconds above 0");
            }
        }
        if let CaptureSource::ExplicitFileList { keys } = &self.source {
            if keys.is_empty() {
                return invalid("explicit file list is empty");
            }
        }
        Ok(())
    }

    pub fn catalog_request(&self) -> CatalogRequest {
        CatalogRequest {
            source: self.source.clone(),
            sensors: self.sensors.clone(),
            start: self.start,
            end: self.end,
            legacy_names: self.legacy_names,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub tables: TableNames,
    /// Capacity of the subscriber's event queue
    pub event_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            tables: TableNames::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

pub struct PipelineOrchestrator {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn RowSink>,
    settings: OrchestratorSettings,
    phase: watch::Sender<RunPhase>,
    progress: watch::Sender<ProgressSnapshot>,
    cancel: Mutex<CancellationToken>,
    events: Mutex<EventSender>,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn RowSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        let (progress, _) = watch::channel(ProgressSnapshot::default());
        Self {
            store,
            sink,
            settings,
            phase,
            progress,
            cancel: Mutex::new(CancellationToken::new()),
            events: Mutex::new(EventSender::disabled()),
        }
    }

    /// Register the single event consumer, replacing any previous one
    pub fn subscribe(&self) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(self.settings.event_capacity.max(1));
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = EventSender::new(tx);
        rx
    }

    pub fn status(&self) -> (RunPhase, ProgressSnapshot) {
        (*self.phase.borrow(), self.progress.borrow().clone())
    }

    /// Phase changes as a watch receiver
    pub fn watch_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Token of the active run, or of the next run while idle.
    ///
    /// Cancelling it stops that run exactly like [`cancel`](Self::cancel).
    /// A finished run retires its token, so a handle taken afterwards
    /// belongs to the following run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the active run to stop. In-flight files finish, nothing new starts.
    /// Does nothing while no run is active.
    pub fn cancel(&self) {
        // held so the run cannot retire the token between the check and the cancel
        let token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        let active = self.phase.borrow().is_active();
        if !active {
            return;
        }
        mark_cancelling(&self.phase, &self.event_sender());
        token.cancel();
    }

    /// Run the pipeline to a terminal phase.
    ///
    /// A cancelled run returns `Ok` with partial totals. Parameter and
    /// reachability errors are returned before any file is read.
    pub async fn start(&self, params: RunParams) -> Result<RunSummary, PipelineError> {
        params.validate()?;

        let claimed = self.phase.send_if_modified(|phase| {
            if phase.is_active() {
                false
            } else {
                *phase = RunPhase::Discovering;
                true
            }
        });
        if !claimed {
            return Err(PipelineError::AlreadyRunning);
        }

        let cancel = self.cancellation_token();
        let events = self.event_sender();
        events.emit(PipelineEvent::PhaseChanged(RunPhase::Discovering));
        self.progress.send_replace(ProgressSnapshot::default());

        let cancel_watch = tokio::spawn({
            let (token, phase, events) = (cancel.clone(), self.phase.clone(), events.clone());
            async move {
                token.cancelled().await;
                mark_cancelling(&phase, &events);
            }
        });

        let run_id = Uuid::new_v4();
        let mut tracker = ProgressTracker::new();
        let outcome = self
            .run(&params, &cancel, &events, &mut tracker)
            .instrument(info_span!("ingest_run", %run_id, machine_id = %params.machine_id))
            .await;

        cancel_watch.abort();

        let phase = match &outcome {
            Ok(phase) => *phase,
            Err(_) => RunPhase::Failed,
        };
        {
            let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            *token = CancellationToken::new();
            self.phase.send_replace(phase);
        }
        events.emit(PipelineEvent::PhaseChanged(phase));

        let summary = RunSummary::new(phase, tracker.state(), tracker.elapsed());
        self.progress.send_replace(tracker.snapshot());
        events.emit(PipelineEvent::Finished(summary.clone()));

        match outcome {
            Ok(_) => {
                info!(
                    %run_id,
                    %phase,
                    discovered = summary.discovered,
                    processed = summary.processed,
                    skipped = summary.skipped,
                    not_started = summary.not_started,
                    inserted_rows = summary.inserted_rows,
                    failed_batches = summary.failed_batches,
                    elapsed_secs = summary.elapsed.as_secs_f64(),
                    "Run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(%run_id, error = %e, "Run failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        params: &RunParams,
        cancel: &CancellationToken,
        events: &EventSender,
        tracker: &mut ProgressTracker,
    ) -> Result<RunPhase, PipelineError> {
        self.store.check().await?;
        self.sink.check().await?;
        self.sink.ensure_schema(&params.sensors).await?;

        let catalog = discover(self.store.as_ref(), &params.catalog_request()).await?;
        tracker.add_discovered(catalog.files.len());
        events.emit(PipelineEvent::Discovered {
            total: catalog.files.len(),
            per_sensor: catalog.per_sensor(),
        });
        info!(
            files = catalog.files.len(),
            bytes = catalog.total_bytes(),
            "Discovery finished"
        );

        self.advance(RunPhase::Planning, events);
        let batches = plan_batches(catalog.files, params.batch.batch_size);
        let floors = pending_floors(&batches, &self.settings.tables);
        info!(
            batches = batches.len(),
            batch_size = params.batch.batch_size,
            workers = params.batch.worker_count,
            "Batches planned"
        );

        self.advance(RunPhase::Running, events);
        tracker.restart_clock();

        let worker = DecodeWorker::new(
            Arc::clone(&self.store),
            params.machine_id.as_str(),
            self.settings.tables.clone(),
            params.downsample,
        );
        let outcomes = decode_pool(
            worker,
            batches,
            params.batch.worker_count,
            params.batch.batch_timeout,
            cancel.clone(),
        );
        let loader = BulkLoader::new(
            Arc::clone(&self.sink),
            params.batch.compression_interval,
            cancel.clone(),
            events.clone(),
            self.progress.clone(),
        )
        .with_pending_floors(floors);
        let report = loader.run(outcomes, tracker).await;

        let cancelled = report.cancelled || cancel.is_cancelled();
        self.maintain(params, !cancelled).await;

        Ok(if cancelled {
            RunPhase::Cancelled
        } else {
            RunPhase::Completed
        })
    }

    /// Post-load maintenance; failures are logged, never fatal.
    ///
    /// Finalize (autovacuum back on, index, `VACUUM ANALYZE`) always runs and
    /// comes first; the full compression pass follows only a complete load.
    async fn maintain(&self, params: &RunParams, compress: bool) {
        for sensor in &params.sensors {
            let table = self.settings.tables.for_sensor(*sensor);
            if let Err(e) = self.sink.finalize(table).await {
                warn!(%table, error = %e, "Table maintenance failed");
            }
            if compress {
                match self.sink.compress_closed(table, None).await {
                    Ok(chunks) => info!(%table, chunks, "Final compression pass"),
                    Err(e) => warn!(%table, error = %e, "Final compression failed"),
                }
            }
        }
    }

    /// Move to `next` unless a cancel already moved the run to Cancelling
    fn advance(&self, next: RunPhase, events: &EventSender) {
        let moved = self.phase.send_if_modified(|phase| {
            if *phase == RunPhase::Cancelling {
                false
            } else {
                *phase = next;
                true
            }
        });
        if moved {
            events.emit(PipelineEvent::PhaseChanged(next));
        }
    }

    fn event_sender(&self) -> EventSender {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Move an active run to Cancelling; only the first caller emits the change.
fn mark_cancelling(phase: &watch::Sender<RunPhase>, events: &EventSender) {
    let moved = phase.send_if_modified(|phase| {
        if phase.is_active() && *phase != RunPhase::Cancelling {
            *phase = RunPhase::Cancelling;
            true
        } else {
            false
        }
    });
    if moved {
        info!("Cancellation requested");
        events.emit(PipelineEvent::PhaseChanged(RunPhase::Cancelling));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn params() -> RunParams {
        RunParams::directory_scan(
            "M1",
            vec![SensorKind::Acc],
            NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 4, 10).unwrap(),
        )
    }

    #[test]
    fn test_valid_params() {
        assert!(params().validate().is_ok());
    }

    #[test]
    fn test_rejects_reversed_dates() {
        let mut p = params();
        std::mem::swap(&mut p.start, &mut p.end);
        assert!(matches!(p.validate(), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_rejects_no_sensors_and_zero_sizes() {
        let mut p = params();
        p.sensors.clear();
        assert!(p.validate().is_err());

        let mut p = params();
        p.batch.batch_size = 0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.batch.worker_count = 0;
        assert!(p.validate().is_err());

        let mut p = params();
        p.downsample = Some(DownsamplePlan {
            samples_per_second: 0,
            seconds: 5,
        });
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_file_list() {
        let mut p = params();
        p.source = CaptureSource::ExplicitFileList { keys: vec![] };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_same_day_range_is_valid() {
        let mut p = params();
        p.end = p.start;
        assert!(p.validate().is_ok());
    }
}
