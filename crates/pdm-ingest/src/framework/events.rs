//! Pipeline events for a single consumer (CLI, UI, tests)

use pdm_common::SensorKind;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::progress::{ProgressSnapshot, RunPhase, RunSummary};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    PhaseChanged(RunPhase),
    Discovered {
        total: usize,
        per_sensor: BTreeMap<SensorKind, usize>,
    },
    FileSkipped {
        key: String,
        reason: String,
    },
    BatchLoaded {
        batch_index: usize,
        rows: u64,
    },
    BatchFailed {
        batch_index: usize,
        /// `None` when the whole batch was lost (timeout, crashed task)
        table: Option<String>,
        reason: String,
    },
    Progress(ProgressSnapshot),
    Finished(RunSummary),
}

/// Non-blocking event publisher. A full queue drops the event.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A publisher with no subscriber
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PipelineEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(?event, "Event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
