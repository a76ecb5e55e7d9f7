//! Batch ingestion framework
//!
//! Planner, decode worker pool, sequential bulk loader and progress tracking.
//! The destination is abstracted behind [`RowSink`] and captures are read
//! through [`crate::storage::ObjectStore`].

pub mod events;
pub mod loader;
pub mod planner;
pub mod progress;
pub mod rows;
pub mod sink;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use events::{EventSender, PipelineEvent, DEFAULT_EVENT_CAPACITY};
pub use loader::{BulkLoader, LoadReport};
pub use planner::{pending_floors, plan_batches};
pub use progress::{PipelineState, ProgressSnapshot, ProgressTracker, RunPhase, RunSummary};
pub use rows::{append_capture_rows, copy_columns, sample_offset, DownsamplePlan};
pub use sink::{InsertError, RowSink, SinkError};
pub use types::{
    Batch, BatchConfig, BatchResult, FileErrorKind, FileFailure, TableBuffer, TableNames,
};
pub use worker::{decode_pool, BatchOutcome, DecodeWorker};
