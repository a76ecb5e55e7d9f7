//! Destination seam for decoded rows
//!
//! The loader only talks to a [`RowSink`]. The TimescaleDB implementation lives
//! in `crate::db`; tests substitute an in-memory recorder.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use pdm_common::SensorKind;
use thiserror::Error;

use super::types::TableBuffer;

/// A rejected insert. The sink has already rolled it back.
#[derive(Debug, Clone, Error)]
#[error("Insert into '{table}' failed: {message}")]
pub struct InsertError {
    pub table: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Destination unreachable: {0}")]
    Unreachable(String),

    #[error("Schema setup failed: {0}")]
    Schema(String),

    #[error("Maintenance on '{table}' failed: {message}")]
    Maintenance { table: String, message: String },
}

#[async_trait]
pub trait RowSink: Send + Sync {
    /// Reachability probe
    async fn check(&self) -> Result<(), SinkError>;

    /// Create tables (and their time partitioning) for the given sensors
    async fn ensure_schema(&self, sensors: &[SensorKind]) -> Result<(), SinkError>;

    /// Bulk-insert one buffer atomically; returns rows written
    async fn insert(&self, buffer: &TableBuffer) -> Result<u64, InsertError>;

    /// Compress partitions that end before `older_than`, or every partition
    /// when `None`. Returns how many were compressed.
    async fn compress_closed(
        &self,
        table: &str,
        older_than: Option<NaiveDateTime>,
    ) -> Result<usize, SinkError>;

    /// Post-load maintenance: re-enable vacuum, build indexes, refresh statistics
    async fn finalize(&self, table: &str) -> Result<(), SinkError>;
}
