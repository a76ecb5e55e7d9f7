//! PDM Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads raw sensor captures from object storage into TimescaleDB.
//!
//! # Pipeline
//!
//! - **Catalog**: list `<machine>/raw_dat/<sensor>/` and keep captures whose
//!   file-name timestamp falls in the requested date range
//! - **Decode pool**: fetch and decode batches of captures in parallel
//! - **Bulk loader**: `COPY` each batch, in batch order, into per-sensor
//!   hypertables and compress closed chunks periodically
//! - **Orchestrator**: run state, progress, events and cancellation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use pdm_common::SensorKind;
//! use pdm_ingest::config::IngestConfig;
//! use pdm_ingest::db::TimescaleSink;
//! use pdm_ingest::orchestrator::{OrchestratorSettings, PipelineOrchestrator, RunParams};
//! use pdm_ingest::storage::S3Store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let store = Arc::new(S3Store::new(&config.storage).await?);
//!     let sink = Arc::new(
//!         TimescaleSink::connect(&config.db, Some(&config.tuning), config.pipeline.tables.clone())
//!             .await?,
//!     );
//!
//!     let orchestrator = PipelineOrchestrator::new(store, sink, OrchestratorSettings::default());
//!     let params = RunParams::directory_scan(
//!         "M1",
//!         vec![SensorKind::Acc, SensorKind::Mic],
//!         NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2025, 4, 7).unwrap(),
//!     );
//!     let summary = orchestrator.start(params).await?;
//!     println!("inserted {} rows", summary.inserted_rows);
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod catalog;
pub mod config;
pub mod db;
pub mod download;
pub mod framework;
pub mod orchestrator;
pub mod storage;
