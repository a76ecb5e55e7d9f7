//! Ingestion configuration
//!
//! Everything is read from the environment (after loading `.env`); the CLI
//! overrides individual values per run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::{schema, DbConfig, SessionTuning};
use crate::framework::types::{
    DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT_SECS, DEFAULT_COMPRESSION_INTERVAL,
    DEFAULT_WORKER_COUNT,
};
use crate::framework::{BatchConfig, TableNames};
use crate::storage::StorageConfig;

/// Batching defaults and destination tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefaults {
    pub batch: BatchConfig,
    pub tables: TableNames,
}

impl PipelineDefaults {
    /// `INGEST_BATCH_SIZE`, `INGEST_WORKERS`, `INGEST_COMPRESSION_INTERVAL`,
    /// `INGEST_BATCH_TIMEOUT_SECS`, `INGEST_ACC_TABLE`, `INGEST_MIC_TABLE`
    pub fn from_env() -> Self {
        let tables = TableNames::default();
        Self {
            batch: BatchConfig {
                batch_size: std::env::var("INGEST_BATCH_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_BATCH_SIZE),
                worker_count: std::env::var("INGEST_WORKERS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_WORKER_COUNT),
                compression_interval: std::env::var("INGEST_COMPRESSION_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_COMPRESSION_INTERVAL),
                batch_timeout: Duration::from_secs(
                    std::env::var("INGEST_BATCH_TIMEOUT_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(DEFAULT_BATCH_TIMEOUT_SECS),
                ),
            },
            tables: TableNames {
                acc: std::env::var("INGEST_ACC_TABLE").unwrap_or(tables.acc),
                mic: std::env::var("INGEST_MIC_TABLE").unwrap_or(tables.mic),
            },
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch.batch_size == 0 {
            anyhow::bail!("INGEST_BATCH_SIZE must be greater than 0");
        }
        if self.batch.worker_count == 0 {
            anyhow::bail!("INGEST_WORKERS must be greater than 0");
        }
        if self.batch.compression_interval == 0 {
            anyhow::bail!("INGEST_COMPRESSION_INTERVAL must be greater than 0");
        }
        if self.batch.batch_timeout.is_zero() {
            anyhow::bail!("INGEST_BATCH_TIMEOUT_SECS must be greater than 0");
        }
        schema::validate_identifier(&self.tables.acc)?;
        schema::validate_identifier(&self.tables.mic)?;
        Ok(())
    }
}

/// Complete configuration of an ingest run
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub storage: StorageConfig,
    pub db: DbConfig,
    pub pipeline: PipelineDefaults,
    /// Session settings, derived once from available memory
    pub tuning: SessionTuning,
}

impl IngestConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            storage: StorageConfig::from_env()?,
            db: DbConfig::from_env()?,
            pipeline: PipelineDefaults::from_env(),
            tuning: SessionTuning::detect().with_env_overrides()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.storage.validate()?;
        self.db.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}
