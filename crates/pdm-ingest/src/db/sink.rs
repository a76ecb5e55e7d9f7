//! TimescaleDB implementation of [`RowSink`]

use async_trait::async_trait;
use chrono::NaiveDateTime;
use pdm_common::SensorKind;
use sqlx::postgres::PgPool;
use tracing::{debug, info, instrument, warn};

use super::schema;
use super::{create_pool, health_check, timescaledb_version, DbConfig, DbResult, SessionTuning};
use crate::capture::SensorProfile;
use crate::framework::{InsertError, RowSink, SinkError, TableBuffer, TableNames};

/// Size of each `COPY` data message
const COPY_CHUNK_BYTES: usize = 8 * 1024 * 1024;

pub struct TimescaleSink {
    pool: PgPool,
    tables: TableNames,
}

impl TimescaleSink {
    pub fn new(pool: PgPool, tables: TableNames) -> Self {
        Self { pool, tables }
    }

    pub async fn connect(
        config: &DbConfig,
        tuning: Option<&SessionTuning>,
        tables: TableNames,
    ) -> DbResult<Self> {
        let pool = create_pool(config, tuning).await?;
        Ok(Self::new(pool, tables))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute(&self, sql: &str) -> Result<(), sqlx::Error> {
        sqlx::query(sql).execute(&self.pool).await.map(|_| ())
    }

    async fn create_sensor_table(&self, sensor: SensorKind) -> Result<(), SinkError> {
        let table = self.tables.for_sensor(sensor);
        schema::validate_identifier(table).map_err(|e| SinkError::Schema(e.to_string()))?;
        let profile = SensorProfile::for_kind(sensor);

        self.execute(&schema::create_table(table, profile))
            .await
            .map_err(|e| SinkError::Schema(format!("create table {}: {}", table, e)))?;
        self.execute(&schema::create_hypertable(table))
            .await
            .map_err(|e| SinkError::Schema(format!("create hypertable {}: {}", table, e)))?;

        if let Err(e) = self.execute(&schema::enable_compression(table)).await {
            warn!(%table, error = %e, "Could not enable compression, continuing without it");
        }
        if let Err(e) = self.execute(&schema::set_autovacuum(table, false)).await {
            warn!(%table, error = %e, "Could not disable autovacuum for bulk load");
        }

        info!(%table, sensor = %sensor, "Hypertable ready");
        Ok(())
    }

    async fn copy_buffer(&self, buffer: &TableBuffer) -> Result<u64, sqlx::Error> {
        let profile = SensorProfile::for_kind(buffer.sensor);
        let statement = schema::copy_statement(&buffer.table, profile);

        let mut tx = self.pool.begin().await?;
        let mut copy = tx.copy_in_raw(&statement).await?;

        for chunk in buffer.data.chunks(COPY_CHUNK_BYTES) {
            if let Err(e) = copy.send(chunk).await {
                if let Err(abort_err) = copy.abort(e.to_string()).await {
                    debug!(error = %abort_err, "COPY abort reported an error");
                }
                return Err(e);
            }
        }

        let rows = copy.finish().await?;
        tx.commit().await?;
        Ok(rows)
    }
}

#[async_trait]
impl RowSink for TimescaleSink {
    async fn check(&self) -> Result<(), SinkError> {
        health_check(&self.pool)
            .await
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;

        match timescaledb_version(&self.pool).await {
            Ok(Some(version)) => info!(%version, "TimescaleDB available"),
            Ok(None) => warn!("TimescaleDB extension is not available on this server"),
            Err(e) => warn!(error = %e, "Could not query TimescaleDB version"),
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_schema(&self, sensors: &[SensorKind]) -> Result<(), SinkError> {
        self.execute(schema::CREATE_EXTENSION)
            .await
            .map_err(|e| SinkError::Schema(format!("create extension: {}", e)))?;

        for sensor in sensors {
            self.create_sensor_table(*sensor).await?;
        }
        Ok(())
    }

    async fn insert(&self, buffer: &TableBuffer) -> Result<u64, InsertError> {
        if buffer.is_empty() {
            return Ok(0);
        }
        schema::validate_identifier(&buffer.table).map_err(|e| InsertError {
            table: buffer.table.clone(),
            message: e.to_string(),
        })?;

        let rows = self.copy_buffer(buffer).await.map_err(|e| InsertError {
            table: buffer.table.clone(),
            message: e.to_string(),
        })?;

        if rows != buffer.rows {
            warn!(
                table = %buffer.table,
                expected = buffer.rows,
                copied = rows,
                "COPY row count differs from buffer"
            );
        }
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn compress_closed(
        &self,
        table: &str,
        older_than: Option<NaiveDateTime>,
    ) -> Result<usize, SinkError> {
        schema::validate_identifier(table).map_err(|e| SinkError::Maintenance {
            table: table.to_string(),
            message: e.to_string(),
        })?;

        let sql = schema::compress_chunks(table, older_than.is_some());
        let mut query = sqlx::query_scalar::<_, Option<String>>(&sql);
        if let Some(watermark) = older_than {
            query = query.bind(watermark);
        }

        let chunks = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SinkError::Maintenance {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        Ok(chunks.len())
    }

    #[instrument(skip(self))]
    async fn finalize(&self, table: &str) -> Result<(), SinkError> {
        let maintenance = |message: String| SinkError::Maintenance {
            table: table.to_string(),
            message,
        };
        schema::validate_identifier(table).map_err(|e| maintenance(e.to_string()))?;

        self.execute(&schema::set_autovacuum(table, true))
            .await
            .map_err(|e| maintenance(format!("re-enable autovacuum: {}", e)))?;
        self.execute(&schema::create_time_index(table))
            .await
            .map_err(|e| maintenance(format!("create index: {}", e)))?;
        self.execute(&schema::vacuum_analyze(table))
            .await
            .map_err(|e| maintenance(format!("vacuum analyze: {}", e)))?;

        info!(%table, "Table finalized");
        Ok(())
    }
}
