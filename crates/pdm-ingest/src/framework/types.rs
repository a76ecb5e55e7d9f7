//! Core types for batch ingestion

use chrono::NaiveDateTime;
use pdm_common::SensorKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capture::CaptureFile;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_WORKER_COUNT: usize = 20;
pub const DEFAULT_COMPRESSION_INTERVAL: usize = 200;
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_ACC_TABLE: &str = "normal_acc_data";
pub const DEFAULT_MIC_TABLE: &str = "normal_mic_data";

/// Configuration for batch processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Files per batch
    pub batch_size: usize,
    /// Batches decoded concurrently
    pub worker_count: usize,
    /// Compress closed chunks every N loaded batches
    pub compression_interval: usize,
    /// How long the loader waits for one batch
    #[serde(with = "duration_secs")]
    pub batch_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            compression_interval: DEFAULT_COMPRESSION_INTERVAL,
            batch_timeout: Duration::from_secs(DEFAULT_BATCH_TIMEOUT_SECS),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Destination table per sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    pub acc: String,
    pub mic: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            acc: DEFAULT_ACC_TABLE.to_string(),
            mic: DEFAULT_MIC_TABLE.to_string(),
        }
    }
}

impl TableNames {
    pub fn for_sensor(&self, sensor: SensorKind) -> &str {
        match sensor {
            SensorKind::Acc => &self.acc,
            SensorKind::Mic => &self.mic,
        }
    }
}

/// A contiguous slice of the ordered capture list
#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub files: Vec<CaptureFile>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileErrorKind {
    Fetch,
    Decode,
}

/// A capture that was skipped, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub key: String,
    pub kind: FileErrorKind,
    pub error: String,
}

/// COPY-ready rows destined for one table
#[derive(Debug, Clone)]
pub struct TableBuffer {
    pub table: String,
    pub sensor: SensorKind,
    /// Tab-delimited, newline-terminated rows
    pub data: Vec<u8>,
    pub rows: u64,
    /// Captures that contributed rows
    pub files: usize,
    /// Earliest row timestamp in the buffer
    pub min_time: Option<NaiveDateTime>,
    /// Latest row timestamp in the buffer
    pub max_time: Option<NaiveDateTime>,
}

impl TableBuffer {
    pub fn new(table: impl Into<String>, sensor: SensorKind) -> Self {
        Self {
            table: table.into(),
            sensor,
            data: Vec::new(),
            rows: 0,
            files: 0,
            min_time: None,
            max_time: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Append another buffer for the same table
    pub fn absorb(&mut self, other: TableBuffer) {
        if other.rows == 0 {
            return;
        }
        self.data.extend_from_slice(&other.data);
        self.rows += other.rows;
        self.files += other.files;
        for time in [other.min_time, other.max_time].into_iter().flatten() {
            self.note_time(time);
        }
    }

    pub(crate) fn note_time(&mut self, time: NaiveDateTime) {
        self.min_time = Some(self.min_time.map_or(time, |current| current.min(time)));
        self.max_time = Some(self.max_time.map_or(time, |current| current.max(time)));
    }
}

/// Output of decoding one batch; never mutated after the worker returns it
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub batch_index: usize,
    pub tables: Vec<TableBuffer>,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub files_not_started: usize,
    pub failures: Vec<FileFailure>,
}

impl BatchResult {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    pub fn file_count(&self) -> usize {
        self.files_processed + self.files_skipped + self.files_not_started
    }
}
