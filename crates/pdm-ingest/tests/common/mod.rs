//! Shared fixtures for integration tests: an in-memory object store, a
//! recording row sink and synthetic captures.
#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDateTime;
use pdm_common::SensorKind;
use pdm_ingest::capture::{encode_blocks, SensorProfile};
use pdm_ingest::framework::{InsertError, RowSink, SinkError, TableBuffer};
use pdm_ingest::storage::{ListPage, ObjectEntry, ObjectStore, StorageError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const MACHINE: &str = "M1";

/// Object key of a capture taken at `stamp` (`YYYYMMDD_HH_MM_SS`)
pub fn capture_key(sensor: SensorKind, stamp: &str) -> String {
    format!(
        "{}/raw_dat/{}/{}_S1_{}.dat",
        MACHINE,
        sensor.storage_segment(),
        stamp,
        sensor.label()
    )
}

/// A capture of `blocks` whole blocks with deterministic sample values
pub fn capture_bytes(sensor: SensorKind, blocks: usize, seed: i16) -> Vec<u8> {
    let profile = SensorProfile::for_kind(sensor);
    let values = blocks * profile.samples_per_block * profile.channel_count;
    let raw: Vec<i16> = (0..values)
        .map(|i| seed.wrapping_add((i % 2000) as i16))
        .collect();
    encode_blocks(profile, &raw)
}

/// Paginated in-memory bucket with per-key delays and failures
pub struct MemoryStore {
    objects: BTreeMap<String, Bytes>,
    delays: HashMap<String, Duration>,
    fetch_delay: Duration,
    failing: HashSet<String>,
    page_size: usize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetches: AtomicUsize,
    list_calls: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            delays: HashMap::new(),
            fetch_delay: Duration::ZERO,
            failing: HashSet::new(),
            page_size: 1000,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_object(mut self, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.objects.insert(key.into(), data.into());
        self
    }

    /// Add one small capture per stamp
    pub fn with_captures(mut self, sensor: SensorKind, stamps: &[&str]) -> Self {
        for (i, stamp) in stamps.iter().enumerate() {
            self.objects.insert(
                capture_key(sensor, stamp),
                Bytes::from(capture_bytes(sensor, 1, i as i16)),
            );
        }
        self
    }

    pub fn with_delay(mut self, key: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(key.into(), delay);
        self
    }

    /// Delay applied to every fetch without its own delay
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn with_failing(mut self, key: impl Into<String>) -> Self {
        self.failing.insert(key.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let entries: Vec<ObjectEntry> = self
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.as_deref().map_or(true, |after| key.as_str() > after))
            .take(self.page_size)
            .map(|(key, data)| ObjectEntry {
                key: key.clone(),
                size: data.len() as u64,
            })
            .collect();

        let next_token = match entries.last() {
            Some(last)
                if self
                    .objects
                    .keys()
                    .any(|key| key.starts_with(prefix) && key > &last.key) =>
            {
                Some(last.key.clone())
            }
            _ => None,
        };
        Ok(ListPage {
            entries,
            next_token,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Bytes, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.get(key).copied().unwrap_or(self.fetch_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(key) {
            return Err(StorageError::Fetch {
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::Fetch {
                key: key.to_string(),
                message: "no such key".to_string(),
            })
    }

    async fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError> {
        if self.failing.contains(key) {
            return Err(StorageError::Fetch {
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(self.objects.get(key).map(|data| data.len() as u64))
    }

    async fn check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// One accepted insert
#[derive(Debug, Clone)]
pub struct RecordedInsert {
    pub table: String,
    pub rows: u64,
    pub files: Vec<String>,
}

/// Row sink that records inserts and can reject buffers
#[derive(Default)]
pub struct RecordingSink {
    inserts: Mutex<Vec<RecordedInsert>>,
    rejected: Mutex<Vec<Vec<String>>>,
    compress_calls: Mutex<Vec<(String, Option<NaiveDateTime>)>>,
    finalized: Mutex<Vec<String>>,
    maintenance: Mutex<Vec<&'static str>>,
    schema_calls: AtomicUsize,
    fail_files: HashSet<String>,
    unreachable: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any buffer holding rows of `file_name`
    pub fn failing_on(mut self, file_name: impl Into<String>) -> Self {
        self.fail_files.insert(file_name.into());
        self
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn inserts(&self) -> Vec<RecordedInsert> {
        self.inserts.lock().unwrap().clone()
    }

    pub fn rejected(&self) -> Vec<Vec<String>> {
        self.rejected.lock().unwrap().clone()
    }

    /// File names in load order
    pub fn loaded_files(&self) -> Vec<String> {
        self.inserts()
            .into_iter()
            .flat_map(|insert| insert.files)
            .collect()
    }

    pub fn compress_calls(&self) -> Vec<(String, Option<NaiveDateTime>)> {
        self.compress_calls.lock().unwrap().clone()
    }

    pub fn finalized(&self) -> Vec<String> {
        self.finalized.lock().unwrap().clone()
    }

    /// `"compress"` / `"finalize"` in call order
    pub fn maintenance(&self) -> Vec<&'static str> {
        self.maintenance.lock().unwrap().clone()
    }

    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }
}

/// Distinct file names of a buffer, in row order
pub fn buffer_files(buffer: &TableBuffer) -> Vec<String> {
    let text = String::from_utf8(buffer.data.clone()).unwrap();
    let mut files: Vec<String> = Vec::new();
    for line in text.lines() {
        let name = line.rsplit('\t').next().unwrap().to_string();
        if files.last() != Some(&name) {
            files.push(name);
        }
    }
    files
}

#[async_trait]
impl RowSink for RecordingSink {
    async fn check(&self) -> Result<(), SinkError> {
        if self.unreachable {
            return Err(SinkError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn ensure_schema(&self, _sensors: &[SensorKind]) -> Result<(), SinkError> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert(&self, buffer: &TableBuffer) -> Result<u64, InsertError> {
        let files = buffer_files(buffer);
        if files.iter().any(|file| self.fail_files.contains(file)) {
            self.rejected.lock().unwrap().push(files);
            return Err(InsertError {
                table: buffer.table.clone(),
                message: "injected insert failure".to_string(),
            });
        }
        self.inserts.lock().unwrap().push(RecordedInsert {
            table: buffer.table.clone(),
            rows: buffer.rows,
            files,
        });
        Ok(buffer.rows)
    }

    async fn compress_closed(
        &self,
        table: &str,
        older_than: Option<NaiveDateTime>,
    ) -> Result<usize, SinkError> {
        self.compress_calls
            .lock()
            .unwrap()
            .push((table.to_string(), older_than));
        self.maintenance.lock().unwrap().push("compress");
        Ok(1)
    }

    async fn finalize(&self, table: &str) -> Result<(), SinkError> {
        self.finalized.lock().unwrap().push(table.to_string());
        self.maintenance.lock().unwrap().push("finalize");
        Ok(())
    }
}
