//! Capture discovery and date filtering
//!
//! A [`CaptureSource`] produces candidate objects as a stream; [`discover`]
//! keeps `.dat` objects whose file-name timestamp falls inside an inclusive
//! date range and returns them ordered by (sensor, key).

use chrono::NaiveDate;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use pdm_common::SensorKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::capture::{
    file_name_of, parse_capture_name, parse_capture_name_lenient, CaptureFile,
};
use crate::storage::{list_prefix, ObjectEntry, ObjectStore, StorageError};

/// Where the captures of a run come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureSource {
    /// Every object under `<machine_id>/raw_dat/<sensor>/`
    DirectoryScan { machine_id: String },
    /// Exactly these keys; the sensor is inferred from each key
    ExplicitFileList { keys: Vec<String> },
}

/// Object key prefix holding one machine's captures for one sensor
pub fn sensor_prefix(machine_id: &str, sensor: SensorKind) -> String {
    format!(
        "{}/raw_dat/{}/",
        machine_id.trim_end_matches('/'),
        sensor.storage_segment()
    )
}

/// Sensor of a key, from its `/raw_dat/<sensor>/` segment or an
/// `_ACC` / `_MIC` file-name suffix.
pub fn infer_sensor(key: &str) -> Option<SensorKind> {
    let segments: Vec<&str> = key.split('/').collect();
    if let Some(kind) = segments
        .windows(2)
        .find(|pair| pair[0] == "raw_dat")
        .and_then(|pair| pair[1].parse().ok())
    {
        return Some(kind);
    }

    let name = file_name_of(key);
    let stem = name.strip_suffix(".dat").unwrap_or(name).to_ascii_uppercase();
    SensorKind::ALL
        .into_iter()
        .find(|kind| stem.ends_with(&format!("_{}", kind.label())))
}

/// An object offered to the filter
#[derive(Debug, Clone)]
pub struct Candidate {
    pub sensor: Option<SensorKind>,
    pub entry: ObjectEntry,
}

impl CaptureSource {
    /// Stream candidates for the selected sensors.
    pub fn entries<'a>(
        &'a self,
        store: &'a dyn ObjectStore,
        sensors: &'a [SensorKind],
    ) -> BoxStream<'a, Result<Candidate, StorageError>> {
        match self {
            CaptureSource::DirectoryScan { machine_id } => stream::iter(sensors.iter().copied())
                .map(move |sensor| {
                    let prefix = sensor_prefix(machine_id, sensor);
                    debug!(%prefix, "Listing captures");
                    list_prefix(store, prefix).map_ok(move |entry| Candidate {
                        sensor: Some(sensor),
                        entry,
                    })
                })
                .flatten()
                .boxed(),
            CaptureSource::ExplicitFileList { keys } => stream::iter(keys.iter())
                .then(move |key| async move {
                    let size = match store.size_of(key).await {
                        Ok(Some(size)) => Some(size),
                        Ok(None) => {
                            warn!(%key, "Listed capture does not exist in the store");
                            None
                        }
                        Err(e) => {
                            warn!(%key, error = %e, "Listed capture could not be inspected, skipping");
                            None
                        }
                    };
                    Ok::<_, StorageError>(size.map(|size| Candidate {
                        sensor: infer_sensor(key),
                        entry: ObjectEntry {
                            key: key.clone(),
                            size,
                        },
                    }))
                })
                .try_filter_map(|candidate| async move { Ok(candidate) })
                .boxed(),
        }
    }
}

/// What to discover
#[derive(Debug, Clone)]
pub struct CatalogRequest {
    pub source: CaptureSource,
    pub sensors: Vec<SensorKind>,
    /// Inclusive
    pub start: NaiveDate,
    /// Inclusive
    pub end: NaiveDate,
    /// Accept names carrying the old `NN_` sequence prefix
    pub legacy_names: bool,
}

/// Discovery result plus counts of everything that was passed over
#[derive(Debug, Clone, Default)]
pub struct CatalogOutcome {
    pub files: Vec<CaptureFile>,
    pub listed: usize,
    pub not_capture: usize,
    pub unparsable: usize,
    pub out_of_range: usize,
    pub other_sensor: usize,
}

impl CatalogOutcome {
    pub fn per_sensor(&self) -> BTreeMap<SensorKind, usize> {
        let mut counts = BTreeMap::new();
        for file in &self.files {
            *counts.entry(file.sensor).or_insert(0) += 1;
        }
        counts
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// List, parse and date-filter captures.
pub async fn discover(
    store: &dyn ObjectStore,
    request: &CatalogRequest,
) -> Result<CatalogOutcome, StorageError> {
    let mut outcome = CatalogOutcome::default();
    let mut candidates = request.source.entries(store, &request.sensors);

    while let Some(Candidate { sensor, entry }) = candidates.try_next().await? {
        outcome.listed += 1;

        if !entry.key.ends_with(".dat") {
            outcome.not_capture += 1;
            continue;
        }

        let Some(sensor) = sensor.filter(|s| request.sensors.contains(s)) else {
            outcome.other_sensor += 1;
            continue;
        };

        let file_name = file_name_of(&entry.key).to_string();
        let parsed = if request.legacy_names {
            parse_capture_name_lenient(&file_name)
        } else {
            parse_capture_name(&file_name)
        };
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(key = %entry.key, error = %e, "Unparsable capture name");
                outcome.unparsable += 1;
                continue;
            }
        };

        let date = parsed.base_time.date();
        if date < request.start || date > request.end {
            outcome.out_of_range += 1;
            continue;
        }

        outcome.files.push(CaptureFile {
            sensor,
            key: entry.key,
            file_name,
            base_time: parsed.base_time,
            size: entry.size,
        });
    }

    outcome
        .files
        .sort_by(|a, b| (a.sensor, &a.key).cmp(&(b.sensor, &b.key)));
    outcome
        .files
        .dedup_by(|a, b| a.sensor == b.sensor && a.key == b.key);

    info!(
        store = %store.describe(),
        listed = outcome.listed,
        selected = outcome.files.len(),
        unparsable = outcome.unparsable,
        out_of_range = outcome.out_of_range,
        "Capture discovery finished"
    );

    Ok(outcome)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_prefix() {
        assert_eq!(sensor_prefix("press-01", SensorKind::Acc), "press-01/raw_dat/acc/");
        assert_eq!(sensor_prefix("press-01/", SensorKind::Mic), "press-01/raw_dat/mic/");
    }

    #[test]
    fn test_infer_sensor_from_path() {
        assert_eq!(
            infer_sensor("m1/raw_dat/mic/20250407_11_28_22_whatever.dat"),
            Some(SensorKind::Mic)
        );
    }

    #[test]
    fn test_infer_sensor_from_suffix() {
        assert_eq!(
            infer_sensor("downloads/20250407_11_28_22_LSM6DSOX_ACC.dat"),
            Some(SensorKind::Acc)
        );
        assert_eq!(infer_sensor("20250407_11_28_22_unknown.dat"), None);
    }

    #[test]
    fn test_source_serde() {
        let source = CaptureSource::DirectoryScan {
            machine_id: "m1".into(),
        };
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, r#"{"type":"directory_scan","machine_id":"m1"}"#);
    }
}
