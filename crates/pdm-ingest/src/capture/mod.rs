//! Sensor capture files: geometry, decoding, and file-name metadata

pub mod decoder;
pub mod filename;
pub mod profile;

pub use decoder::{
    decode_full, decode_full_bytes, decode_full_with_hint, decode_window, encode_blocks,
    DecodeError, DecodedSampleSet,
};
pub use filename::{
    file_name_of, parse_capture_name, parse_capture_name_lenient, strip_sequence_prefix,
    FilenameParseError, ParsedCaptureName,
};
pub use profile::{SensorProfile, ACC_PROFILE, MIC_PROFILE};

use chrono::NaiveDateTime;
use pdm_common::SensorKind;

/// A capture selected for ingestion. Produced by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    pub sensor: SensorKind,
    /// Full object key (or path relative to a local root)
    pub key: String,
    /// Final key segment, stored alongside every row
    pub file_name: String,
    pub base_time: NaiveDateTime,
    pub size: u64,
}

impl CaptureFile {
    pub fn profile(&self) -> &'static SensorProfile {
        SensorProfile::for_kind(self.sensor)
    }
}
