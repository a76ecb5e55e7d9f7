//! Common types used across PDM

use serde::{Deserialize, Serialize};

use crate::error::PdmError;

/// Kind of sensor that produced a capture file.
///
/// The storage layout uses the lowercase form (`<machine>/raw_dat/acc/...`),
/// file names and user-facing output use the uppercase form (`..._ACC.dat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Three-axis accelerometer
    Acc,
    /// Single-channel microphone
    Mic,
}

impl SensorKind {
    /// Every sensor kind, in catalog order
    pub const ALL: [SensorKind; 2] = [SensorKind::Acc, SensorKind::Mic];

    /// Path segment used under `<machine>/raw_dat/`
    pub fn storage_segment(self) -> &'static str {
        match self {
            SensorKind::Acc => "acc",
            SensorKind::Mic => "mic",
        }
    }

    /// Uppercase label (`ACC`, `MIC`)
    pub fn label(self) -> &'static str {
        match self {
            SensorKind::Acc => "ACC",
            SensorKind::Mic => "MIC",
        }
    }
}

impl std::str::FromStr for SensorKind {
    type Err = PdmError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "acc" => Ok(SensorKind::Acc),
            "mic" => Ok(SensorKind::Mic),
            other => Err(PdmError::UnknownSensor(other.to_string())),
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
