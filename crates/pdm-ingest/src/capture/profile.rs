//! Fixed geometry of each sensor's capture format

use pdm_common::SensorKind;

/// Block geometry and sampling parameters for one sensor kind.
///
/// A capture is a sequence of blocks. Each block holds
/// `samples_per_block * channel_count` little-endian `i16` values, interleaved
/// by row, followed by `trailer_skip_bytes` bytes that carry no samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorProfile {
    pub kind: SensorKind,
    pub samples_per_block: usize,
    pub channel_count: usize,
    pub bytes_per_sample: usize,
    pub trailer_skip_bytes: usize,
    pub sampling_rate_hz: u32,
    /// Multiplier applied to raw values; `None` keeps exact integers
    pub scale: Option<f64>,
    /// Destination column per channel, in payload order
    pub channel_columns: &'static [&'static str],
}

pub const ACC_PROFILE: SensorProfile = SensorProfile {
    kind: SensorKind::Acc,
    samples_per_block: 1000,
    channel_count: 3,
    bytes_per_sample: 2,
    trailer_skip_bytes: 8,
    sampling_rate_hz: 1666,
    scale: Some(0.000488),
    channel_columns: &["x", "y", "z"],
};

pub const MIC_PROFILE: SensorProfile = SensorProfile {
    kind: SensorKind::Mic,
    samples_per_block: 1000,
    channel_count: 1,
    bytes_per_sample: 2,
    trailer_skip_bytes: 8,
    sampling_rate_hz: 8000,
    scale: None,
    channel_columns: &["mic_value"],
};

impl SensorProfile {
    pub fn for_kind(kind: SensorKind) -> &'static SensorProfile {
        match kind {
            SensorKind::Acc => &ACC_PROFILE,
            SensorKind::Mic => &MIC_PROFILE,
        }
    }

    /// Bytes of one de-interleaved row (all channels of one sample)
    pub fn row_bytes(&self) -> usize {
        self.channel_count * self.bytes_per_sample
    }

    pub fn block_payload_bytes(&self) -> usize {
        self.samples_per_block * self.row_bytes()
    }

    /// Payload plus trailer
    pub fn block_stride(&self) -> usize {
        self.block_payload_bytes() + self.trailer_skip_bytes
    }

    pub fn is_integer(&self) -> bool {
        self.scale.is_none()
    }

    #[inline]
    pub fn apply_scale(&self, raw: i16) -> f64 {
        match self.scale {
            Some(scale) => f64::from(raw) * scale,
            None => f64::from(raw),
        }
    }

    /// Rough row count for a capture of `size` bytes, used to pre-size buffers
    pub fn estimated_rows(&self, size: u64) -> usize {
        let stride = self.block_stride() as u64;
        if stride == 0 {
            return 0;
        }
        let blocks = size.div_ceil(stride);
        usize::try_from(blocks).unwrap_or(usize::MAX / 2).saturating_mul(self.samples_per_block)
    }
}
