//! Block decoder for `.dat` captures
//!
//! Two read policies are offered and callers pick one explicitly:
//!
//! - [`decode_window`] demands an exact number of samples and fails with
//!   [`DecodeError::TruncatedCapture`] when the capture is shorter.
//! - [`decode_full`] reads every block until EOF. A short final segment keeps
//!   its complete rows and drops any partial row.

use std::io::{self, Read};
use thiserror::Error;

use super::profile::SensorProfile;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Truncated capture: needed {needed} bytes, only {available} available")]
    TruncatedCapture { needed: usize, available: usize },

    #[error("Invalid block geometry: {0}")]
    Geometry(String),

    #[error("I/O error while decoding: {0}")]
    Io(#[from] io::Error),
}

/// Decoded samples, row-major: `values[row * channel_count + channel]`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedSampleSet {
    channel_count: usize,
    values: Vec<f64>,
}

impl DecodedSampleSet {
    pub fn with_capacity(channel_count: usize, rows: usize) -> Self {
        Self {
            channel_count,
            values: Vec::with_capacity(rows.saturating_mul(channel_count)),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Number of sample rows
    pub fn len(&self) -> usize {
        if self.channel_count == 0 {
            0
        } else {
            self.values.len() / self.channel_count
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        let start = index.checked_mul(self.channel_count)?;
        self.values.get(start..start + self.channel_count)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.channel_count.max(1))
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    fn extend_from_payload(&mut self, profile: &SensorProfile, payload: &[u8], rows: usize) {
        let take = rows * profile.row_bytes();
        self.values.extend(
            payload[..take]
                .chunks_exact(2)
                .map(|pair| profile.apply_scale(i16::from_le_bytes([pair[0], pair[1]]))),
        );
    }
}

fn check_geometry(profile: &SensorProfile) -> Result<(), DecodeError> {
    if profile.channel_count == 0 {
        return Err(DecodeError::Geometry("channel_count must be positive".into()));
    }
    if profile.samples_per_block == 0 {
        return Err(DecodeError::Geometry(
            "samples_per_block must be positive".into(),
        ));
    }
    if profile.bytes_per_sample != 2 {
        return Err(DecodeError::Geometry(format!(
            "only 16-bit samples are supported, got {} bytes per sample",
            profile.bytes_per_sample
        )));
    }
    Ok(())
}

/// Fill `buf` from `reader` until it is full or EOF; returns bytes read.
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn skip_bytes<R: Read>(reader: &mut R, count: usize) -> io::Result<usize> {
    let skipped = io::copy(&mut reader.take(count as u64), &mut io::sink())?;
    Ok(skipped as usize)
}

/// Decode exactly `samples` rows from the first `ceil(samples / spb)` blocks.
pub fn decode_window<R: Read>(
    mut reader: R,
    profile: &SensorProfile,
    samples: usize,
) -> Result<DecodedSampleSet, DecodeError> {
    check_geometry(profile)?;
    let mut out = DecodedSampleSet::with_capacity(profile.channel_count, samples);
    if samples == 0 {
        return Ok(out);
    }

    let spb = profile.samples_per_block;
    let stride = profile.block_stride();
    let blocks = samples.div_ceil(spb);
    let needed = (blocks - 1) * stride + profile.block_payload_bytes();

    let mut payload = vec![0u8; profile.block_payload_bytes()];
    let mut consumed = 0usize;

    for block in 0..blocks {
        let read = read_up_to(&mut reader, &mut payload)?;
        consumed += read;
        if read < payload.len() {
            return Err(DecodeError::TruncatedCapture {
                needed,
                available: consumed,
            });
        }

        let rows = (samples - block * spb).min(spb);
        out.extend_from_payload(profile, &payload, rows);

        if block + 1 < blocks {
            consumed += skip_bytes(&mut reader, profile.trailer_skip_bytes)?;
        }
    }

    Ok(out)
}

/// Decode a whole capture until EOF.
pub fn decode_full<R: Read>(
    reader: R,
    profile: &SensorProfile,
) -> Result<DecodedSampleSet, DecodeError> {
    decode_full_with_hint(reader, profile, None)
}

/// Like [`decode_full`], pre-sizing the output from the capture's byte size.
pub fn decode_full_with_hint<R: Read>(
    mut reader: R,
    profile: &SensorProfile,
    size_hint: Option<u64>,
) -> Result<DecodedSampleSet, DecodeError> {
    check_geometry(profile)?;
    let rows_hint = size_hint.map(|size| profile.estimated_rows(size)).unwrap_or(0);
    let mut out = DecodedSampleSet::with_capacity(profile.channel_count, rows_hint);

    let spb = profile.samples_per_block;
    let mut payload = vec![0u8; profile.block_payload_bytes()];

    loop {
        let read = read_up_to(&mut reader, &mut payload)?;
        if read < payload.len() {
            // Short tail: keep complete rows only
            out.extend_from_payload(profile, &payload, read / profile.row_bytes());
            break;
        }

        let trailer = skip_bytes(&mut reader, profile.trailer_skip_bytes)?;
        if trailer < profile.trailer_skip_bytes {
            // Payload without its trailer is still a tail, not a block
            out.extend_from_payload(profile, &payload, spb - 1);
            break;
        }
        out.extend_from_payload(profile, &payload, spb);
    }

    Ok(out)
}

/// Decode an in-memory capture in full-file mode.
pub fn decode_full_bytes(
    data: &[u8],
    profile: &SensorProfile,
) -> Result<DecodedSampleSet, DecodeError> {
    decode_full_with_hint(data, profile, Some(data.len() as u64))
}

/// Frame raw row-major samples as a capture: whole blocks get a zeroed
/// trailer, a final partial block is written as a bare payload tail.
///
/// A trailing partial row in `raw` is ignored.
pub fn encode_blocks(profile: &SensorProfile, raw: &[i16]) -> Vec<u8> {
    let row_len = profile.channel_count.max(1);
    let block_len = profile.samples_per_block.max(1) * row_len;
    let usable = raw.len() - raw.len() % row_len;
    let raw = &raw[..usable];

    let mut out = Vec::with_capacity(
        usable * 2 + (usable / block_len + 1) * profile.trailer_skip_bytes,
    );
    for block in raw.chunks(block_len) {
        for value in block {
            out.extend_from_slice(&value.to_le_bytes());
        }
        if block.len() == block_len {
            out.resize(out.len() + profile.trailer_skip_bytes, 0);
        }
    }
    out
}
