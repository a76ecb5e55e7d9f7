//! Row formatting for the COPY buffers
//!
//! Each decoded sample becomes one line:
//! `time \t machine_id \t value... \t filename \n`, where
//! `time = base_time + index / sampling_rate`.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use super::types::TableBuffer;
use crate::capture::{CaptureFile, DecodedSampleSet, SensorProfile};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Keep the first `samples_per_second` samples of each of the first
/// `seconds` seconds of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownsamplePlan {
    pub samples_per_second: usize,
    pub seconds: usize,
}

impl DownsamplePlan {
    /// Selected sample indices for a capture of `len` rows.
    ///
    /// Stops at the first second that does not hold all of its samples.
    pub fn indices(&self, sampling_rate_hz: u32, len: usize) -> impl Iterator<Item = usize> {
        let rate = sampling_rate_hz as usize;
        let keep = self.samples_per_second.min(rate);
        (0..self.seconds)
            .map_while(move |second| {
                let start = second * rate;
                (start + keep <= len).then_some(start..start + keep)
            })
            .flatten()
    }
}

/// Offset of sample `index` from the capture's base time
pub fn sample_offset(index: usize, sampling_rate_hz: u32) -> TimeDelta {
    let nanos = (index as i64).saturating_mul(1_000_000_000) / i64::from(sampling_rate_hz.max(1));
    TimeDelta::nanoseconds(nanos)
}

/// Column list for `COPY <table> (...)`
pub fn copy_columns(profile: &SensorProfile) -> String {
    let mut columns = vec!["time", "machine_id"];
    columns.extend_from_slice(profile.channel_columns);
    columns.push("filename");
    columns.join(", ")
}

fn write_text_field(out: &mut Vec<u8>, value: &str) {
    if value.contains(['\t', '\n', '\r', '"']) {
        out.push(b'"');
        out.extend_from_slice(value.replace('"', "\"\"").as_bytes());
        out.push(b'"');
    } else {
        out.extend_from_slice(value.as_bytes());
    }
}

fn write_row(
    out: &mut Vec<u8>,
    profile: &SensorProfile,
    time: NaiveDateTime,
    machine_id: &str,
    values: &[f64],
    file_name: &str,
) -> io::Result<()> {
    write!(out, "{}\t", time.format(TIME_FORMAT))?;
    write_text_field(out, machine_id);
    for value in values {
        if profile.is_integer() {
            write!(out, "\t{}", *value as i64)?;
        } else {
            write!(out, "\t{:.6}", value)?;
        }
    }
    out.push(b'\t');
    write_text_field(out, file_name);
    out.push(b'\n');
    Ok(())
}

/// Append one capture's rows to `buffer`; returns the number of rows written.
pub fn append_capture_rows(
    buffer: &mut TableBuffer,
    file: &CaptureFile,
    machine_id: &str,
    samples: &DecodedSampleSet,
    plan: Option<&DownsamplePlan>,
) -> io::Result<u64> {
    let profile = file.profile();
    let rate = profile.sampling_rate_hz;

    let indices: Box<dyn Iterator<Item = usize>> = match plan {
        Some(plan) => Box::new(plan.indices(rate, samples.len())),
        None => Box::new(0..samples.len()),
    };

    let mut written = 0u64;
    let mut last = None;
    for index in indices {
        let Some(values) = samples.row(index) else {
            break;
        };
        let time = file.base_time + sample_offset(index, rate);
        if written == 0 {
            buffer.note_time(time);
        }
        last = Some(time);
        write_row(
            &mut buffer.data,
            profile,
            time,
            machine_id,
            values,
            &file.file_name,
        )?;
        written += 1;
    }

    if let Some(time) = last {
        buffer.note_time(time);
    }
    buffer.rows += written;
    if written > 0 {
        buffer.files += 1;
    }
    Ok(written)
}
