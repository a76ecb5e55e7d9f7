//! Capture file names: `<YYYYMMDD>_<HH>_<MM>_<SS>_<sensor-id>.dat`
//!
//! Older recorders prepended a sequence number (`07_20250407_11_28_22_...`).
//! [`strip_sequence_prefix`] removes it; [`parse_capture_name`] itself only
//! accepts the current layout.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameParseError {
    #[error("Expected '<YYYYMMDD>_<HH>_<MM>_<SS>_<sensor>' but got '{0}'")]
    TooFewSegments(String),

    #[error("Invalid date block '{0}'")]
    InvalidDate(String),

    #[error("Non-numeric {field} '{value}'")]
    NonNumeric { field: &'static str, value: String },

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u32 },
}

/// Timestamp and sensor id recovered from a capture file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCaptureName {
    pub base_time: NaiveDateTime,
    /// Everything after the seconds field, without `.dat`
    pub sensor_id: String,
}

/// Final path segment of an object key or local path
pub fn file_name_of(key: &str) -> &str {
    key.rsplit(['/', '\\']).next().unwrap_or(key)
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn time_field(field: &'static str, value: &str, max: u32) -> Result<u32, FilenameParseError> {
    if !all_digits(value) {
        return Err(FilenameParseError::NonNumeric {
            field,
            value: value.to_string(),
        });
    }
    let parsed: u32 = value.parse().map_err(|_| FilenameParseError::NonNumeric {
        field,
        value: value.to_string(),
    })?;
    if parsed > max {
        return Err(FilenameParseError::OutOfRange {
            field,
            value: parsed,
        });
    }
    Ok(parsed)
}

fn parse_date_block(block: &str) -> Result<NaiveDate, FilenameParseError> {
    let invalid = || FilenameParseError::InvalidDate(block.to_string());
    if block.len() != 8 || !all_digits(block) {
        return Err(invalid());
    }
    let year: i32 = block[0..4].parse().map_err(|_| invalid())?;
    let month: u32 = block[4..6].parse().map_err(|_| invalid())?;
    let day: u32 = block[6..8].parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Parse `<YYYYMMDD>_<HH>_<MM>_<SS>_<sensor-id>[.dat]`.
///
/// Directory components are ignored.
pub fn parse_capture_name(name: &str) -> Result<ParsedCaptureName, FilenameParseError> {
    let file = file_name_of(name);
    let mut parts = file.splitn(5, '_');
    let (Some(date), Some(hh), Some(mm), Some(ss), Some(rest)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(FilenameParseError::TooFewSegments(file.to_string()));
    };

    let date = parse_date_block(date)?;
    let hour = time_field("hour", hh, 23)?;
    let minute = time_field("minute", mm, 59)?;
    let second = time_field("second", ss, 59)?;

    let base_time = date
        .and_hms_opt(hour, minute, second)
        .ok_or_else(|| FilenameParseError::InvalidDate(file.to_string()))?;

    let sensor_id = rest.strip_suffix(".dat").unwrap_or(rest).to_string();

    Ok(ParsedCaptureName {
        base_time,
        sensor_id,
    })
}

/// Drop a legacy `<digits>_` sequence prefix that precedes an 8-digit date
/// block. Returns the file name, unchanged when no such prefix exists.
pub fn strip_sequence_prefix(name: &str) -> &str {
    let file = file_name_of(name);
    let Some((head, rest)) = file.split_once('_') else {
        return file;
    };
    let date_follows = rest
        .split_once('_')
        .map(|(date, _)| date.len() == 8 && all_digits(date))
        .unwrap_or(false);

    if all_digits(head) && date_follows {
        rest
    } else {
        file
    }
}

/// [`strip_sequence_prefix`] then [`parse_capture_name`]
pub fn parse_capture_name_lenient(name: &str) -> Result<ParsedCaptureName, FilenameParseError> {
    parse_capture_name(strip_sequence_prefix(name))
}
