use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use super::types::{Batch, TableNames};
use crate::capture::CaptureFile;

/// Slice the ordered capture list into batches of `batch_size` files.
///
/// Order is preserved and the last batch may be shorter. A zero batch size
/// yields a single batch holding everything; configuration validation
/// rejects it before a run gets here.
pub fn plan_batches(files: Vec<CaptureFile>, batch_size: usize) -> Vec<Batch> {
    if files.is_empty() {
        return Vec::new();
    }
    let size = if batch_size == 0 { files.len() } else { batch_size };

    let mut batches = Vec::with_capacity(files.len().div_ceil(size));
    let mut files = files.into_iter().peekable();
    while files.peek().is_some() {
        let chunk: Vec<CaptureFile> = files.by_ref().take(size).collect();
        batches.push(Batch {
            index: batches.len(),
            files: chunk,
        });
    }
    batches
}

/// Earliest capture time per table among the batches after each index.
///
/// `floors[i]` bounds what batches `i + 1..` can still write, so chunks that
/// end before it are closed once batch `i` is loaded, whatever the key order.
/// A table absent from `floors[i]` receives no more files.
pub fn pending_floors(
    batches: &[Batch],
    tables: &TableNames,
) -> Vec<BTreeMap<String, NaiveDateTime>> {
    let mut floors = vec![BTreeMap::new(); batches.len()];
    let mut ahead: BTreeMap<String, NaiveDateTime> = BTreeMap::new();

    for (i, batch) in batches.iter().enumerate().rev() {
        floors[i] = ahead.clone();
        for file in &batch.files {
            ahead
                .entry(tables.for_sensor(file.sensor).to_string())
                .and_modify(|floor| *floor = (*floor).min(file.base_time))
                .or_insert(file.base_time);
        }
    }
    floors
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pdm_common::SensorKind;

    fn at(sensor: SensorKind, hour: u32) -> CaptureFile {
        CaptureFile {
            sensor,
            key: format!("m/{}/{:02}.dat", sensor, hour),
            file_name: format!("{:02}.dat", hour),
            base_time: NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            size: 2008,
        }
    }

    fn file(i: usize) -> CaptureFile {
        CaptureFile {
            sensor: SensorKind::Mic,
            key: format!("m/raw_dat/mic/{:05}.dat", i),
            file_name: format!("{:05}.dat", i),
            base_time: NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            size: 2008,
        }
    }

    #[test]
    fn test_plan_even_and_remainder() {
        let batches = plan_batches((0..7).map(file).collect(), 3);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batches[2].index, 2);
        assert_eq!(batches[1].files[0].key, file(3).key);
    }

    #[test]
    fn test_plan_empty() {
        assert!(plan_batches(Vec::new(), 10).is_empty());
    }

    #[test]
    fn test_plan_zero_size_is_single_batch() {
        let batches = plan_batches((0..4).map(file).collect(), 0);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 4);
    }

    #[test]
    fn test_pending_floors_follow_time_not_key_order() {
        let tables = TableNames::default();
        let files = vec![
            at(SensorKind::Mic, 9),
            at(SensorKind::Mic, 3),
            at(SensorKind::Acc, 5),
            at(SensorKind::Mic, 7),
        ];
        let floors = pending_floors(&plan_batches(files, 1), &tables);

        let hour = |h| NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(h, 0, 0).unwrap();
        assert_eq!(floors.len(), 4);
        assert_eq!(floors[0]["normal_mic_data"], hour(3));
        assert_eq!(floors[0]["normal_acc_data"], hour(5));
        assert_eq!(floors[1]["normal_mic_data"], hour(7));
        assert!(!floors[2].contains_key("normal_acc_data"));
        assert!(floors[3].is_empty());
    }
}
