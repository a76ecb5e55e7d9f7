//! Capture format properties
#![allow(clippy::unwrap_used)]

use pdm_ingest::capture::{
    decode_full_bytes, decode_window, encode_blocks, parse_capture_name, DecodeError,
    ACC_PROFILE, MIC_PROFILE,
};
use proptest::prelude::*;

fn acc_raw(rows: usize) -> Vec<i16> {
    (0..rows * 3).map(|i| (i as i16).wrapping_mul(31)).collect()
}

#[test]
fn test_acc_whole_blocks_scaled() {
    let raw = acc_raw(2000);
    let bytes = encode_blocks(&ACC_PROFILE, &raw);
    assert_eq!(bytes.len(), 2 * 6008);

    let decoded = decode_full_bytes(&bytes, &ACC_PROFILE).unwrap();
    assert_eq!(decoded.len(), 2000);
    for (i, row) in decoded.rows().enumerate() {
        for channel in 0..3 {
            let expected = f64::from(raw[i * 3 + channel]) * 0.000488;
            assert!((row[channel] - expected).abs() < 1e-12, "row {} channel {}", i, channel);
        }
    }
}

#[test]
fn test_mic_keeps_integers() {
    let raw: Vec<i16> = vec![i16::MIN, -1, 0, 1, i16::MAX];
    let mut full: Vec<i16> = raw.iter().copied().cycle().take(1000).collect();
    full[999] = 42;
    let decoded = decode_full_bytes(&encode_blocks(&MIC_PROFILE, &full), &MIC_PROFILE).unwrap();
    assert_eq!(decoded.len(), 1000);
    assert_eq!(decoded.row(0).unwrap(), &[f64::from(i16::MIN)]);
    assert_eq!(decoded.row(4).unwrap(), &[f64::from(i16::MAX)]);
    assert_eq!(decoded.row(999).unwrap(), &[42.0]);
}

#[test]
fn test_windowed_demands_enough_blocks() {
    let bytes = encode_blocks(&ACC_PROFILE, &acc_raw(1000));
    assert_eq!(decode_window(&bytes[..], &ACC_PROFILE, 1000).unwrap().len(), 1000);
    assert!(matches!(
        decode_window(&bytes[..], &ACC_PROFILE, 1001),
        Err(DecodeError::TruncatedCapture { .. })
    ));
}

#[test]
fn test_documented_file_name_example() {
    let parsed = parse_capture_name("20250407_11_28_22_MP23ABS1_MIC.dat").unwrap();
    assert_eq!(parsed.base_time.to_string(), "2025-04-07 11:28:22");
    assert!(parse_capture_name("20250407_24_28_22_MP23ABS1_MIC.dat").is_err());
    assert!(parse_capture_name("20250407_11_x8_22_MP23ABS1_MIC.dat").is_err());
}

proptest! {
    #[test]
    fn prop_round_trip(raw in prop::collection::vec(any::<i16>(), 0..5000)) {
        let bytes = encode_blocks(&MIC_PROFILE, &raw);
        let decoded = decode_full_bytes(&bytes, &MIC_PROFILE).unwrap();
        let values: Vec<i16> = decoded.values().iter().map(|v| *v as i16).collect();
        prop_assert_eq!(values, raw);
    }

    #[test]
    fn prop_acc_row_count_bounds(blocks in 0usize..4, tail in 0usize..6008) {
        let mut bytes = encode_blocks(&ACC_PROFILE, &acc_raw(blocks * 1000));
        bytes.extend(std::iter::repeat(0x11u8).take(tail));

        let decoded = decode_full_bytes(&bytes, &ACC_PROFILE).unwrap();
        prop_assert!(decoded.len() >= blocks * 1000);
        prop_assert!(decoded.len() <= blocks * 1000 + 999);
        prop_assert_eq!(decoded.len() - blocks * 1000, (tail / 6).min(999));
    }

    #[test]
    fn prop_windowed_never_partial(blocks in 0usize..3, extra in 1usize..1500) {
        let bytes = encode_blocks(&ACC_PROFILE, &acc_raw(blocks * 1000));
        let demanded = blocks * 1000 + extra;
        let truncated = matches!(
            decode_window(&bytes[..], &ACC_PROFILE, demanded),
            Err(DecodeError::TruncatedCapture { .. })
        );
        prop_assert!(truncated);
    }
}
