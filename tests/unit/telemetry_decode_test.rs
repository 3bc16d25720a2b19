//! Unit tests for feed datagram decoding.

use smartfan::sources::{decode_player_state, TelemetryFrame};

/// Datagram as emitted by the companion simulator with 235W and 152 bpm.
fn simulator_datagram() -> Vec<u8> {
    vec![
        0x00, 0x00, 0x00, 0x00, // header
        0x08, 0x01, // field 1
        0x10, 0xAA, 0xBB, 0x01, // field 2
        0x18, 0xCC, 0xDD, 0xEE, 0xFF, 0x01, // field 3
        0x20, 0xEB, 0x01, // power 235
        0x28, 0x5A, // cadence 90
        0x30, 0x98, 0x01, // heart rate 152
    ]
}

#[test]
fn test_simulator_datagram() {
    let frame = decode_player_state(&simulator_datagram());
    assert_eq!(
        frame,
        TelemetryFrame {
            power: Some(235),
            heart_rate: Some(152),
        }
    );
}

#[test]
fn test_power_without_heart_rate() {
    let data = [0x00, 0x00, 0x00, 0x00, 0x20, 0x64, 0x28, 0x50];
    let frame = decode_player_state(&data);
    assert_eq!(frame.power, Some(100));
    assert_eq!(frame.heart_rate, None);
}

#[test]
fn test_header_only_is_empty() {
    assert_eq!(decode_player_state(&[0x00; 5]), TelemetryFrame::default());
}

#[test]
fn test_truncated_datagrams_never_panic() {
    let full = simulator_datagram();
    for len in 0..full.len() {
        let frame = decode_player_state(&full[..len]);
        if let Some(power) = frame.power {
            assert_eq!(power, 235);
        }
    }
}

#[test]
fn test_length_delimited_past_end_stops() {
    // field 7, length 200, only two bytes follow
    let data = [0x00, 0x00, 0x00, 0x00, 0x3A, 0xC8, 0x01, 0x20, 0x64];
    assert_eq!(decode_player_state(&data).power, None);
}
