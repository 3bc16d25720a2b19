//! GATT service identifiers and measurement parsers for the radio sensor.

use uuid::Uuid;

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Instantaneous power from a Cycling Power Measurement notification.
///
/// Layout: flags (u16 LE), then instantaneous power (i16 LE).
pub fn parse_cycling_power(data: &[u8]) -> Option<i16> {
    if data.len() < 4 {
        return None;
    }
    Some(i16::from_le_bytes([data[2], data[3]]))
}

/// Heart rate from a Heart Rate Measurement notification.
///
/// Bit 0 of the flags byte selects a u16 value instead of u8.
pub fn parse_heart_rate(data: &[u8]) -> Option<u16> {
    let flags = *data.first()?;
    if flags & 0x01 != 0 {
        let bytes = data.get(1..3)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    } else {
        data.get(1).map(|&bpm| bpm as u16)
    }
}
