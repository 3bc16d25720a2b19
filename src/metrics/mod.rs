//! Zone tables and sample averaging.

pub mod smoothing;
pub mod zones;

pub use smoothing::SampleBuffer;
pub use zones::{HeartRateZoneTable, PowerZoneTable, ZoneRange};
