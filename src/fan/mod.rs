//! Fan actuator command path.
//!
//! Levels flow from the zone controller into a [`CommandSlot`], which keeps only
//! the newest one. The [`CommandDispatcher`] delivery worker drains the slot and
//! writes `LEVEL:<n>` over a [`FanLink`].

pub mod dispatcher;
pub mod link;
pub mod slot;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dispatcher::{CommandDispatcher, RetryPolicy};
pub use link::{BleFanLink, FanLink};
pub use slot::CommandSlot;

/// Fan actuator errors.
#[derive(Debug, Error)]
pub enum FanError {
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    #[error("Fan controller not found: {0}")]
    DeviceNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Command characteristic not found")]
    CharacteristicNotFound,

    #[error("Not connected")]
    NotConnected,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Write timed out")]
    WriteTimeout,

    #[error("Invalid fan level: {0}")]
    InvalidLevel(String),

    #[error("Command channel closed")]
    Closed,

    #[error("BLE error: {0}")]
    BleError(String),
}

/// A fan level, 0 (off) to 3 (full).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FanLevel(u8);

impl FanLevel {
    pub const OFF: FanLevel = FanLevel(0);
    pub const MAX: u8 = 3;

    /// Returns `None` for values above 3.
    pub const fn new(level: u8) -> Option<Self> {
        if level <= Self::MAX {
            Some(Self(level))
        } else {
            None
        }
    }

    /// Level for a zone, saturating at 3.
    pub fn from_zone(zone: u8) -> Self {
        Self(zone.min(Self::MAX))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Wire payload for the actuator.
    pub fn command(self) -> String {
        format!("LEVEL:{}", self.0)
    }
}

impl TryFrom<i64> for FanLevel {
    type Error = FanError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(FanLevel::new)
            .ok_or_else(|| FanError::InvalidLevel(value.to_string()))
    }
}

impl std::fmt::Display for FanLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
