//! Telemetry sources and arbitration.
//!
//! Two kinds of source feed the controller: a BLE radio sensor (power meter
//! and heart rate strap) and a UDP telemetry feed published by a companion
//! training application. The [`SourceArbiter`] decides which one is live.

pub mod arbiter;
pub mod ble_sensor;
pub mod gatt;
pub mod process;
pub mod zwift;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use arbiter::{SourceArbiter, STARTUP_GRACE};
pub use ble_sensor::RadioSensorWorker;
pub use process::{AlwaysRunning, ProcessProbe, SysinfoProbe};
pub use zwift::{decode_player_state, FeedWorker, TelemetryFrame};

/// Telemetry source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("No sensor found")]
    SensorNotFound,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to bind {0}: {1}")]
    BindFailed(String, String),

    #[error("BLE error: {0}")]
    BleError(String),
}

/// Kind of telemetry source. Serialized with the settings document names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// BLE power meter / heart rate strap
    #[serde(rename = "antplus")]
    RadioSensor,
    /// UDP telemetry from the companion application
    #[serde(rename = "zwift")]
    Feed,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::RadioSensor => write!(f, "radio sensor"),
            SourceKind::Feed => write!(f, "feed"),
        }
    }
}

/// Which source supplies heart rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartRateSource {
    #[serde(rename = "antplus")]
    RadioSensor,
    #[serde(rename = "zwift")]
    Feed,
    /// Radio sensor preferred, feed used while the sensor is silent
    #[serde(rename = "both")]
    Both,
}
