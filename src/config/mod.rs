//! Controller settings.
//!
//! The settings document is JSON. Every field has a default, and the loader in
//! [`loader`] substitutes the default for any field that fails validation, so a
//! [`Settings`] value is always internally consistent once loaded.

pub mod loader;

use crate::sources::{HeartRateSource, SourceKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub use loader::{load_settings, parse_settings, save_settings};

/// Samples per second assumed when sizing the averaging window.
pub const SAMPLES_PER_SECOND: usize = 4;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

/// Complete controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Functional threshold power in watts
    pub ftp: u32,
    /// Lowest accepted power sample
    pub min_watt: u32,
    /// Highest accepted power sample, also the top of zone 3
    pub max_watt: u32,
    /// Delay before a zone decrease takes effect
    pub cooldown_seconds: u64,
    /// Averaging window length; capacity is `buffer_seconds * 4` samples
    pub buffer_seconds: usize,
    /// Samples required before the averager produces a decision
    pub minimum_samples: usize,
    /// Silence after which the fan is forced to zone 0
    pub dropout_timeout: u64,
    /// Skip the cooldown when average power drops to zero
    pub zero_power_immediate: bool,
    pub zone_thresholds: ZoneThresholds,
    pub ble: BleSettings,
    pub data_source: DataSourceSettings,
    pub antplus_bridge: BridgeSettings,
    pub heart_rate_zones: HeartRateZoneSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ftp: 180,
            min_watt: 0,
            max_watt: 1000,
            cooldown_seconds: 120,
            buffer_seconds: 3,
            minimum_samples: 8,
            dropout_timeout: 5,
            zero_power_immediate: false,
            zone_thresholds: ZoneThresholds::default(),
            ble: BleSettings::default(),
            data_source: DataSourceSettings::default(),
            antplus_bridge: BridgeSettings::default(),
            heart_rate_zones: HeartRateZoneSettings::default(),
        }
    }
}

impl Settings {
    /// Number of samples held by each averaging window.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_seconds * SAMPLES_PER_SECOND
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn dropout(&self) -> Duration {
        Duration::from_secs(self.dropout_timeout)
    }

    /// Zone mode in effect, taking the heart rate `enabled` switch into account.
    pub fn effective_zone_mode(&self) -> ZoneMode {
        if self.heart_rate_zones.enabled {
            self.heart_rate_zones.zone_mode
        } else {
            ZoneMode::PowerOnly
        }
    }
}

/// Power zone breakpoints as a percentage of FTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneThresholds {
    pub z1_max_percent: u32,
    pub z2_max_percent: u32,
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            z1_max_percent: 60,
            z2_max_percent: 89,
        }
    }
}

/// Fan actuator link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BleSettings {
    /// Log commands instead of delivering them
    pub skip_connection: bool,
    /// Advertised name of the fan controller
    pub device_name: String,
    pub scan_timeout: u64,
    pub connection_timeout: u64,
    /// Delay between reconnect attempts
    pub reconnect_interval: u64,
    /// Reconnect attempts before the cool-off period
    pub max_retries: u32,
    /// Upper bound on a single command write
    pub command_timeout: u64,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    /// Pairing PIN, if the controller requires one
    pub pin_code: Option<u32>,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            skip_connection: false,
            device_name: "FanController".to_string(),
            scan_timeout: 10,
            connection_timeout: 15,
            reconnect_interval: 5,
            max_retries: 10,
            command_timeout: 3,
            service_uuid: Uuid::from_u128(0x0000_ffe0_0000_1000_8000_0080_5f9b_34fb),
            characteristic_uuid: Uuid::from_u128(0x0000_ffe1_0000_1000_8000_0080_5f9b_34fb),
            pin_code: None,
        }
    }
}

impl BleSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

/// Fallback source choice. `none` disables arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fallback {
    #[serde(rename = "zwift")]
    Feed,
    #[serde(rename = "none")]
    Disabled,
}

impl Fallback {
    pub fn kind(self) -> Option<SourceKind> {
        match self {
            Fallback::Feed => Some(SourceKind::Feed),
            Fallback::Disabled => None,
        }
    }
}

/// Telemetry source selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSettings {
    pub primary: SourceKind,
    pub fallback: Fallback,
    pub heart_rate_source: HeartRateSource,
    pub zwift: FeedSettings,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            primary: SourceKind::RadioSensor,
            fallback: Fallback::Feed,
            heart_rate_source: HeartRateSource::RadioSensor,
            zwift: FeedSettings::default(),
        }
    }
}

impl DataSourceSettings {
    /// The fallback source, or `None` when disabled or equal to the primary.
    pub fn fallback_kind(&self) -> Option<SourceKind> {
        self.fallback.kind().filter(|kind| *kind != self.primary)
    }
}

/// UDP telemetry feed settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSettings {
    pub port: u16,
    pub host: String,
    /// Companion application whose presence enables the feed
    pub process_name: String,
    /// Seconds between process probes and liveness evaluations
    pub check_interval: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            port: 3022,
            host: "127.0.0.1".to_string(),
            process_name: "ZwiftApp.exe".to_string(),
            check_interval: 5,
        }
    }
}

impl FeedSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Rebroadcast bridge settings. Parsed for compatibility; only the heart
/// rate switch affects the radio sensor subscription.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BridgeSettings {
    pub enabled: bool,
    pub heart_rate: BridgeHeartRate,
    pub ble_broadcast: BroadcastSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeHeartRate {
    pub enabled: bool,
    pub device_id: u16,
}

impl Default for BridgeHeartRate {
    fn default() -> Self {
        Self {
            enabled: true,
            device_id: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastSettings {
    pub enabled: bool,
    pub power_service: bool,
    pub heart_rate_service: bool,
    pub device_name: String,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            power_service: true,
            heart_rate_service: true,
            device_name: "SmartFanBridge".to_string(),
        }
    }
}

/// How heart rate zones combine with power zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneMode {
    /// Heart rate is logged but never drives the fan
    #[default]
    PowerOnly,
    /// Heart rate alone drives the fan
    HrOnly,
    /// The higher of the two zones wins
    HigherWins,
}

impl std::fmt::Display for ZoneMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneMode::PowerOnly => write!(f, "power_only"),
            ZoneMode::HrOnly => write!(f, "hr_only"),
            ZoneMode::HigherWins => write!(f, "higher_wins"),
        }
    }
}

/// Heart rate zone profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateZoneSettings {
    pub enabled: bool,
    pub max_hr: u32,
    pub resting_hr: u32,
    pub zone_mode: ZoneMode,
    pub z1_max_percent: u32,
    pub z2_max_percent: u32,
}

impl Default for HeartRateZoneSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_hr: 185,
            resting_hr: 60,
            zone_mode: ZoneMode::PowerOnly,
            z1_max_percent: 70,
            z2_max_percent: 80,
        }
    }
}
