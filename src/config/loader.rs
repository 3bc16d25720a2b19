//! Settings document loading and validation.
//!
//! The document is read as an untyped JSON tree and copied field by field onto
//! [`Settings::default()`]. A field that has the wrong type or is out of range
//! keeps its default and produces a warning, so a partially broken document
//! still yields a usable configuration.

use super::{ConfigError, Fallback, Settings, ZoneMode};
use crate::sources::{HeartRateSource, SourceKind};
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

const TOP_LEVEL_KEYS: &[&str] = &[
    "ftp",
    "min_watt",
    "max_watt",
    "cooldown_seconds",
    "buffer_seconds",
    "minimum_samples",
    "dropout_timeout",
    "zero_power_immediate",
    "zone_thresholds",
    "ble",
    "data_source",
    "antplus_bridge",
    "heart_rate_zones",
];

const FEED_KEYS: &[&str] = &["port", "host", "process_name", "check_interval"];

/// Load settings from `path`.
///
/// A missing file is created with the defaults. Unreadable or malformed files
/// fall back to the defaults. This function never fails.
pub fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        tracing::warn!("{} not found, using default settings", path.display());
        match save_settings(path, &Settings::default()) {
            Ok(()) => tracing::info!("Wrote default settings to {}", path.display()),
            Err(e) => tracing::warn!("Could not write default settings: {}", e),
        }
        return Settings::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return Settings::default();
        }
    };

    match parse_settings(&content) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Invalid settings file {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

/// Parse and validate a settings document.
///
/// Returns an error only when the text is not a JSON object.
pub fn parse_settings(content: &str) -> Result<Settings, ConfigError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    let root = value
        .as_object()
        .ok_or_else(|| ConfigError::ParseError("top level must be an object".to_string()))?;

    let mut validator = Validator::default();
    let settings = validator.settings(root);

    if validator.failed {
        tracing::warn!("Settings contained invalid values; defaults were used for them");
    }

    Ok(settings)
}

/// Write settings as pretty-printed JSON.
pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
    }

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Numeric value of a JSON field. Booleans are not numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Integer value of a JSON field, rejecting fractional numbers.
fn as_strict_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

#[derive(Default)]
struct Validator {
    failed: bool,
}

impl Validator {
    fn reject(&mut self, path: &str, value: &Value, expected: &str) {
        tracing::warn!("Invalid '{}' value: {} ({})", path, value, expected);
        self.failed = true;
    }

    /// Numeric field checked before truncation, e.g. 99.5 fails `>= 100`.
    fn number(
        &mut self,
        obj: &Map<String, Value>,
        path: &str,
        key: &str,
        valid: impl Fn(f64) -> bool,
        expected: &str,
    ) -> Option<i64> {
        let value = obj.get(key)?;
        match as_number(value) {
            Some(n) if valid(n) => Some(n.trunc() as i64),
            _ => {
                self.reject(&join(path, key), value, expected);
                None
            }
        }
    }

    /// Integer-only field.
    fn integer(
        &mut self,
        obj: &Map<String, Value>,
        path: &str,
        key: &str,
        range: std::ops::RangeInclusive<i64>,
    ) -> Option<i64> {
        let value = obj.get(key)?;
        match as_strict_integer(value) {
            Some(n) if range.contains(&n) => Some(n),
            _ => {
                let expected = format!("integer {}-{}", range.start(), range.end());
                self.reject(&join(path, key), value, &expected);
                None
            }
        }
    }

    fn boolean(&mut self, obj: &Map<String, Value>, path: &str, key: &str) -> Option<bool> {
        let value = obj.get(key)?;
        match value {
            Value::Bool(b) => Some(*b),
            _ => {
                self.reject(&join(path, key), value, "true or false");
                None
            }
        }
    }

    fn text(&mut self, obj: &Map<String, Value>, path: &str, key: &str) -> Option<String> {
        let value = obj.get(key)?;
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => {
                self.reject(&join(path, key), value, "non-empty string");
                None
            }
        }
    }

    fn uuid(&mut self, obj: &Map<String, Value>, path: &str, key: &str) -> Option<Uuid> {
        let value = obj.get(key)?;
        match value.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
            Some(uuid) => Some(uuid),
            None => {
                self.reject(&join(path, key), value, "UUID string");
                None
            }
        }
    }

    /// One of a fixed set of names.
    fn choice<T: Copy>(
        &mut self,
        obj: &Map<String, Value>,
        path: &str,
        key: &str,
        options: &[(&str, T)],
    ) -> Option<T> {
        let value = obj.get(key)?;
        let found = value
            .as_str()
            .and_then(|s| options.iter().find(|(name, _)| *name == s))
            .map(|(_, option)| *option);
        if found.is_none() {
            let names: Vec<&str> = options.iter().map(|(name, _)| *name).collect();
            self.reject(&join(path, key), value, &format!("one of {}", names.join(", ")));
        }
        found
    }

    fn section<'a>(
        &mut self,
        obj: &'a Map<String, Value>,
        path: &str,
        key: &str,
    ) -> Option<&'a Map<String, Value>> {
        let value = obj.get(key)?;
        match value.as_object() {
            Some(section) => Some(section),
            None => {
                self.reject(&join(path, key), value, "object");
                None
            }
        }
    }

    fn settings(&mut self, root: &Map<String, Value>) -> Settings {
        let mut s = Settings::default();

        if let Some(v) = self.number(root, "", "ftp", |n| (100.0..=500.0).contains(&n), "100-500") {
            s.ftp = v as u32;
        }
        if let Some(v) = self.number(
            root,
            "",
            "min_watt",
            |n| n >= 0.0 && n <= u32::MAX as f64,
            "0 or more",
        ) {
            s.min_watt = v as u32;
        }
        if let Some(v) = self.number(
            root,
            "",
            "max_watt",
            |n| n > 0.0 && n <= u32::MAX as f64,
            "greater than 0",
        ) {
            s.max_watt = v as u32;
        }
        if let Some(v) = self.number(
            root,
            "",
            "cooldown_seconds",
            |n| (0.0..=300.0).contains(&n),
            "0-300",
        ) {
            s.cooldown_seconds = v as u64;
        }
        if let Some(v) = self.number(
            root,
            "",
            "buffer_seconds",
            |n| (1.0..=10.0).contains(&n),
            "1-10",
        ) {
            s.buffer_seconds = v as usize;
        }
        if let Some(v) = self.number(
            root,
            "",
            "minimum_samples",
            |n| n >= 1.0 && n <= u32::MAX as f64,
            "greater than 0",
        ) {
            s.minimum_samples = v as usize;
        }
        if let Some(v) = self.number(
            root,
            "",
            "dropout_timeout",
            |n| n >= 1.0 && n <= 86_400.0,
            "greater than 0",
        ) {
            s.dropout_timeout = v as u64;
        }
        if let Some(v) = self.boolean(root, "", "zero_power_immediate") {
            s.zero_power_immediate = v;
        }

        if let Some(zones) = self.section(root, "", "zone_thresholds") {
            self.zone_thresholds(zones, &mut s);
        }
        if let Some(ble) = self.section(root, "", "ble") {
            self.ble(ble, &mut s);
        }
        if let Some(sources) = self.section(root, "", "data_source") {
            self.data_source(sources, &mut s);
        }
        if let Some(bridge) = self.section(root, "", "antplus_bridge") {
            self.bridge(bridge, &mut s);
        }
        if let Some(hr) = self.section(root, "", "heart_rate_zones") {
            self.heart_rate_zones(hr, &mut s);
        }

        let defaults = Settings::default();

        if s.min_watt >= s.max_watt {
            tracing::warn!(
                "'min_watt' ({}) >= 'max_watt' ({}), using defaults",
                s.min_watt,
                s.max_watt
            );
            s.min_watt = defaults.min_watt;
            s.max_watt = defaults.max_watt;
            self.failed = true;
        }

        let capacity = s.buffer_capacity();
        if s.minimum_samples > capacity {
            tracing::warn!(
                "'minimum_samples' ({}) exceeds buffer size ({}), clamping",
                s.minimum_samples,
                capacity
            );
            s.minimum_samples = capacity;
            self.failed = true;
        }

        let unknown: Vec<&str> = root
            .keys()
            .map(String::as_str)
            .filter(|key| !TOP_LEVEL_KEYS.contains(key))
            .collect();
        if !unknown.is_empty() {
            tracing::warn!("Unknown settings key(s): {}", unknown.join(", "));
        }

        s
    }

    fn zone_thresholds(&mut self, obj: &Map<String, Value>, s: &mut Settings) {
        let path = "zone_thresholds";
        let percent = |n: f64| (1.0..=100.0).contains(&n);
        if let Some(v) = self.number(obj, path, "z1_max_percent", percent, "1-100") {
            s.zone_thresholds.z1_max_percent = v as u32;
        }
        if let Some(v) = self.number(obj, path, "z2_max_percent", percent, "1-100") {
            s.zone_thresholds.z2_max_percent = v as u32;
        }
        if s.zone_thresholds.z1_max_percent >= s.zone_thresholds.z2_max_percent {
            tracing::warn!("'z1_max_percent' must be below 'z2_max_percent', using defaults");
            s.zone_thresholds = Default::default();
            self.failed = true;
        }
    }

    fn ble(&mut self, obj: &Map<String, Value>, s: &mut Settings) {
        let path = "ble";
        let ble = &mut s.ble;
        if let Some(v) = self.boolean(obj, path, "skip_connection") {
            ble.skip_connection = v;
        }
        if let Some(v) = self.text(obj, path, "device_name") {
            ble.device_name = v;
        }
        let seconds = |n: f64| (1.0..=60.0).contains(&n);
        if let Some(v) = self.number(obj, path, "scan_timeout", seconds, "1-60") {
            ble.scan_timeout = v as u64;
        }
        if let Some(v) = self.number(obj, path, "connection_timeout", seconds, "1-60") {
            ble.connection_timeout = v as u64;
        }
        if let Some(v) = self.number(obj, path, "reconnect_interval", seconds, "1-60") {
            ble.reconnect_interval = v as u64;
        }
        if let Some(v) = self.number(
            obj,
            path,
            "max_retries",
            |n| (1.0..=100.0).contains(&n),
            "1-100",
        ) {
            ble.max_retries = v as u32;
        }
        if let Some(v) = self.number(
            obj,
            path,
            "command_timeout",
            |n| (1.0..=30.0).contains(&n),
            "1-30",
        ) {
            ble.command_timeout = v as u64;
        }
        if let Some(v) = self.uuid(obj, path, "service_uuid") {
            ble.service_uuid = v;
        }
        if let Some(v) = self.uuid(obj, path, "characteristic_uuid") {
            ble.characteristic_uuid = v;
        }
        match obj.get("pin_code") {
            Some(Value::Null) => ble.pin_code = None,
            Some(_) => {
                if let Some(v) = self.integer(obj, path, "pin_code", 0..=999_999) {
                    ble.pin_code = Some(v as u32);
                }
            }
            None => {}
        }
    }

    fn data_source(&mut self, obj: &Map<String, Value>, s: &mut Settings) {
        let path = "data_source";
        let sources = &mut s.data_source;
        if let Some(v) = self.choice(
            obj,
            path,
            "primary",
            &[("antplus", SourceKind::RadioSensor), ("zwift", SourceKind::Feed)],
        ) {
            sources.primary = v;
        }
        if let Some(v) = self.choice(
            obj,
            path,
            "fallback",
            &[("zwift", Fallback::Feed), ("none", Fallback::Disabled)],
        ) {
            sources.fallback = v;
        }
        if sources.fallback.kind() == Some(sources.primary) {
            tracing::warn!("Primary and fallback source are the same, disabling fallback");
            sources.fallback = Fallback::Disabled;
            self.failed = true;
        }
        if let Some(v) = self.choice(
            obj,
            path,
            "heart_rate_source",
            &[
                ("antplus", HeartRateSource::RadioSensor),
                ("zwift", HeartRateSource::Feed),
                ("both", HeartRateSource::Both),
            ],
        ) {
            sources.heart_rate_source = v;
        }

        let Some(feed) = self.section(obj, path, "zwift") else {
            return;
        };
        let path = "data_source.zwift";
        if let Some(v) = self.integer(feed, path, "port", 1..=65_535) {
            sources.zwift.port = v as u16;
        }
        if let Some(v) = self.text(feed, path, "host") {
            sources.zwift.host = v;
        }
        if let Some(v) = self.text(feed, path, "process_name") {
            sources.zwift.process_name = v;
        }
        if let Some(v) = self.number(
            feed,
            path,
            "check_interval",
            |n| (1.0..=60.0).contains(&n),
            "1-60",
        ) {
            sources.zwift.check_interval = v as u64;
        }
        let unknown: Vec<&str> = feed
            .keys()
            .map(String::as_str)
            .filter(|key| !FEED_KEYS.contains(key))
            .collect();
        if !unknown.is_empty() {
            tracing::warn!("Unknown zwift key(s): {}", unknown.join(", "));
        }
    }

    fn bridge(&mut self, obj: &Map<String, Value>, s: &mut Settings) {
        let path = "antplus_bridge";
        let bridge = &mut s.antplus_bridge;
        if let Some(v) = self.boolean(obj, path, "enabled") {
            bridge.enabled = v;
        }
        if let Some(hr) = self.section(obj, path, "heart_rate") {
            let path = "antplus_bridge.heart_rate";
            if let Some(v) = self.boolean(hr, path, "enabled") {
                bridge.heart_rate.enabled = v;
            }
            if let Some(v) = self.integer(hr, path, "device_id", 0..=65_535) {
                bridge.heart_rate.device_id = v as u16;
            }
        }
        if let Some(broadcast) = self.section(obj, path, "ble_broadcast") {
            let path = "antplus_bridge.ble_broadcast";
            let target = &mut bridge.ble_broadcast;
            if let Some(v) = self.boolean(broadcast, path, "enabled") {
                target.enabled = v;
            }
            if let Some(v) = self.boolean(broadcast, path, "power_service") {
                target.power_service = v;
            }
            if let Some(v) = self.boolean(broadcast, path, "heart_rate_service") {
                target.heart_rate_service = v;
            }
            if let Some(v) = self.text(broadcast, path, "device_name") {
                target.device_name = v;
            }
        }
    }

    fn heart_rate_zones(&mut self, obj: &Map<String, Value>, s: &mut Settings) {
        let path = "heart_rate_zones";
        let hr = &mut s.heart_rate_zones;
        if let Some(v) = self.boolean(obj, path, "enabled") {
            hr.enabled = v;
        }
        if let Some(v) = self.number(
            obj,
            path,
            "max_hr",
            |n| (100.0..=220.0).contains(&n),
            "100-220",
        ) {
            hr.max_hr = v as u32;
        }
        if let Some(v) = self.number(
            obj,
            path,
            "resting_hr",
            |n| (30.0..=100.0).contains(&n),
            "30-100",
        ) {
            hr.resting_hr = v as u32;
        }
        if let Some(v) = self.choice(
            obj,
            path,
            "zone_mode",
            &[
                ("power_only", ZoneMode::PowerOnly),
                ("hr_only", ZoneMode::HrOnly),
                ("higher_wins", ZoneMode::HigherWins),
            ],
        ) {
            hr.zone_mode = v;
        }
        let percent = |n: f64| (1.0..=100.0).contains(&n);
        if let Some(v) = self.number(obj, path, "z1_max_percent", percent, "1-100") {
            hr.z1_max_percent = v as u32;
        }
        if let Some(v) = self.number(obj, path, "z2_max_percent", percent, "1-100") {
            hr.z2_max_percent = v as u32;
        }

        let defaults = super::HeartRateZoneSettings::default();
        if hr.z1_max_percent >= hr.z2_max_percent {
            tracing::warn!(
                "heart rate 'z1_max_percent' must be below 'z2_max_percent', using defaults"
            );
            hr.z1_max_percent = defaults.z1_max_percent;
            hr.z2_max_percent = defaults.z2_max_percent;
            self.failed = true;
        }
        // resting_hr < max_hr * z1 / 100, compared without rounding
        if hr.resting_hr * 100 >= hr.max_hr * hr.z1_max_percent {
            tracing::warn!(
                "'resting_hr' ({}) is not below the zone 1 limit, using defaults",
                hr.resting_hr
            );
            hr.resting_hr = defaults.resting_hr;
            hr.z1_max_percent = defaults.z1_max_percent;
            hr.z2_max_percent = defaults.z2_max_percent;
            self.failed = true;
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}
