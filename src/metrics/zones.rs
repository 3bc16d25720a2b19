//! Power and heart rate zone calculations.
//!
//! Fan zones run 0..=3. Zone 0 is reserved for zero power; everything above
//! the zone 2 ceiling is zone 3.

use crate::config::{HeartRateZoneSettings, Settings};
use serde::{Deserialize, Serialize};

/// Inclusive watt range of one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRange {
    pub min_watts: u32,
    pub max_watts: u32,
}

impl ZoneRange {
    pub const fn new(min_watts: u32, max_watts: u32) -> Self {
        Self {
            min_watts,
            max_watts,
        }
    }

    pub fn contains(&self, watts: u32) -> bool {
        (self.min_watts..=self.max_watts).contains(&watts)
    }
}

/// Power zone boundaries derived from FTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerZoneTable {
    /// Zone 0: stopped (exactly 0 W)
    pub z0: ZoneRange,
    /// Zone 1: 1 W up to `ftp * z1%`
    pub z1: ZoneRange,
    /// Zone 2: above zone 1 up to `ftp * z2%`
    pub z2: ZoneRange,
    /// Zone 3: above zone 2 up to `max_watt`
    pub z3: ZoneRange,
}

impl PowerZoneTable {
    /// Calculate zone boundaries.
    ///
    /// The zone 2 ceiling never exceeds `max_watt`, and zone 1 always ends at
    /// least one watt below it.
    pub fn from_ftp(ftp: u32, z1_percent: u32, z2_percent: u32, max_watt: u32) -> Self {
        let mut z1_max = ftp * z1_percent / 100;
        let mut z2_max = ftp * z2_percent / 100;

        if z2_max > max_watt {
            tracing::warn!(
                "Zone 2 ceiling {}W exceeds max_watt {}W, clamping",
                z2_max,
                max_watt
            );
            z2_max = max_watt;
        }
        if z1_max >= z2_max {
            let clamped = z2_max.saturating_sub(1);
            tracing::warn!("Zone 1 ceiling {}W clamped to {}W", z1_max, clamped);
            z1_max = clamped;
        }

        Self {
            z0: ZoneRange::new(0, 0),
            z1: ZoneRange::new(1, z1_max),
            z2: ZoneRange::new(z1_max + 1, z2_max),
            z3: ZoneRange::new(z2_max + 1, max_watt),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::from_ftp(
            settings.ftp,
            settings.zone_thresholds.z1_max_percent,
            settings.zone_thresholds.z2_max_percent,
            settings.max_watt,
        )
    }

    /// Get the zone for an averaged power value.
    ///
    /// Values outside every range map to zone 3.
    pub fn zone_for(&self, watts: u32) -> u8 {
        if watts == 0 {
            0
        } else if self.z1.contains(watts) {
            1
        } else if self.z2.contains(watts) {
            2
        } else {
            3
        }
    }

    /// Get the range for a zone number (0-3).
    pub fn range(&self, zone: u8) -> Option<ZoneRange> {
        match zone {
            0 => Some(self.z0),
            1 => Some(self.z1),
            2 => Some(self.z2),
            3 => Some(self.z3),
            _ => None,
        }
    }
}

/// Heart rate zone thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateZoneTable {
    pub resting_hr: u32,
    pub max_hr: u32,
    pub z1_max_percent: u32,
    pub z2_max_percent: u32,
}

impl HeartRateZoneTable {
    pub fn from_settings(settings: &HeartRateZoneSettings) -> Self {
        Self {
            resting_hr: settings.resting_hr,
            max_hr: settings.max_hr,
            z1_max_percent: settings.z1_max_percent,
            z2_max_percent: settings.z2_max_percent,
        }
    }

    /// Get the zone for an averaged heart rate.
    pub fn zone_for(&self, bpm: u32) -> u8 {
        // bpm < max_hr * p / 100, kept in integers
        let below = |percent: u32| bpm * 100 < self.max_hr * percent;

        if bpm == 0 || bpm < self.resting_hr {
            0
        } else if below(self.z1_max_percent) {
            1
        } else if below(self.z2_max_percent) {
            2
        } else {
            3
        }
    }

    /// Zone 1 upper limit in bpm, for display.
    pub fn z1_limit(&self) -> f64 {
        self.max_hr as f64 * self.z1_max_percent as f64 / 100.0
    }

    /// Zone 2 upper limit in bpm, for display.
    pub fn z2_limit(&self) -> f64 {
        self.max_hr as f64 * self.z2_max_percent as f64 / 100.0
    }
}
