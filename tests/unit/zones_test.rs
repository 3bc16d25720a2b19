//! Unit tests for zone calculations.

use smartfan::config::{HeartRateZoneSettings, Settings};
use smartfan::metrics::{HeartRateZoneTable, PowerZoneTable, ZoneRange};

#[test]
fn test_power_zones_from_ftp_180() {
    let zones = PowerZoneTable::from_settings(&Settings::default());

    // Z0 is exactly 0W
    assert_eq!(zones.z0, ZoneRange::new(0, 0));
    // Z1: 1W to 60% of FTP = 108W
    assert_eq!(zones.z1, ZoneRange::new(1, 108));
    // Z2: 89% of FTP = 160.2W, truncated
    assert_eq!(zones.z2, ZoneRange::new(109, 160));
    // Z3: up to max_watt
    assert_eq!(zones.z3, ZoneRange::new(161, 1000));
}

#[test]
fn test_power_zones_from_ftp_250() {
    let zones = PowerZoneTable::from_ftp(250, 60, 89, 1000);

    assert_eq!(zones.z1, ZoneRange::new(1, 150));
    assert_eq!(zones.z2, ZoneRange::new(151, 222));
    assert_eq!(zones.z3, ZoneRange::new(223, 1000));
}

#[test]
fn test_zone_for_boundaries() {
    let zones = PowerZoneTable::from_ftp(180, 60, 89, 1000);

    assert_eq!(zones.zone_for(0), 0);
    assert_eq!(zones.zone_for(1), 1);
    assert_eq!(zones.zone_for(108), 1);
    assert_eq!(zones.zone_for(109), 2);
    assert_eq!(zones.zone_for(160), 2);
    assert_eq!(zones.zone_for(161), 3);
    // Above max_watt still counts as the top zone
    assert_eq!(zones.zone_for(5000), 3);
}

#[test]
fn test_zone_ceiling_clamped_to_max_watt() {
    // 89% of 500W = 445W, above the 300W limit
    let zones = PowerZoneTable::from_ftp(500, 60, 89, 300);

    assert_eq!(zones.z2.max_watts, 300);
    // 60% of 500W = 300W collides with the Z2 ceiling
    assert_eq!(zones.z1.max_watts, 299);
    assert_eq!(zones.zone_for(299), 1);
    assert_eq!(zones.zone_for(300), 2);
}

#[test]
fn test_range_lookup() {
    let zones = PowerZoneTable::from_ftp(180, 60, 89, 1000);

    assert_eq!(zones.range(2), Some(ZoneRange::new(109, 160)));
    assert_eq!(zones.range(4), None);
}

#[test]
fn test_hr_zones_default_profile() {
    let zones = HeartRateZoneTable::from_settings(&HeartRateZoneSettings::default());

    // Below resting
    assert_eq!(zones.zone_for(0), 0);
    assert_eq!(zones.zone_for(59), 0);
    // 70% of 185 = 129.5 bpm
    assert_eq!(zones.zone_for(60), 1);
    assert_eq!(zones.zone_for(129), 1);
    assert_eq!(zones.zone_for(130), 2);
    // 80% of 185 = 148 bpm, exclusive
    assert_eq!(zones.zone_for(147), 2);
    assert_eq!(zones.zone_for(148), 3);
    assert_eq!(zones.zone_for(200), 3);
}

#[test]
fn test_hr_zone_limits() {
    let zones = HeartRateZoneTable::from_settings(&HeartRateZoneSettings::default());

    assert!((zones.z1_limit() - 129.5).abs() < 1e-9);
    assert!((zones.z2_limit() - 148.0).abs() < 1e-9);
}
