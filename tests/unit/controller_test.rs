//! Unit tests for zone decisions, including heart rate zone modes.

use smartfan::config::{Settings, ZoneMode};
use smartfan::control::{SampleValue, ZoneController};
use smartfan::fan::{CommandSlot, FanLevel};
use std::sync::Arc;
use std::time::Duration;

/// Four-sample window that decides on every sample.
fn fast_settings() -> Settings {
    Settings {
        buffer_seconds: 1,
        minimum_samples: 1,
        ..Default::default()
    }
}

fn controller(settings: &Settings) -> (ZoneController, Arc<CommandSlot>) {
    let slot = Arc::new(CommandSlot::new());
    (ZoneController::new(settings, slot.clone()), slot)
}

fn fill(controller: &ZoneController, watts: u32) {
    for _ in 0..4 {
        controller.submit_power(watts).unwrap();
    }
}

fn heart_rate(controller: &ZoneController, bpm: u32) {
    for _ in 0..4 {
        controller.submit_heart_rate(bpm).unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_increase_is_immediate() {
    let (controller, slot) = controller(&fast_settings());

    fill(&controller, 100);
    assert_eq!(controller.current_zone(), Some(1));
    assert_eq!(slot.take(), FanLevel::new(1));

    fill(&controller, 200);
    assert_eq!(controller.current_zone(), Some(3));
    assert!(!controller.in_cooldown());
    assert_eq!(slot.take(), FanLevel::new(3));
}

#[tokio::test(start_paused = true)]
async fn test_decrease_starts_cooldown() {
    let (controller, slot) = controller(&fast_settings());
    fill(&controller, 200);
    slot.take();

    fill(&controller, 50);
    assert!(controller.in_cooldown());
    assert_eq!(controller.current_zone(), Some(3));
    assert_eq!(slot.take(), None);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.cooldown_target, Some(1));
    assert_eq!(snapshot.cooldown_remaining, Some(Duration::from_secs(120)));
}

#[tokio::test(start_paused = true)]
async fn test_equal_candidate_cancels_cooldown() {
    let (controller, slot) = controller(&fast_settings());
    fill(&controller, 130);
    slot.take();

    fill(&controller, 50);
    assert!(controller.in_cooldown());

    fill(&controller, 130);
    assert!(!controller.in_cooldown());
    assert_eq!(controller.current_zone(), Some(2));
    assert_eq!(slot.take(), None);
}

#[tokio::test(start_paused = true)]
async fn test_zero_cooldown_applies_decrease_at_once() {
    let settings = Settings {
        cooldown_seconds: 0,
        ..fast_settings()
    };
    let (controller, slot) = controller(&settings);
    fill(&controller, 200);
    fill(&controller, 50);

    assert_eq!(controller.current_zone(), Some(1));
    assert!(!controller.in_cooldown());
    assert_eq!(slot.take(), FanLevel::new(1));
}

#[tokio::test(start_paused = true)]
async fn test_higher_wins_takes_heart_rate_zone() {
    let mut settings = fast_settings();
    settings.heart_rate_zones.enabled = true;
    settings.heart_rate_zones.zone_mode = ZoneMode::HigherWins;
    let (controller, slot) = controller(&settings);

    fill(&controller, 50);
    assert_eq!(controller.current_zone(), Some(1));

    // 160 bpm is above 80% of 185
    heart_rate(&controller, 160);
    assert_eq!(controller.current_zone(), Some(3));
    assert_eq!(slot.take(), FanLevel::new(3));
    assert_eq!(controller.snapshot().hr_zone, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_hr_only_ignores_power() {
    let mut settings = fast_settings();
    settings.heart_rate_zones.enabled = true;
    settings.heart_rate_zones.zone_mode = ZoneMode::HrOnly;
    let (controller, _slot) = controller(&settings);

    fill(&controller, 300);
    assert_eq!(controller.current_zone(), None);

    heart_rate(&controller, 100);
    assert_eq!(controller.current_zone(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_power_only_logs_heart_rate() {
    let mut settings = fast_settings();
    settings.heart_rate_zones.enabled = true;
    let (controller, _slot) = controller(&settings);

    fill(&controller, 50);
    heart_rate(&controller, 170);
    assert_eq!(controller.current_zone(), Some(1));
    assert_eq!(controller.snapshot().hr_zone, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_heart_rate_zones_have_no_effect() {
    let mut settings = fast_settings();
    settings.heart_rate_zones.zone_mode = ZoneMode::HigherWins;
    let (controller, _slot) = controller(&settings);

    fill(&controller, 50);
    heart_rate(&controller, 170);
    assert_eq!(controller.current_zone(), Some(1));
    assert_eq!(controller.snapshot().hr_zone, None);
}

#[tokio::test(start_paused = true)]
async fn test_sample_kinds() {
    let (controller, _slot) = controller(&fast_settings());

    assert!(controller.submit_power(SampleValue::Integer(150)).is_ok());
    assert!(controller.submit_power(149.9).is_ok());
    assert!(controller.submit_power(f64::INFINITY).is_err());
    assert!(controller.submit_power(f64::NEG_INFINITY).is_err());
    assert!(controller.submit_power(SampleValue::Boolean(false)).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_sample_after_dropout_restarts_fan() {
    let (controller, slot) = controller(&fast_settings());
    fill(&controller, 200);
    slot.take();

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(controller.evaluate_dropout(), FanLevel::new(0));
    assert_eq!(controller.evaluate_dropout(), None);

    controller.submit_power(200).unwrap();
    assert_eq!(controller.current_zone(), Some(3));
    assert_eq!(slot.take(), FanLevel::new(3));
}

#[tokio::test(start_paused = true)]
async fn test_heart_rate_does_not_revive_fan_after_power_dropout() {
    let mut settings = fast_settings();
    settings.heart_rate_zones.enabled = true;
    settings.heart_rate_zones.zone_mode = ZoneMode::HigherWins;
    let (controller, slot) = controller(&settings);

    fill(&controller, 200);
    heart_rate(&controller, 100);
    assert_eq!(controller.current_zone(), Some(3));
    assert_eq!(controller.snapshot().hr_zone, Some(1));
    slot.take();

    // Power stops, the strap keeps reporting once a second.
    let mut levels = Vec::new();
    for _ in 0..12 {
        tokio::time::advance(Duration::from_secs(1)).await;
        controller.evaluate_dropout();
        levels.extend(slot.take());
        controller.submit_heart_rate(100).unwrap();
        levels.extend(slot.take());
    }
    assert_eq!(levels, vec![FanLevel::new(0).unwrap()]);
    assert_eq!(controller.current_zone(), Some(0));
    assert_eq!(controller.snapshot().power_zone, None);

    // Power returning takes over again.
    controller.submit_power(200).unwrap();
    assert_eq!(controller.current_zone(), Some(3));
    assert_eq!(slot.take(), FanLevel::new(3));
}

#[tokio::test(start_paused = true)]
async fn test_slot_holds_latest_decision_after_dropout_and_resume() {
    let (controller, slot) = controller(&fast_settings());
    fill(&controller, 200);
    slot.take();

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(controller.evaluate_dropout(), FanLevel::new(0));
    controller.submit_power(200).unwrap();

    // The slot ends on the level of the most recent decision.
    assert_eq!(slot.peek(), FanLevel::new(3));
    assert_eq!(controller.snapshot().last_dispatched, FanLevel::new(3));
}
