//! Service startup and ordered shutdown.

use super::fan_mock::RecordingLink;
use smartfan::app::FanService;
use smartfan::config::{Fallback, Settings};
use smartfan::fan::{FanLevel, FanLink};
use smartfan::sources::SourceKind;
use std::time::Duration;
use tokio::time::Instant;

fn settings() -> Settings {
    let mut settings = Settings {
        buffer_seconds: 1,
        minimum_samples: 1,
        ..Default::default()
    };
    settings.data_source.primary = SourceKind::Feed;
    settings.data_source.fallback = Fallback::Disabled;
    settings.data_source.zwift.process_name = "smartfan-test-no-such-process".to_string();
    settings.data_source.zwift.port = 0;
    settings
}

#[tokio::test]
async fn test_start_deliver_and_shutdown() {
    let link = RecordingLink::new();
    let service = FanService::new(settings(), link.clone());
    let running = service.start().await;

    assert!(link.is_connected());
    assert!(service.arbiter().is_active(SourceKind::Feed));

    for _ in 0..4 {
        service.controller().submit_power(200).unwrap();
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while service.dispatcher().last_delivered().is_none() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(service.dispatcher().last_delivered(), FanLevel::new(3));

    running.shutdown().await;
    assert!(!link.is_connected());

    // Commands after shutdown are refused.
    for _ in 0..4 {
        assert_eq!(service.controller().submit_power(50).unwrap(), None);
    }
    assert_eq!(link.written(), vec![3]);
}

#[tokio::test]
async fn test_test_mode_logs_instead_of_connecting() {
    let mut settings = settings();
    settings.ble.skip_connection = true;
    let link = RecordingLink::new();
    let service = FanService::new(settings, link.clone());
    let running = service.start().await;

    // The feed listens even though the companion process is absent.
    let deadline = Instant::now() + Duration::from_secs(2);
    while !service.arbiter().is_running(SourceKind::Feed) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(service.arbiter().is_running(SourceKind::Feed));

    for _ in 0..4 {
        service.controller().submit_power(200).unwrap();
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while service.dispatcher().last_delivered().is_none() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(service.dispatcher().last_delivered(), FanLevel::new(3));

    running.shutdown().await;
    assert!(link.written().is_empty());
    assert!(!service.arbiter().is_running(SourceKind::Feed));
}
