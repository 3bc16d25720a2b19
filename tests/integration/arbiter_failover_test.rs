//! Source failover between the radio sensor and the feed.

use smartfan::config::Settings;
use smartfan::control::ZoneController;
use smartfan::fan::CommandSlot;
use smartfan::sources::{SourceArbiter, SourceKind, STARTUP_GRACE};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn start_arbiter(settings: &Settings) -> (Arc<SourceArbiter>, CancellationToken, JoinHandle<()>) {
    let slot = Arc::new(CommandSlot::new());
    let controller = Arc::new(ZoneController::new(settings, slot));
    let arbiter = Arc::new(SourceArbiter::new(settings, controller));
    arbiter.start();

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let arbiter = arbiter.clone();
        let cancel = cancel.clone();
        async move { arbiter.run(cancel).await }
    });
    (arbiter, cancel, task)
}

/// Feed radio power once a second for `seconds`.
async fn ride(arbiter: &SourceArbiter, seconds: u64) {
    for _ in 0..seconds {
        arbiter.on_power(SourceKind::RadioSensor, 150);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_grace_window_holds_fallback() {
    let (arbiter, cancel, task) = start_arbiter(&Settings::default());

    assert!(arbiter.in_grace());
    assert!(arbiter.is_active(SourceKind::RadioSensor));

    // The radio sensor is silent, but the fallback waits out the grace window.
    tokio::time::sleep(STARTUP_GRACE - Duration::from_secs(1)).await;
    assert!(!arbiter.is_active(SourceKind::Feed));
    assert!(!arbiter.on_power(SourceKind::Feed, 150));

    // First evaluation after the window switches over.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!arbiter.in_grace());
    assert!(arbiter.is_active(SourceKind::Feed));
    assert!(arbiter.on_power(SourceKind::Feed, 150));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fallback_follows_primary_freshness() {
    let settings = Settings::default();
    let (arbiter, cancel, task) = start_arbiter(&settings);

    ride(&arbiter, 40).await;
    assert!(!arbiter.is_active(SourceKind::Feed));

    // Radio goes quiet: stale after the dropout timeout, caught by the next check.
    let check = settings.data_source.zwift.check_interval();
    tokio::time::sleep(settings.dropout() + check + Duration::from_secs(1)).await;
    assert!(arbiter.is_active(SourceKind::Feed));

    // Radio returns: the feed goes back on standby.
    ride(&arbiter, check.as_secs() + 1).await;
    assert!(!arbiter.is_active(SourceKind::Feed));
    assert!(arbiter.is_active(SourceKind::RadioSensor));

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_feed_primary_without_fallback() {
    let mut settings = Settings::default();
    settings.data_source.primary = SourceKind::Feed;
    let (arbiter, cancel, task) = start_arbiter(&settings);

    assert_eq!(arbiter.fallback(), None);
    assert!(!arbiter.in_grace());
    assert!(arbiter.on_power(SourceKind::Feed, 150));

    // Radio samples are tracked but never forwarded.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(!arbiter.on_power(SourceKind::RadioSensor, 150));
    assert!(arbiter.is_active(SourceKind::Feed));

    cancel.cancel();
    task.await.unwrap();
}
