//! Controller decisions flowing through the command slot to the fan.

use super::fan_mock::RecordingLink;
use smartfan::config::Settings;
use smartfan::control::ZoneController;
use smartfan::fan::{CommandDispatcher, CommandSlot, FanLevel, FanLink};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Rig {
    controller: Arc<ZoneController>,
    slot: Arc<CommandSlot>,
    link: RecordingLink,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl Rig {
    fn start(settings: Settings) -> Self {
        let slot = Arc::new(CommandSlot::new());
        let controller = Arc::new(ZoneController::new(&settings, slot.clone()));
        let link = RecordingLink::new();
        let dispatcher = Arc::new(CommandDispatcher::new(
            slot.clone(),
            Arc::new(link.clone()),
            &settings.ble,
        ));

        let cancel = CancellationToken::new();
        let worker = tokio::spawn({
            let cancel = cancel.clone();
            async move { dispatcher.run(cancel).await }
        });

        Self {
            controller,
            slot,
            link,
            cancel,
            worker,
        }
    }

    fn submit(&self, watts: f64, count: usize) {
        for _ in 0..count {
            self.controller.submit_power(watts).unwrap();
        }
    }

    async fn stop(self) -> RecordingLink {
        self.slot.close();
        self.cancel.cancel();
        self.worker.await.unwrap();
        self.link
    }
}

/// Let the delivery worker drain the slot.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_brief_dip_sends_no_duplicate() {
    let rig = Rig::start(Settings::default());

    rig.submit(200.0, 8);
    settle().await;
    assert_eq!(rig.controller.current_zone(), Some(3));
    assert_eq!(rig.link.commands(), vec!["LEVEL:3"]);

    // A dip starts the cooldown but sends nothing.
    rig.submit(50.0, 8);
    settle().await;
    assert!(rig.controller.in_cooldown());
    assert_eq!(rig.controller.current_zone(), Some(3));

    // Back to 200W: once the average is in zone 3 again the cooldown ends.
    let mut pushed = 0;
    while rig.controller.in_cooldown() && pushed < 20 {
        rig.submit(200.0, 1);
        pushed += 1;
    }
    settle().await;
    assert!(!rig.controller.in_cooldown());
    assert_eq!(rig.controller.current_zone(), Some(3));

    let link = rig.stop().await;
    assert_eq!(link.written(), vec![3]);
}

#[tokio::test(start_paused = true)]
async fn test_decrease_waits_for_cooldown() {
    let settings = Settings {
        buffer_seconds: 1,
        minimum_samples: 1,
        cooldown_seconds: 10,
        ..Default::default()
    };
    let rig = Rig::start(settings);

    rig.submit(200.0, 4);
    settle().await;
    rig.submit(120.0, 4);
    settle().await;
    assert!(rig.controller.in_cooldown());
    assert_eq!(rig.link.written(), vec![3]);

    tokio::time::advance(Duration::from_secs(10)).await;
    // Latest candidate (zone 1) is applied, not the zone that started the cooldown.
    rig.submit(50.0, 1);
    settle().await;
    assert_eq!(rig.controller.current_zone(), Some(1));

    let link = rig.stop().await;
    assert_eq!(link.written(), vec![3, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_power_immediate_skips_cooldown() {
    let settings = Settings {
        buffer_seconds: 1,
        minimum_samples: 1,
        zero_power_immediate: true,
        ..Default::default()
    };
    let rig = Rig::start(settings);

    rig.submit(200.0, 4);
    rig.submit(0.0, 4);
    settle().await;
    assert_eq!(rig.controller.current_zone(), Some(0));
    assert!(!rig.controller.in_cooldown());

    let link = rig.stop().await;
    assert_eq!(link.written().last(), Some(&0));
}

#[tokio::test(start_paused = true)]
async fn test_dropout_sends_single_stop() {
    let rig = Rig::start(Settings::default());
    let checks = tokio::spawn({
        let controller = rig.controller.clone();
        let cancel = rig.cancel.clone();
        async move { controller.run_dropout_checks(cancel).await }
    });

    rig.submit(200.0, 8);
    settle().await;

    // Several checks run after the timeout; only the first acts.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(rig.controller.current_zone(), Some(0));

    let link = rig.stop().await;
    checks.await.unwrap();
    assert_eq!(link.commands(), vec!["LEVEL:3", "LEVEL:0"]);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_submissions_deliver_latest() {
    let slot = Arc::new(CommandSlot::new());
    slot.submit(FanLevel::new(1).unwrap()).unwrap();
    slot.submit(FanLevel::new(2).unwrap()).unwrap();

    let link = RecordingLink::new();
    let dispatcher =
        CommandDispatcher::new(slot.clone(), Arc::new(link.clone()), &Default::default());
    let cancel = CancellationToken::new();
    let worker = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    settle().await;
    slot.close();
    worker.await.unwrap();
    assert_eq!(link.written(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn test_closed_slot_refuses_new_levels() {
    let rig = Rig::start(Settings::default());
    let link = rig.link.clone();
    let controller = rig.controller.clone();
    rig.stop().await;

    for _ in 0..8 {
        assert_eq!(controller.submit_power(200.0).unwrap(), None);
    }
    assert!(link.written().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_reconnects_and_redelivers() {
    let rig = Rig::start(Settings::default());
    settle().await;
    assert_eq!(rig.link.connect_count(), 1);

    rig.link.fail_next_writes(1);
    rig.slot.submit(FanLevel::new(2).unwrap()).unwrap();
    settle().await;
    assert!(rig.link.written().is_empty());
    assert!(!rig.link.is_connected());

    // The level stays pending through the reconnect interval.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(rig.link.is_connected());
    assert_eq!(rig.link.connect_count(), 2);

    let link = rig.stop().await;
    assert_eq!(link.written(), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn test_newer_level_replaces_failed_one() {
    let rig = Rig::start(Settings::default());
    settle().await;

    rig.link.fail_next_writes(1);
    rig.slot.submit(FanLevel::new(1).unwrap()).unwrap();
    settle().await;
    assert!(rig.link.written().is_empty());

    rig.slot.submit(FanLevel::new(3).unwrap()).unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;

    let link = rig.stop().await;
    assert_eq!(link.written(), vec![3]);
    assert_eq!(link.connect_count(), 2);
}
