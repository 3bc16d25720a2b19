//! Service wiring.
//!
//! [`FanService`] builds the engine from one [`Settings`] value and starts its
//! tasks in dependency order: the fan command worker, the dropout checker,
//! then the telemetry sources. [`RunningService::shutdown`] stops them in
//! reverse, one stage at a time.

use crate::config::Settings;
use crate::control::ZoneController;
use crate::fan::{BleFanLink, CommandDispatcher, CommandSlot, FanLink};
use crate::sources::{
    AlwaysRunning, FeedWorker, ProcessProbe, RadioSensorWorker, SourceArbiter, SourceKind,
    SysinfoProbe,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long each task gets to stop before it is aborted.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tasks cancelled together.
struct Stage {
    name: &'static str,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Stage {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    fn spawn<F>(&mut self, task: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::debug!("Starting {} task: {}", self.name, task);
        self.tasks.push((task, tokio::spawn(future)));
    }

    async fn stop(self) {
        self.cancel.cancel();
        for (task, mut handle) in self.tasks {
            match tokio::time::timeout(JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => tracing::debug!("{} task stopped", task),
                Ok(Err(e)) => tracing::warn!("{} task failed: {}", task, e),
                Err(_) => {
                    tracing::warn!(
                        "{} task did not stop within {}s, aborting",
                        task,
                        JOIN_TIMEOUT.as_secs()
                    );
                    handle.abort();
                }
            }
        }
        tracing::debug!("{} stage stopped", self.name);
    }
}

/// The fan-zone engine and its collaborators.
pub struct FanService<L: FanLink + 'static> {
    settings: Arc<Settings>,
    slot: Arc<CommandSlot>,
    controller: Arc<ZoneController>,
    arbiter: Arc<SourceArbiter>,
    dispatcher: Arc<CommandDispatcher<L>>,
}

impl FanService<BleFanLink> {
    /// Service driving a BLE fan.
    pub fn with_ble(settings: Settings) -> Self {
        let link = BleFanLink::new(settings.ble.clone());
        Self::new(settings, link)
    }
}

impl<L: FanLink + 'static> FanService<L> {
    pub fn new(settings: Settings, link: L) -> Self {
        let settings = Arc::new(settings);
        let slot = Arc::new(CommandSlot::new());
        let controller = Arc::new(ZoneController::new(&settings, slot.clone()));
        let arbiter = Arc::new(SourceArbiter::new(&settings, controller.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(
            slot.clone(),
            Arc::new(link),
            &settings.ble,
        ));

        Self {
            settings,
            slot,
            controller,
            arbiter,
            dispatcher,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn controller(&self) -> &Arc<ZoneController> {
        &self.controller
    }

    pub fn arbiter(&self) -> &Arc<SourceArbiter> {
        &self.arbiter
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher<L>> {
        &self.dispatcher
    }

    /// Start every task. Returns once the sources are running.
    pub async fn start(&self) -> RunningService {
        let settings = &self.settings;

        let mut delivery = Stage::new("delivery");
        let dispatcher = self.dispatcher.clone();
        let cancel = delivery.cancel.clone();
        delivery.spawn("fan command worker", async move { dispatcher.run(cancel).await });

        let mut timers = Stage::new("timers");
        let controller = self.controller.clone();
        let cancel = timers.cancel.clone();
        timers.spawn("dropout checker", async move {
            controller.run_dropout_checks(cancel).await
        });

        if !settings.ble.skip_connection {
            let wait = settings.ble.scan_timeout() + settings.ble.connection_timeout();
            tracing::info!("Waiting for fan connection (max {}s)", wait.as_secs());
        }
        let mut ready = self.dispatcher.ready();
        match tokio::time::timeout(
            settings.ble.scan_timeout() + settings.ble.connection_timeout(),
            ready.wait_for(|ready| *ready),
        )
        .await
        {
            Ok(Ok(_)) => tracing::info!("Fan link initialised"),
            Ok(Err(_)) => tracing::warn!("Fan command worker exited during startup"),
            Err(_) => tracing::warn!("Fan link not ready in time, continuing"),
        }

        if settings.antplus_bridge.enabled {
            tracing::warn!(
                "Sensor rebroadcast is not supported on this platform, bridge settings ignored"
            );
        }

        let mut sources = Stage::new("sources");
        self.arbiter.start();

        let arbiter = self.arbiter.clone();
        let cancel = sources.cancel.clone();
        sources.spawn("source arbiter", async move { arbiter.run(cancel).await });

        let feed_wanted = settings.data_source.primary == SourceKind::Feed
            || settings.data_source.fallback_kind() == Some(SourceKind::Feed);
        if feed_wanted && settings.ble.skip_connection {
            // Test mode listens whether or not the companion is running.
            self.spawn_feed(&mut sources, AlwaysRunning);
        } else if feed_wanted {
            self.spawn_feed(&mut sources, SysinfoProbe::new());
        }

        if settings.data_source.primary == SourceKind::RadioSensor {
            let worker = RadioSensorWorker::new(settings, self.arbiter.clone());
            let cancel = sources.cancel.clone();
            sources.spawn("radio sensor worker", async move { worker.run(cancel).await });
        }

        tracing::info!("Monitoring started");

        RunningService {
            slot: self.slot.clone(),
            sources,
            timers,
            delivery,
        }
    }

    fn spawn_feed<P: ProcessProbe + 'static>(&self, stage: &mut Stage, probe: P) {
        let worker = FeedWorker::new(
            self.settings.data_source.zwift.clone(),
            self.arbiter.clone(),
            probe,
        );
        let cancel = stage.cancel.clone();
        stage.spawn("feed worker", async move { worker.run(cancel).await });
    }
}

/// Handle to the started tasks.
pub struct RunningService {
    slot: Arc<CommandSlot>,
    sources: Stage,
    timers: Stage,
    delivery: Stage,
}

impl RunningService {
    /// Stop sample intake, then timers, then the command worker.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        self.sources.stop().await;
        self.timers.stop().await;
        // No command may be queued once the worker is gone.
        self.slot.close();
        self.delivery.stop().await;
        tracing::info!("Shutdown complete");
    }
}
