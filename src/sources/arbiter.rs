//! Source arbitration.
//!
//! With a radio sensor primary and a feed fallback, the feed is held inactive
//! for a startup grace window so the sensor has time to connect. After that
//! the feed is active exactly while the sensor has not delivered power within
//! the dropout timeout. Samples from an inactive source are tracked for
//! freshness but not forwarded.

use super::{HeartRateSource, SourceKind};
use crate::config::Settings;
use crate::control::{SampleValue, ZoneController};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Time the radio sensor gets to connect before the fallback may take over.
pub const STARTUP_GRACE: Duration = Duration::from_secs(30);

/// Minimum interval between status lines.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Clone, Copy)]
struct SourceStatus {
    running: bool,
    active: bool,
}

#[derive(Debug, Default)]
struct Liveness {
    radio: SourceStatus,
    feed: SourceStatus,
}

impl Liveness {
    fn status_mut(&mut self, kind: SourceKind) -> &mut SourceStatus {
        match kind {
            SourceKind::RadioSensor => &mut self.radio,
            SourceKind::Feed => &mut self.feed,
        }
    }

    fn status(&self, kind: SourceKind) -> SourceStatus {
        match kind {
            SourceKind::RadioSensor => self.radio,
            SourceKind::Feed => self.feed,
        }
    }
}

#[derive(Debug, Default)]
struct Tracking {
    grace_until: Option<Instant>,
    /// Primary freshness at the previous evaluation
    primary_fresh: Option<bool>,
    radio_power_at: Option<Instant>,
    feed_power_at: Option<Instant>,
    radio_hr_at: Option<Instant>,
    status_logged_at: Option<Instant>,
}

impl Tracking {
    fn power_at(&self, kind: SourceKind) -> Option<Instant> {
        match kind {
            SourceKind::RadioSensor => self.radio_power_at,
            SourceKind::Feed => self.feed_power_at,
        }
    }
}

pub struct SourceArbiter {
    primary: SourceKind,
    fallback: Option<SourceKind>,
    hr_source: HeartRateSource,
    /// A source is fresh if it delivered power within this window
    freshness: Duration,
    check_interval: Duration,
    controller: Arc<ZoneController>,
    liveness: RwLock<Liveness>,
    tracking: Mutex<Tracking>,
}

impl SourceArbiter {
    pub fn new(settings: &Settings, controller: Arc<ZoneController>) -> Self {
        Self {
            primary: settings.data_source.primary,
            fallback: settings.data_source.fallback_kind(),
            hr_source: settings.data_source.heart_rate_source,
            freshness: settings.dropout(),
            check_interval: settings.data_source.zwift.check_interval(),
            controller,
            liveness: RwLock::new(Liveness::default()),
            tracking: Mutex::new(Tracking::default()),
        }
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn primary(&self) -> SourceKind {
        self.primary
    }

    pub fn fallback(&self) -> Option<SourceKind> {
        self.fallback
    }

    pub fn controller(&self) -> &Arc<ZoneController> {
        &self.controller
    }

    /// Activate the primary and open the grace window when it applies.
    pub fn start(&self) {
        tracing::info!("Primary source: {}", self.primary);
        if let Some(fallback) = self.fallback {
            tracing::info!("Fallback source: {}", fallback);
        }

        self.set_active(self.primary, true);

        if self.primary == SourceKind::RadioSensor {
            if let Some(fallback) = self.fallback {
                self.tracking().grace_until = Some(Instant::now() + STARTUP_GRACE);
                self.set_active(fallback, false);
                tracing::info!(
                    "Startup grace: {}s before the {} may take over",
                    STARTUP_GRACE.as_secs(),
                    fallback
                );
            }
        }
    }

    pub fn in_grace(&self) -> bool {
        self.tracking()
            .grace_until
            .is_some_and(|until| Instant::now() < until)
    }

    pub fn is_active(&self, kind: SourceKind) -> bool {
        self.read_liveness().status(kind).active
    }

    pub fn is_running(&self, kind: SourceKind) -> bool {
        self.read_liveness().status(kind).running
    }

    fn read_liveness(&self) -> std::sync::RwLockReadGuard<'_, Liveness> {
        self.liveness.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_liveness(&self) -> std::sync::RwLockWriteGuard<'_, Liveness> {
        self.liveness.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_active(&self, kind: SourceKind, active: bool) {
        let changed = {
            let mut liveness = self.write_liveness();
            let status = liveness.status_mut(kind);
            let changed = status.active != active;
            status.active = active;
            changed
        };
        if changed {
            tracing::info!(
                "{} source {}",
                kind,
                if active { "active" } else { "inactive" }
            );
        }
    }

    pub fn set_running(&self, kind: SourceKind, running: bool) {
        let changed = {
            let mut liveness = self.write_liveness();
            let status = liveness.status_mut(kind);
            let changed = status.running != running;
            status.running = running;
            changed
        };
        if changed {
            tracing::info!(
                "{} {}",
                kind,
                if running { "running" } else { "stopped" }
            );
        }
    }

    /// Power sample from a source. Returns whether it reached the controller.
    pub fn on_power(&self, kind: SourceKind, sample: impl Into<SampleValue>) -> bool {
        let now = Instant::now();
        {
            let mut tracking = self.tracking();
            match kind {
                SourceKind::RadioSensor => tracking.radio_power_at = Some(now),
                SourceKind::Feed => tracking.feed_power_at = Some(now),
            }
        }

        if !self.is_active(kind) {
            return false;
        }
        if let Err(e) = self.controller.submit_power(sample) {
            tracing::debug!("{} power ignored: {}", kind, e);
        }
        true
    }

    /// Heart rate sample from a source. Returns whether it reached the controller.
    pub fn on_heart_rate(&self, kind: SourceKind, sample: impl Into<SampleValue>) -> bool {
        let forward = match kind {
            SourceKind::RadioSensor => {
                if self.hr_source == HeartRateSource::Feed {
                    false
                } else {
                    self.tracking().radio_hr_at = Some(Instant::now());
                    self.is_active(kind)
                }
            }
            SourceKind::Feed => match self.hr_source {
                HeartRateSource::RadioSensor => false,
                HeartRateSource::Feed => self.is_active(kind),
                HeartRateSource::Both => {
                    let radio_hr_at = self.tracking().radio_hr_at;
                    !radio_hr_at.is_some_and(|at| at.elapsed() < self.freshness)
                }
            },
        };

        if forward {
            if let Err(e) = self.controller.submit_heart_rate(sample) {
                tracing::debug!("{} heart rate ignored: {}", kind, e);
            }
        }
        forward
    }

    /// Re-evaluate which source is live.
    pub fn evaluate(&self) {
        let now = Instant::now();
        let mut tracking = self.tracking();

        if let (SourceKind::RadioSensor, Some(fallback)) = (self.primary, self.fallback) {
            let in_grace = match tracking.grace_until {
                Some(until) if now < until => true,
                Some(_) => {
                    tracing::info!("Startup grace over, fallback monitoring enabled");
                    tracking.grace_until = None;
                    false
                }
                None => false,
            };

            if in_grace {
                self.set_active(fallback, false);
                tracking.primary_fresh = Some(false);
            } else {
                let fresh = self.is_fresh(&tracking, self.primary, now);
                self.set_active(fallback, !fresh);
                match (tracking.primary_fresh, fresh) {
                    (Some(false), true) => {
                        tracing::info!("{} restored, {} on standby", self.primary, fallback)
                    }
                    (Some(true), false) => {
                        tracing::warn!("{} lost, switching to {}", self.primary, fallback)
                    }
                    _ => {}
                }
                tracking.primary_fresh = Some(fresh);
            }
        }

        let due = tracking
            .status_logged_at
            .map_or(true, |at| now.saturating_duration_since(at) >= STATUS_INTERVAL);
        if due {
            tracking.status_logged_at = Some(now);
            let radio = self.is_fresh(&tracking, SourceKind::RadioSensor, now);
            let feed = self.is_running(SourceKind::Feed);
            tracing::info!(
                "Sources | radio sensor: {} | feed: {}",
                if radio { "✓" } else { "✗" },
                if feed { "✓" } else { "✗" }
            );
        }
    }

    fn is_fresh(&self, tracking: &Tracking, kind: SourceKind, now: Instant) -> bool {
        tracking
            .power_at(kind)
            .is_some_and(|at| now.saturating_duration_since(at) < self.freshness)
    }

    /// Evaluate every check interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes at once; skip it so evaluation starts one interval in.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.evaluate(),
            }
        }
        tracing::debug!("Source arbitration stopped");
    }
}
