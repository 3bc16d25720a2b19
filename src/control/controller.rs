//! Zone controller.
//!
//! Converts averaged power (and optionally heart rate) into a fan zone.
//! Increases take effect at once; decreases wait out a cooldown, and the zone
//! reached when the cooldown expires is the most recent candidate, not the one
//! that started it. If no sample arrives for `dropout_timeout`, the zone is
//! forced to 0.
//!
//! All mutable state lives behind one mutex: the averaging buffers, the
//! zone/cooldown fields and the last-sample time are always read and written
//! together. Commands are handed to the [`CommandSlot`] before the lock is
//! released, so the slot sees levels in decision order.

use super::{SampleError, SampleValue, Zone};
use crate::config::{Settings, ZoneMode};
use crate::fan::{CommandSlot, FanLevel};
use crate::metrics::{HeartRateZoneTable, PowerZoneTable, SampleBuffer};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval between dropout evaluations.
pub const DROPOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

const MIN_HEART_RATE: i64 = 1;
const MAX_HEART_RATE: i64 = 220;

#[derive(Debug, Clone, Copy)]
struct Cooldown {
    started: Instant,
    /// Latest candidate offered while cooling down
    target: Zone,
}

#[derive(Debug)]
struct ControllerState {
    current_zone: Option<Zone>,
    cooldown: Option<Cooldown>,
    last_sample: Instant,
    power_buffer: SampleBuffer,
    hr_buffer: SampleBuffer,
    power_zone: Option<Zone>,
    hr_zone: Option<Zone>,
    last_dispatched: Option<FanLevel>,
}

/// Point-in-time view of the controller, for status output and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub current_zone: Option<Zone>,
    pub cooldown_target: Option<Zone>,
    pub cooldown_remaining: Option<Duration>,
    pub power_zone: Option<Zone>,
    pub hr_zone: Option<Zone>,
    pub last_dispatched: Option<FanLevel>,
}

pub struct ZoneController {
    power_zones: PowerZoneTable,
    hr_zones: HeartRateZoneTable,
    zone_mode: ZoneMode,
    hr_enabled: bool,
    min_watt: u32,
    max_watt: u32,
    cooldown: Duration,
    dropout_timeout: Duration,
    zero_power_immediate: bool,
    state: Mutex<ControllerState>,
    commands: Arc<CommandSlot>,
}

impl ZoneController {
    pub fn new(settings: &Settings, commands: Arc<CommandSlot>) -> Self {
        let capacity = settings.buffer_capacity();
        let power_zones = PowerZoneTable::from_settings(settings);
        let hr_zones = HeartRateZoneTable::from_settings(&settings.heart_rate_zones);

        tracing::info!(
            "Power zones: Z1 {}-{}W, Z2 {}-{}W, Z3 {}-{}W",
            power_zones.z1.min_watts,
            power_zones.z1.max_watts,
            power_zones.z2.min_watts,
            power_zones.z2.max_watts,
            power_zones.z3.min_watts,
            power_zones.z3.max_watts
        );
        if settings.heart_rate_zones.enabled {
            tracing::info!(
                "HR zones ({}): Z0 <{} bpm, Z1 <{:.0} bpm, Z2 <{:.0} bpm",
                settings.heart_rate_zones.zone_mode,
                hr_zones.resting_hr,
                hr_zones.z1_limit(),
                hr_zones.z2_limit()
            );
        }

        Self {
            power_zones,
            hr_zones,
            zone_mode: settings.effective_zone_mode(),
            hr_enabled: settings.heart_rate_zones.enabled,
            min_watt: settings.min_watt,
            max_watt: settings.max_watt,
            cooldown: settings.cooldown(),
            dropout_timeout: settings.dropout(),
            zero_power_immediate: settings.zero_power_immediate,
            state: Mutex::new(ControllerState {
                current_zone: None,
                cooldown: None,
                last_sample: Instant::now(),
                power_buffer: SampleBuffer::new(capacity, settings.minimum_samples),
                hr_buffer: SampleBuffer::new(capacity, settings.minimum_samples),
                power_zone: None,
                hr_zone: None,
                last_dispatched: None,
            }),
            commands,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn power_zones(&self) -> &PowerZoneTable {
        &self.power_zones
    }

    pub fn current_zone(&self) -> Option<Zone> {
        self.lock().current_zone
    }

    pub fn in_cooldown(&self) -> bool {
        self.lock().cooldown.is_some()
    }

    pub fn last_sample_at(&self) -> Instant {
        self.lock().last_sample
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let state = self.lock();
        ControllerSnapshot {
            current_zone: state.current_zone,
            cooldown_target: state.cooldown.map(|c| c.target),
            cooldown_remaining: state
                .cooldown
                .map(|c| self.cooldown.saturating_sub(c.started.elapsed())),
            power_zone: state.power_zone,
            hr_zone: state.hr_zone,
            last_dispatched: state.last_dispatched,
        }
    }

    /// Check a power sample against the accepted range.
    pub fn validate_power(&self, sample: SampleValue) -> Result<u32, SampleError> {
        let watts = sample.as_number()?;
        if watts < 0.0 || watts < self.min_watt as f64 || watts > self.max_watt as f64 {
            return Err(SampleError::OutOfRange {
                value: watts,
                min: self.min_watt as i64,
                max: self.max_watt as i64,
            });
        }
        Ok(watts.trunc() as u32)
    }

    /// Submit one power sample.
    ///
    /// Returns the level handed to the command slot, if the sample caused one.
    pub fn submit_power(
        &self,
        sample: impl Into<SampleValue>,
    ) -> Result<Option<FanLevel>, SampleError> {
        let sample = sample.into();
        let watts = match self.validate_power(sample) {
            Ok(watts) => watts,
            Err(e) => {
                tracing::warn!("Rejected power sample: {}", e);
                return Err(e);
            }
        };

        let mut state = self.lock();
        let now = Instant::now();
        state.last_sample = now;

        let Some(average) = state.power_buffer.push(watts) else {
            return Ok(None);
        };
        let power_zone = self.power_zones.zone_for(average);
        state.power_zone = Some(power_zone);
        tracing::debug!("Power {}W (avg {}W) -> Z{}", watts, average, power_zone);

        let candidate = match (self.zone_mode, state.hr_zone) {
            (ZoneMode::HrOnly, _) => return Ok(None),
            (ZoneMode::HigherWins, Some(hr_zone)) => power_zone.max(hr_zone),
            _ => power_zone,
        };
        let command = self.decide(&mut state, candidate, now);
        Ok(self.dispatch(command))
    }

    /// Submit one heart rate sample.
    pub fn submit_heart_rate(
        &self,
        sample: impl Into<SampleValue>,
    ) -> Result<Option<FanLevel>, SampleError> {
        let bpm = match sample.into().to_integer() {
            Ok(bpm) if (MIN_HEART_RATE..=MAX_HEART_RATE).contains(&bpm) => bpm as u32,
            Ok(bpm) => {
                let e = SampleError::OutOfRange {
                    value: bpm as f64,
                    min: MIN_HEART_RATE,
                    max: MAX_HEART_RATE,
                };
                tracing::warn!("Rejected heart rate sample: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Rejected heart rate sample: {}", e);
                return Err(e);
            }
        };

        let mut state = self.lock();
        let now = Instant::now();
        if self.zone_mode == ZoneMode::HrOnly {
            state.last_sample = now;
        }

        let Some(average) = state.hr_buffer.push(bpm) else {
            return Ok(None);
        };
        if !self.hr_enabled {
            tracing::debug!("HR {} bpm (avg {} bpm)", bpm, average);
            return Ok(None);
        }

        let hr_zone = self.hr_zones.zone_for(average);
        state.hr_zone = Some(hr_zone);
        tracing::debug!("HR {} bpm (avg {} bpm) -> Z{}", bpm, average, hr_zone);

        let candidate = match self.zone_mode {
            ZoneMode::PowerOnly => return Ok(None),
            ZoneMode::HrOnly => hr_zone,
            ZoneMode::HigherWins => {
                // Heart rate alone does not lift the fan out of a dropout.
                if now.saturating_duration_since(state.last_sample) >= self.dropout_timeout {
                    return Ok(None);
                }
                state.power_zone.unwrap_or(0).max(hr_zone)
            }
        };
        let command = self.decide(&mut state, candidate, now);
        Ok(self.dispatch(command))
    }

    /// Force zone 0 if no sample arrived within the dropout timeout.
    pub fn evaluate_dropout(&self) -> Option<FanLevel> {
        let mut state = self.lock();
        let silent_for = state.last_sample.elapsed();
        if silent_for < self.dropout_timeout || state.current_zone == Some(0) {
            return None;
        }

        tracing::warn!("No data for {}s, stopping fan", silent_for.as_secs());
        state.cooldown = None;
        state.power_buffer.clear();
        // A silent meter must not keep voting in higher_wins.
        state.power_zone = None;
        let command = self.transition(&mut state, 0);
        self.dispatch(command)
    }

    /// Evaluate dropout once per second until cancelled.
    pub async fn run_dropout_checks(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(DROPOUT_CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.evaluate_dropout();
                }
            }
        }
        tracing::debug!("Dropout checks stopped");
    }

    /// Hand a level to the slot. Called with the state guard held.
    fn dispatch(&self, command: Option<FanLevel>) -> Option<FanLevel> {
        let level = command?;
        match self.commands.submit(level) {
            Ok(()) => Some(level),
            Err(_) => None,
        }
    }

    /// Apply a candidate zone. Returns a level to dispatch, if any.
    fn decide(&self, state: &mut ControllerState, zone: Zone, now: Instant) -> Option<FanLevel> {
        let Some(current) = state.current_zone else {
            return self.transition(state, zone);
        };

        if zone == 0 {
            if current == 0 {
                return None;
            }
            if self.zero_power_immediate {
                tracing::info!("Zero power, stopping fan immediately");
                return self.transition(state, 0);
            }
            return match state.cooldown.as_mut() {
                Some(cooldown) => {
                    cooldown.target = 0;
                    self.check_cooldown(state, now)
                }
                None => self.start_cooldown(state, 0, now),
            };
        }

        if let Some(cooldown) = state.cooldown.as_mut() {
            if zone >= current {
                state.cooldown = None;
                tracing::info!("Cooldown cancelled at Z{}", zone);
                if zone > current {
                    return self.transition(state, zone);
                }
                return None;
            }
            cooldown.target = zone;
            return self.check_cooldown(state, now);
        }

        if zone > current {
            self.transition(state, zone)
        } else if zone < current {
            self.start_cooldown(state, zone, now)
        } else {
            None
        }
    }

    fn start_cooldown(
        &self,
        state: &mut ControllerState,
        target: Zone,
        now: Instant,
    ) -> Option<FanLevel> {
        tracing::info!(
            "Cooldown started: Z{:?} -> Z{} in {}s",
            state.current_zone,
            target,
            self.cooldown.as_secs()
        );
        state.cooldown = Some(Cooldown {
            started: now,
            target,
        });
        self.check_cooldown(state, now)
    }

    /// Apply the latest candidate once the cooldown has run its course.
    fn check_cooldown(&self, state: &mut ControllerState, now: Instant) -> Option<FanLevel> {
        let cooldown = state.cooldown?;
        let elapsed = now.saturating_duration_since(cooldown.started);
        if elapsed >= self.cooldown {
            tracing::info!("Cooldown expired, switching to Z{}", cooldown.target);
            self.transition(state, cooldown.target)
        } else {
            tracing::debug!(
                "Cooldown: {}s remaining (target Z{})",
                (self.cooldown - elapsed).as_secs(),
                cooldown.target
            );
            None
        }
    }

    fn transition(&self, state: &mut ControllerState, zone: Zone) -> Option<FanLevel> {
        if state.current_zone != Some(zone) {
            tracing::info!("Zone change: {:?} -> Z{}", state.current_zone, zone);
        }
        state.current_zone = Some(zone);
        state.cooldown = None;

        let level = FanLevel::from_zone(zone);
        if state.last_dispatched == Some(level) {
            return None;
        }
        state.last_dispatched = Some(level);
        Some(level)
    }
}
