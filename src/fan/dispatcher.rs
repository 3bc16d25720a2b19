//! Delivery worker for fan commands.
//!
//! The worker owns the [`FanLink`]. It drains the [`CommandSlot`], skips levels
//! the fan already has, reconnects with a bounded retry budget, and keeps an
//! undelivered level pending until it is delivered or superseded.

use super::{CommandSlot, FanError, FanLevel, FanLink};
use crate::config::BleSettings;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Wait after the retry budget is spent before the counter resets.
pub const RETRY_COOL_OFF: Duration = Duration::from_secs(30);

/// Reconnect budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before entering the cool-off period
    pub max_retries: u32,
    /// Delay after a failed attempt
    pub reconnect_interval: Duration,
    /// Length of the cool-off period
    pub cool_off: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &BleSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            reconnect_interval: settings.reconnect_interval(),
            cool_off: RETRY_COOL_OFF,
        }
    }
}

#[derive(Debug, Default)]
struct DeliveryState {
    last_delivered: Option<FanLevel>,
    retry_count: u32,
    cool_off_started: Option<Instant>,
}

/// Outcome of one delivery attempt.
enum Delivery {
    Done,
    RetryAfter(Duration),
}

/// Drains the command slot and delivers levels to the fan.
pub struct CommandDispatcher<L: FanLink> {
    slot: Arc<CommandSlot>,
    link: Arc<L>,
    policy: RetryPolicy,
    command_timeout: Duration,
    /// Log levels instead of writing them
    skip_connection: bool,
    state: Mutex<DeliveryState>,
    ready_tx: watch::Sender<bool>,
}

impl<L: FanLink> CommandDispatcher<L> {
    pub fn new(slot: Arc<CommandSlot>, link: Arc<L>, settings: &BleSettings) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            slot,
            link,
            policy: RetryPolicy::from_settings(settings),
            command_timeout: settings.command_timeout(),
            skip_connection: settings.skip_connection,
            state: Mutex::new(DeliveryState::default()),
            ready_tx,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn lock(&self) -> MutexGuard<'_, DeliveryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn slot(&self) -> &Arc<CommandSlot> {
        &self.slot
    }

    /// Last level confirmed by the fan (or logged, in skip mode).
    pub fn last_delivered(&self) -> Option<FanLevel> {
        self.lock().last_delivered
    }

    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    pub fn is_connected(&self) -> bool {
        self.skip_connection || self.link.is_connected()
    }

    /// Becomes `true` once the startup connection attempt has finished,
    /// whether or not it succeeded.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Run until cancelled or the slot is closed and drained.
    pub async fn run(&self, cancel: CancellationToken) {
        if self.skip_connection {
            tracing::info!("Fan link disabled, commands will only be logged");
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = self.link.connect() => match result {
                    Ok(()) => {
                        self.lock().retry_count = 0;
                    }
                    Err(e) => tracing::warn!("Initial fan connection failed: {}", e),
                },
            }
        }
        self.ready_tx.send_replace(true);

        let mut pending: Option<FanLevel> = None;
        loop {
            if let Some(newer) = self.slot.take() {
                pending = Some(newer);
            }

            let level = match pending {
                Some(level) => level,
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = self.slot.recv() => match next {
                            Some(level) => level,
                            None => break,
                        },
                    }
                }
            };
            pending = Some(level);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.deliver(level) => outcome,
            };

            match outcome {
                Delivery::Done => pending = None,
                Delivery::RetryAfter(wait) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }

        if !self.skip_connection {
            if let Err(e) = self.link.disconnect().await {
                tracing::debug!("Fan disconnect failed: {}", e);
            }
        }
        tracing::info!("Fan command worker stopped");
    }

    async fn deliver(&self, level: FanLevel) -> Delivery {
        if self.skip_connection {
            let mut state = self.lock();
            if state.last_delivered != Some(level) {
                tracing::info!("TEST MODE - {}", level.command());
                state.last_delivered = Some(level);
            }
            return Delivery::Done;
        }

        if self.link.is_connected() && self.lock().last_delivered == Some(level) {
            tracing::debug!("Fan already at LEVEL:{}", level);
            return Delivery::Done;
        }

        if !self.link.is_connected() {
            if let Some(wait) = self.reconnect().await {
                return Delivery::RetryAfter(wait);
            }
        }

        match tokio::time::timeout(self.command_timeout, self.link.write_level(level)).await {
            Ok(Ok(())) => {
                self.lock().last_delivered = Some(level);
                tracing::info!("Sent {}", level.command());
                Delivery::Done
            }
            Ok(Err(e)) => self.write_failed(level, e),
            Err(_) => self.write_failed(level, FanError::WriteTimeout),
        }
    }

    fn write_failed(&self, level: FanLevel, error: FanError) -> Delivery {
        tracing::warn!("Failed to send {}: {}", level.command(), error);
        self.link.mark_disconnected();
        Delivery::RetryAfter(self.policy.reconnect_interval)
    }

    /// One reconnect attempt. Returns the wait before the next try on failure.
    async fn reconnect(&self) -> Option<Duration> {
        {
            let mut state = self.lock();
            if let Some(started) = state.cool_off_started {
                let elapsed = started.elapsed();
                if elapsed >= self.policy.cool_off {
                    tracing::info!("Retry count reset after {}s", elapsed.as_secs());
                    state.retry_count = 0;
                    state.cool_off_started = None;
                } else {
                    let remaining = self.policy.cool_off - elapsed;
                    tracing::debug!("Next reconnect in {}s", remaining.as_secs());
                    return Some(remaining.min(self.policy.reconnect_interval));
                }
            }

            if state.retry_count >= self.policy.max_retries {
                state.cool_off_started = Some(Instant::now());
                tracing::warn!(
                    "Reconnect attempts exhausted ({}), retrying in {}s",
                    self.policy.max_retries,
                    self.policy.cool_off.as_secs()
                );
                return Some(self.policy.cool_off.min(self.policy.reconnect_interval));
            }

            state.retry_count += 1;
            tracing::info!(
                "Reconnecting to fan ({}/{})",
                state.retry_count,
                self.policy.max_retries
            );
        }

        match self.link.connect().await {
            Ok(()) => {
                self.lock().retry_count = 0;
                None
            }
            Err(e) => {
                tracing::warn!("Reconnect failed: {}", e);
                Some(self.policy.reconnect_interval)
            }
        }
    }
}
