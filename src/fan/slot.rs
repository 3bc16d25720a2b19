//! Single-slot command channel.
//!
//! Holds at most one pending level. A submission while a level is pending
//! replaces it, so the delivery worker only ever sees the newest decision.

use super::{FanError, FanLevel};
use crate::control::SampleValue;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct SlotState {
    pending: Option<FanLevel>,
    closed: bool,
}

/// Overwrite-on-full channel between the controller and the delivery worker.
#[derive(Debug, Default)]
pub struct CommandSlot {
    state: Mutex<SlotState>,
    notify: Notify,
}

impl CommandSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a level, replacing any level not yet taken.
    pub fn submit(&self, level: FanLevel) -> Result<(), FanError> {
        {
            let mut state = self.lock();
            if state.closed {
                tracing::warn!("Command channel closed, dropping LEVEL:{}", level);
                return Err(FanError::Closed);
            }
            if let Some(replaced) = state.pending.replace(level) {
                tracing::debug!("LEVEL:{} replaced by LEVEL:{} before delivery", replaced, level);
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Validate and store an untyped level. Only integers 0-3 are accepted.
    pub fn submit_raw(&self, value: SampleValue) -> Result<(), FanError> {
        let level = match value {
            SampleValue::Integer(v) => FanLevel::try_from(v),
            other => Err(FanError::InvalidLevel(other.to_string())),
        };

        match level {
            Ok(level) => self.submit(level),
            Err(e) => {
                tracing::warn!("Rejected fan command {}: expected an integer 0-3", value);
                Err(e)
            }
        }
    }

    /// Take the pending level without waiting.
    pub fn take(&self) -> Option<FanLevel> {
        self.lock().pending.take()
    }

    /// Look at the pending level without taking it.
    pub fn peek(&self) -> Option<FanLevel> {
        self.lock().pending
    }

    /// Wait for the next level. Returns `None` once closed and drained.
    pub async fn recv(&self) -> Option<FanLevel> {
        loop {
            {
                let mut state = self.lock();
                if let Some(level) = state.pending.take() {
                    return Some(level);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Refuse further submissions and wake the receiver.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
