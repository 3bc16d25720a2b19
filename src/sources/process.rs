//! Companion process detection.

use std::sync::Mutex;
use sysinfo::System;

/// Reports whether a named process is running.
pub trait ProcessProbe: Send + Sync {
    fn is_running(&self, name: &str) -> bool;
}

/// Probe backed by the system process table.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    /// Case-insensitive substring match against process names.
    fn is_running(&self, name: &str) -> bool {
        let needle = name.to_lowercase();
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes();
        system
            .processes()
            .values()
            .any(|process| process.name().to_lowercase().contains(&needle))
    }
}

/// Probe that always reports the process as running. Used in test mode and
/// on hosts where the companion runs elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRunning;

impl ProcessProbe for AlwaysRunning {
    fn is_running(&self, _name: &str) -> bool {
        true
    }
}
