//! SmartFan - power and heart rate driven fan control
//!
//! Averages cycling power (and optionally heart rate) into training zones,
//! maps the zone to a fan level, and drives a BLE fan controller. Telemetry
//! comes from a BLE power meter or a UDP feed published by a training
//! application, with automatic failover between the two.

pub mod app;
pub mod config;
pub mod control;
pub mod fan;
pub mod metrics;
pub mod sources;

// Re-export commonly used types
pub use app::FanService;
pub use config::Settings;
pub use control::ZoneController;
pub use fan::{CommandDispatcher, CommandSlot, FanLevel};
pub use sources::SourceArbiter;
