//! Fan controller BLE link.
//!
//! The fan controller is a BLE peripheral that accepts `LEVEL:<n>` text
//! writes on a single characteristic. [`BleFanLink`] finds it by advertised
//! name, remembers its address for reconnects, and tracks disconnects
//! reported by the adapter.

use super::{FanError, FanLevel};
use crate::config::BleSettings;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How often the peripheral list is polled while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Transport to the fan actuator.
pub trait FanLink: Send + Sync {
    /// Connect, reusing the remembered address when there is one.
    fn connect(&self) -> impl Future<Output = Result<(), FanError>> + Send;

    /// Write one level. The caller bounds this with the command timeout.
    fn write_level(&self, level: FanLevel) -> impl Future<Output = Result<(), FanError>> + Send;

    /// Drop the connection.
    fn disconnect(&self) -> impl Future<Output = Result<(), FanError>> + Send;

    fn is_connected(&self) -> bool;

    /// Record a connection loss noticed by the caller. The address is kept.
    fn mark_disconnected(&self);
}

struct LinkState {
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    characteristic: Option<Characteristic>,
    address: Option<PeripheralId>,
    watcher: Option<JoinHandle<()>>,
}

/// btleplug-backed fan link.
pub struct BleFanLink {
    settings: BleSettings,
    state: Mutex<LinkState>,
    connected: Arc<AtomicBool>,
}

impl BleFanLink {
    pub fn new(settings: BleSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(LinkState {
                adapter: None,
                peripheral: None,
                characteristic: None,
                address: None,
                watcher: None,
            }),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn ensure_adapter(state: &mut LinkState) -> Result<Adapter, FanError> {
        if let Some(adapter) = &state.adapter {
            return Ok(adapter.clone());
        }

        let manager = Manager::new()
            .await
            .map_err(|e| FanError::BleError(e.to_string()))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| FanError::BleError(e.to_string()))?
            .into_iter()
            .next()
            .ok_or(FanError::AdapterNotFound)?;

        state.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    /// Scan until a peripheral advertising the configured name shows up.
    async fn scan_for_device(&self, adapter: &Adapter) -> Result<Peripheral, FanError> {
        tracing::info!(
            "Scanning for '{}' ({}s)",
            self.settings.device_name,
            self.settings.scan_timeout
        );

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| FanError::BleError(e.to_string()))?;

        let found = tokio::time::timeout(self.settings.scan_timeout(), async {
            loop {
                if let Some(peripheral) = self.find_by_name(adapter).await {
                    return peripheral;
                }
                tokio::time::sleep(SCAN_POLL_INTERVAL).await;
            }
        })
        .await;

        if let Err(e) = adapter.stop_scan().await {
            tracing::debug!("Failed to stop scan: {}", e);
        }

        found.map_err(|_| FanError::DeviceNotFound(self.settings.device_name.clone()))
    }

    async fn find_by_name(&self, adapter: &Adapter) -> Option<Peripheral> {
        let peripherals = adapter.peripherals().await.ok()?;
        for peripheral in peripherals {
            let name = peripheral
                .properties()
                .await
                .ok()
                .flatten()
                .and_then(|p| p.local_name);
            if name.as_deref() == Some(self.settings.device_name.as_str()) {
                return Some(peripheral);
            }
        }
        None
    }

    /// Connect to a peripheral and locate the command characteristic.
    async fn open(&self, peripheral: &Peripheral) -> Result<Characteristic, FanError> {
        tokio::time::timeout(self.settings.connection_timeout(), peripheral.connect())
            .await
            .map_err(|_| FanError::ConnectionTimeout)?
            .map_err(|e| FanError::ConnectionFailed(e.to_string()))?;

        tokio::time::timeout(
            self.settings.connection_timeout(),
            peripheral.discover_services(),
        )
        .await
        .map_err(|_| FanError::ConnectionTimeout)?
        .map_err(|e| FanError::ConnectionFailed(e.to_string()))?;

        peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.uuid == self.settings.characteristic_uuid
                    && c.service_uuid == self.settings.service_uuid
            })
            .ok_or(FanError::CharacteristicNotFound)
    }

    /// Clear the connected flag when the adapter reports our device gone.
    fn spawn_disconnect_watcher(
        adapter: Adapter,
        id: PeripheralId,
        connected: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!("Cannot watch for fan disconnects: {}", e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        tracing::warn!("Fan controller disconnected");
                        connected.store(false, Ordering::SeqCst);
                    }
                }
            }
        })
    }
}

impl FanLink for BleFanLink {
    async fn connect(&self) -> Result<(), FanError> {
        let mut state = self.state.lock().await;
        let adapter = Self::ensure_adapter(&mut state).await?;

        let mut target = None;
        if let Some(address) = &state.address {
            match adapter.peripheral(address).await {
                Ok(peripheral) => target = Some(peripheral),
                Err(e) => tracing::debug!("Known address unavailable ({}), rescanning", e),
            }
        }
        let peripheral = match target {
            Some(peripheral) => peripheral,
            None => self.scan_for_device(&adapter).await?,
        };

        let characteristic = self.open(&peripheral).await?;

        if let Some(pin) = self.settings.pin_code {
            tracing::info!(
                "PIN {:06} configured; pairing is left to the operating system",
                pin
            );
        }

        let id = peripheral.id();
        if let Some(watcher) = state.watcher.take() {
            watcher.abort();
        }
        state.watcher = Some(Self::spawn_disconnect_watcher(
            adapter,
            id.clone(),
            self.connected.clone(),
        ));
        state.address = Some(id);
        state.peripheral = Some(peripheral);
        state.characteristic = Some(characteristic);
        self.connected.store(true, Ordering::SeqCst);

        tracing::info!("Connected to fan controller '{}'", self.settings.device_name);
        Ok(())
    }

    async fn write_level(&self, level: FanLevel) -> Result<(), FanError> {
        let state = self.state.lock().await;
        let (Some(peripheral), Some(characteristic)) = (&state.peripheral, &state.characteristic)
        else {
            return Err(FanError::NotConnected);
        };

        peripheral
            .write(characteristic, level.command().as_bytes(), WriteType::WithResponse)
            .await
            .map_err(|e| FanError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), FanError> {
        let mut state = self.state.lock().await;
        if let Some(watcher) = state.watcher.take() {
            watcher.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        state.characteristic = None;
        if let Some(peripheral) = state.peripheral.take() {
            peripheral
                .disconnect()
                .await
                .map_err(|e| FanError::BleError(e.to_string()))?;
            tracing::info!("Disconnected from fan controller");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
