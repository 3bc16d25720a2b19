//! Radio sensor worker.
//!
//! Scans for a BLE power meter (and optionally a heart rate strap), subscribes
//! to their measurement characteristics and forwards samples to the arbiter.
//! A session ends when the notification streams close; the worker then
//! reconnects after a delay, giving up after repeated failures.

use super::gatt::{
    parse_cycling_power, parse_heart_rate, CYCLING_POWER_MEASUREMENT_UUID,
    CYCLING_POWER_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
};
use super::{HeartRateSource, SourceArbiter, SourceError, SourceKind};
use crate::config::Settings;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Delay before reconnecting after a session ends.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Consecutive failed sessions before the worker gives up.
pub const MAX_FAILURES: u32 = 10;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Peripherals found during one scan.
#[derive(Default)]
struct Discovered {
    power: Option<Peripheral>,
    heart_rate: Option<Peripheral>,
}

impl Discovered {
    fn is_complete(&self, want_heart_rate: bool) -> bool {
        self.power.is_some() && (!want_heart_rate || self.heart_rate.is_some())
    }
}

pub struct RadioSensorWorker {
    arbiter: Arc<SourceArbiter>,
    scan_timeout: Duration,
    connection_timeout: Duration,
    subscribe_heart_rate: bool,
    connected: Mutex<Vec<Peripheral>>,
}

impl RadioSensorWorker {
    pub fn new(settings: &Settings, arbiter: Arc<SourceArbiter>) -> Self {
        let subscribe_heart_rate = settings.data_source.heart_rate_source != HeartRateSource::Feed
            && settings.antplus_bridge.heart_rate.enabled;
        Self {
            arbiter,
            scan_timeout: settings.ble.scan_timeout(),
            connection_timeout: settings.ble.connection_timeout(),
            subscribe_heart_rate,
            connected: Mutex::new(Vec::new()),
        }
    }

    /// Run sessions until cancelled or the failure budget is spent.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut failures = 0u32;

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.session() => outcome,
            };
            self.arbiter.set_running(SourceKind::RadioSensor, false);
            self.release().await;

            match outcome {
                Ok(true) => {
                    tracing::warn!("Radio sensor connection lost");
                    failures = 0;
                }
                Ok(false) => tracing::warn!("Radio sensor session ended without data"),
                Err(e) => tracing::warn!("Radio sensor error: {}", e),
            }

            failures += 1;
            if failures >= MAX_FAILURES {
                tracing::error!(
                    "Radio sensor failed {} times in a row, giving up",
                    MAX_FAILURES
                );
                break;
            }
            tracing::info!(
                "Reconnecting radio sensor in {}s ({}/{})",
                RECONNECT_DELAY.as_secs(),
                failures,
                MAX_FAILURES
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }

        self.arbiter.set_running(SourceKind::RadioSensor, false);
        self.release().await;
        tracing::info!("Radio sensor worker stopped");
    }

    async fn release(&self) {
        for peripheral in self.connected.lock().await.drain(..) {
            if let Err(e) = peripheral.disconnect().await {
                tracing::debug!("Sensor disconnect failed: {}", e);
            }
        }
    }

    /// One connect-and-stream session. Returns whether any sample arrived.
    async fn session(&self) -> Result<bool, SourceError> {
        let adapter = Self::adapter().await?;
        let found = self.discover(&adapter).await?;

        let wanted = [
            (found.power, CYCLING_POWER_MEASUREMENT_UUID),
            (found.heart_rate, HEART_RATE_MEASUREMENT_UUID),
        ]
        .into_iter()
        .filter_map(|(peripheral, characteristic)| Some((peripheral?, characteristic)));

        let mut streams = Vec::new();
        for (peripheral, characteristics) in group_by_device(wanted, |p| p.id()) {
            self.open(&peripheral, &characteristics).await?;
            let stream = peripheral
                .notifications()
                .await
                .map_err(|e| SourceError::SubscriptionFailed(e.to_string()))?;
            streams.push(stream);
            self.connected.lock().await.push(peripheral);
        }

        self.arbiter.set_running(SourceKind::RadioSensor, true);

        let mut delivered = false;
        let mut notifications = futures::stream::select_all(streams);
        while let Some(notification) = notifications.next().await {
            if notification.uuid == CYCLING_POWER_MEASUREMENT_UUID {
                if let Some(watts) = parse_cycling_power(&notification.value) {
                    delivered = true;
                    self.arbiter.on_power(SourceKind::RadioSensor, watts as i64);
                }
            } else if notification.uuid == HEART_RATE_MEASUREMENT_UUID {
                if let Some(bpm) = parse_heart_rate(&notification.value) {
                    delivered = true;
                    self.arbiter.on_heart_rate(SourceKind::RadioSensor, bpm);
                }
            }
        }

        Ok(delivered)
    }

    async fn adapter() -> Result<Adapter, SourceError> {
        let manager = Manager::new()
            .await
            .map_err(|e| SourceError::BleError(e.to_string()))?;

        manager
            .adapters()
            .await
            .map_err(|e| SourceError::BleError(e.to_string()))?
            .into_iter()
            .next()
            .ok_or(SourceError::AdapterNotFound)
    }

    async fn discover(&self, adapter: &Adapter) -> Result<Discovered, SourceError> {
        let mut services = vec![CYCLING_POWER_SERVICE_UUID];
        if self.subscribe_heart_rate {
            services.push(HEART_RATE_SERVICE_UUID);
        }

        adapter
            .start_scan(ScanFilter { services })
            .await
            .map_err(|e| SourceError::ScanFailed(e.to_string()))?;

        let mut found = Discovered::default();
        let deadline = tokio::time::Instant::now() + self.scan_timeout;
        while tokio::time::Instant::now() < deadline
            && !found.is_complete(self.subscribe_heart_rate)
        {
            self.classify(adapter, &mut found).await;
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }

        if let Err(e) = adapter.stop_scan().await {
            tracing::debug!("Failed to stop scan: {}", e);
        }

        if found.power.is_none() && found.heart_rate.is_none() {
            return Err(SourceError::SensorNotFound);
        }
        Ok(found)
    }

    async fn classify(&self, adapter: &Adapter, found: &mut Discovered) {
        let Ok(peripherals) = adapter.peripherals().await else {
            return;
        };
        for peripheral in peripherals {
            let services: Vec<Uuid> = match peripheral.properties().await {
                Ok(Some(properties)) => properties.services,
                _ => continue,
            };
            let (power, heart_rate) = sensor_roles(&services, self.subscribe_heart_rate);
            if heart_rate && found.heart_rate.is_none() {
                tracing::info!("Found heart rate sensor {}", peripheral.id());
                found.heart_rate = Some(peripheral.clone());
            }
            if power && found.power.is_none() {
                tracing::info!("Found power meter {}", peripheral.id());
                found.power = Some(peripheral);
            }
        }
    }

    /// Connect once and subscribe to each measurement characteristic.
    async fn open(
        &self,
        peripheral: &Peripheral,
        characteristics: &[Uuid],
    ) -> Result<(), SourceError> {
        tokio::time::timeout(self.connection_timeout, peripheral.connect())
            .await
            .map_err(|_| SourceError::ConnectionFailed("timed out".to_string()))?
            .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;

        tokio::time::timeout(self.connection_timeout, peripheral.discover_services())
            .await
            .map_err(|_| SourceError::ConnectionFailed("service discovery timed out".to_string()))?
            .map_err(|e| SourceError::ConnectionFailed(e.to_string()))?;

        let available = peripheral.characteristics();
        for characteristic in characteristics {
            let target = available
                .iter()
                .find(|c| c.uuid == *characteristic)
                .ok_or_else(|| SourceError::SubscriptionFailed(characteristic.to_string()))?;

            peripheral
                .subscribe(target)
                .await
                .map_err(|e| SourceError::SubscriptionFailed(e.to_string()))?;

            tracing::debug!("Subscribed to characteristic: {}", characteristic);
        }
        Ok(())
    }
}

/// Which measurements a peripheral advertising `services` can supply.
/// Returns `(power, heart_rate)`; a combined sensor fills both.
fn sensor_roles(services: &[Uuid], want_heart_rate: bool) -> (bool, bool) {
    (
        services.contains(&CYCLING_POWER_SERVICE_UUID),
        want_heart_rate && services.contains(&HEART_RATE_SERVICE_UUID),
    )
}

/// Merge characteristics that live on the same device, so each device is
/// connected and streamed once.
fn group_by_device<D, K: PartialEq>(
    wanted: impl IntoIterator<Item = (D, Uuid)>,
    key: impl Fn(&D) -> K,
) -> Vec<(D, Vec<Uuid>)> {
    let mut grouped: Vec<(D, Vec<Uuid>)> = Vec::new();
    for (device, characteristic) in wanted {
        match grouped.iter_mut().find(|(d, _)| key(d) == key(&device)) {
            Some((_, characteristics)) => characteristics.push(characteristic),
            None => grouped.push((device, vec![characteristic])),
        }
    }
    grouped
}
