//! UDP telemetry feed.
//!
//! The companion application publishes player state datagrams on a local UDP
//! port. Each datagram carries a 4-byte header followed by protobuf-encoded
//! fields; field 4 is power in watts and field 6 is heart rate in bpm.
//!
//! The [`FeedWorker`] only listens while the companion process is running.

use super::{ProcessProbe, SourceArbiter, SourceError, SourceKind};
use crate::config::FeedSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const HEADER_LEN: usize = 4;
const MIN_DATAGRAM_LEN: usize = 6;
const MAX_VARINT_LEN: usize = 10;

const POWER_FIELD: u64 = 4;
const HEART_RATE_FIELD: u64 = 6;
const MAX_POWER: u64 = 10_000;
const MAX_HEART_RATE: u64 = 220;

/// Wait for a datagram before re-checking cancellation and the process probe.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);
/// Pause while the companion is not running or the socket is unavailable.
const IDLE_DELAY: Duration = Duration::from_secs(1);

/// Values extracted from one datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryFrame {
    pub power: Option<u16>,
    pub heart_rate: Option<u8>,
}

/// Read a base-128 varint starting at `offset`.
fn read_varint(data: &[u8], mut offset: usize) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let byte = *data.get(offset)?;
        offset += 1;
        value |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, offset));
        }
    }
    None
}

/// Extract power and heart rate from a player state datagram.
///
/// Malformed or short input yields an empty frame. Out-of-range values are
/// dropped.
pub fn decode_player_state(data: &[u8]) -> TelemetryFrame {
    let mut frame = TelemetryFrame::default();
    if data.len() < MIN_DATAGRAM_LEN {
        return frame;
    }

    let mut offset = HEADER_LEN;
    while offset < data.len() - 1 {
        let Some((tag, next)) = read_varint(data, offset) else {
            break;
        };
        offset = next;
        let field = tag >> 3;

        match tag & 0x07 {
            // varint
            0 => {
                let Some((value, next)) = read_varint(data, offset) else {
                    break;
                };
                offset = next;
                if field == POWER_FIELD {
                    frame.power = (value <= MAX_POWER).then_some(value as u16);
                } else if field == HEART_RATE_FIELD {
                    frame.heart_rate = (1..=MAX_HEART_RATE)
                        .contains(&value)
                        .then_some(value as u8);
                }
            }
            // length-delimited
            2 => {
                let Some((len, next)) = read_varint(data, offset) else {
                    break;
                };
                let Some(end) = usize::try_from(len).ok().and_then(|len| next.checked_add(len))
                else {
                    break;
                };
                offset = end;
            }
            // fixed32
            5 => offset += 4,
            // fixed64
            1 => offset += 8,
            _ => break,
        }
    }

    frame
}

/// Listens for feed datagrams while the companion process runs.
pub struct FeedWorker<P: ProcessProbe + 'static> {
    arbiter: Arc<SourceArbiter>,
    probe: Arc<P>,
    settings: FeedSettings,
}

impl<P: ProcessProbe + 'static> FeedWorker<P> {
    pub fn new(settings: FeedSettings, arbiter: Arc<SourceArbiter>, probe: P) -> Self {
        Self {
            arbiter,
            probe: Arc::new(probe),
            settings,
        }
    }

    async fn probe_running(&self) -> bool {
        let probe = self.probe.clone();
        let name = self.settings.process_name.clone();
        tokio::task::spawn_blocking(move || probe.is_running(&name))
            .await
            .unwrap_or(false)
    }

    async fn bind(&self) -> Option<UdpSocket> {
        let address = self.settings.bind_address();
        match UdpSocket::bind(&address).await {
            Ok(socket) => {
                tracing::info!("Listening for feed on {}", address);
                Some(socket)
            }
            Err(e) => {
                tracing::warn!("{}", SourceError::BindFailed(address, e.to_string()));
                None
            }
        }
    }

    fn handle(&self, datagram: &[u8]) {
        let frame = decode_player_state(datagram);
        if let Some(watts) = frame.power {
            self.arbiter.on_power(SourceKind::Feed, watts);
        }
        if let Some(bpm) = frame.heart_rate {
            self.arbiter.on_heart_rate(SourceKind::Feed, bpm);
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut socket: Option<UdpSocket> = None;
        let mut companion_running = false;
        let mut next_probe = Instant::now();
        let mut buf = [0u8; 4096];

        while !cancel.is_cancelled() {
            if Instant::now() >= next_probe {
                let running = self.probe_running().await;
                next_probe = Instant::now() + self.settings.check_interval();

                if running && !companion_running {
                    tracing::info!("{} started", self.settings.process_name);
                    socket = self.bind().await;
                } else if !running && companion_running {
                    tracing::warn!("{} stopped, pausing feed", self.settings.process_name);
                    socket = None;
                }
                companion_running = running;
                self.arbiter.set_running(SourceKind::Feed, running);
            }

            if !companion_running {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_DELAY) => {}
                }
                continue;
            }

            if socket.is_none() {
                socket = self.bind().await;
            }
            let Some(sock) = socket.as_ref() else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_DELAY) => {}
                }
                continue;
            };

            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = tokio::time::timeout(RECV_TIMEOUT, sock.recv_from(&mut buf)) => received,
            };

            match received {
                Ok(Ok((len, _))) => self.handle(&buf[..len]),
                Ok(Err(e)) => {
                    tracing::warn!("Feed socket error: {}", e);
                    socket = None;
                }
                Err(_) => {}
            }
        }

        self.arbiter.set_running(SourceKind::Feed, false);
        tracing::info!("Feed worker stopped");
    }
}
