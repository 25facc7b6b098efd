//! UDP keepalive.
//!
//! Sends an 8-byte counter every interval and watches for any inbound
//! datagram. Silence longer than the threshold ends the task with
//! [`VoiceError::KeepaliveTimeout`].

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{VoiceError, VoiceResult};

/// Keepalive schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Time between packets.
    pub interval: Duration,
    /// Silence allowed before the connection is considered dead.
    pub timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Run until cancelled or the server goes silent.
///
/// `first_round_trip` fires when the first datagram comes back.
pub(crate) async fn run_keepalive(
    socket: Arc<UdpSocket>,
    config: KeepaliveConfig,
    first_round_trip: oneshot::Sender<()>,
    cancel: CancellationToken,
) -> VoiceResult<()> {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut first_round_trip = Some(first_round_trip);
    let mut counter: u64 = 0;
    let mut last_seen = Instant::now();
    let mut buf = [0u8; 1500];

    loop {
        let deadline = last_seen.checked_add(config.timeout).unwrap_or(last_seen);
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Keepalive task stopping");
                return Ok(());
            },
            () = tokio::time::sleep_until(deadline) => {
                warn!(timeout_ms = config.timeout.as_millis(), "No UDP traffic from voice server");
                return Err(VoiceError::KeepaliveTimeout(config.timeout));
            },
            received = socket.recv(&mut buf) => {
                let len = received?;
                last_seen = Instant::now();
                trace!(len, "UDP datagram received");
                if let Some(tx) = first_round_trip.take() {
                    let _ = tx.send(());
                }
            },
            _ = ticker.tick() => {
                trace!(counter, "Sending UDP keepalive");
                socket.send(&counter.to_be_bytes()).await?;
                counter = counter.wrapping_add(1);
            },
        }
    }
}
