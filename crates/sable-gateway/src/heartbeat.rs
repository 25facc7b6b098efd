//! Heartbeat task and zombie connection detection.
//!
//! Runs alongside the receive loop. The first beat goes out after
//! `interval * random[0, 1)`, then one every `interval`. If the previous
//! beat is still unacknowledged when the next is due, the connection is a
//! zombie and the task signals the receive loop to reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::protocol;
use crate::state::SessionSnapshot;
use crate::writer::Outbound;

/// Heartbeat bookkeeping shared between the heartbeat task and the
/// receive loop.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    interval: Duration,
    last_sent: Option<Instant>,
    acked: bool,
    latency: Option<Duration>,
}

impl HeartbeatState {
    /// Fresh state; nothing sent, so nothing is owed.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            acked: true,
            latency: None,
        }
    }

    /// Server-provided interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the last beat was acknowledged.
    #[must_use]
    pub fn is_acked(&self) -> bool {
        self.acked
    }

    /// Round trip of the last acknowledged beat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Record a scheduled beat at `now`.
    ///
    /// Returns `false` if the previous beat was never acknowledged.
    pub fn try_beat(&mut self, now: Instant) -> bool {
        if !self.acked {
            return false;
        }
        self.acked = false;
        self.last_sent = Some(now);
        true
    }

    /// Record an acknowledgement and return the measured round trip.
    pub fn ack(&mut self, now: Instant) -> Option<Duration> {
        self.acked = true;
        self.latency = self
            .last_sent
            .map(|sent| now.saturating_duration_since(sent));
        trace!(latency_ms = ?self.latency.map(|l| l.as_millis()), "Heartbeat ACK received");
        self.latency
    }
}

/// Delay before the first beat: `interval * random[0, 1)`.
#[must_use]
pub(crate) fn first_beat_delay(interval: Duration) -> Duration {
    interval.mul_f64(fastrand::f64())
}

/// Run the heartbeat loop until cancelled or zombied.
///
/// Beats carry the sequence from `snapshot` and go out on `outbound`,
/// ahead of rate-limited commands.
pub(crate) async fn run_heartbeat(
    state: Arc<Mutex<HeartbeatState>>,
    snapshot: watch::Receiver<SessionSnapshot>,
    outbound: mpsc::Sender<Outbound>,
    zombie_tx: oneshot::Sender<()>,
    cancel: CancellationToken,
) {
    let interval = state.lock().await.interval();
    let first = first_beat_delay(interval);
    debug!(
        interval_ms = interval.as_millis(),
        first_delay_ms = first.as_millis(),
        "Heartbeat task started"
    );

    let mut next = Instant::now().checked_add(first).unwrap_or_else(Instant::now);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Heartbeat task stopping");
                return;
            },
            () = tokio::time::sleep_until(next) => {},
        }

        if !state.lock().await.try_beat(Instant::now()) {
            warn!(
                interval_ms = interval.as_millis(),
                "Heartbeat ACK missed, zombie connection detected"
            );
            let _ = zombie_tx.send(());
            return;
        }

        let seq = snapshot.borrow().sequence;
        debug!(seq = ?seq, "Sending heartbeat");
        if outbound
            .send(Outbound::Frame(protocol::heartbeat(seq)))
            .await
            .is_err()
        {
            // Writer gone; the receive loop sees the connection drop.
            return;
        }

        next = next.checked_add(interval).unwrap_or_else(Instant::now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::opcode;
    use crate::state::ShardId;

    const INTERVAL: Duration = Duration::from_millis(41_250);

    struct Harness {
        state: Arc<Mutex<HeartbeatState>>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        outbound_rx: mpsc::Receiver<Outbound>,
        zombie_rx: oneshot::Receiver<()>,
        cancel: CancellationToken,
    }

    fn spawn(interval: Duration) -> Harness {
        let state = Arc::new(Mutex::new(HeartbeatState::new(interval)));
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(ShardId::ONE));
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let (zombie_tx, zombie_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_heartbeat(
            Arc::clone(&state),
            snapshot_rx,
            outbound_tx,
            zombie_tx,
            cancel.clone(),
        ));
        Harness {
            state,
            snapshot_tx,
            outbound_rx,
            zombie_rx,
            cancel,
        }
    }

    fn beat_seq(out: Outbound) -> serde_json::Value {
        match out {
            Outbound::Frame(frame) => {
                assert_eq!(frame.op, opcode::HEARTBEAT);
                frame.d
            },
            Outbound::Close(code) => panic!("unexpected close {code}"),
        }
    }

    #[test]
    fn state_ack_cycle() {
        let now = Instant::now();
        let mut state = HeartbeatState::new(INTERVAL);
        assert!(state.is_acked());

        assert!(state.try_beat(now));
        assert!(!state.is_acked());
        assert!(!state.try_beat(now));

        let latency = state.ack(now + Duration::from_millis(40));
        assert_eq!(latency, Some(Duration::from_millis(40)));
        assert!(state.try_beat(now));
    }

    #[test]
    fn first_delay_is_within_interval() {
        for _ in 0..100 {
            assert!(first_beat_delay(INTERVAL) < INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_beat_within_interval_then_every_interval() {
        let start = Instant::now();
        let mut h = spawn(INTERVAL);
        h.snapshot_tx.send_modify(|s| s.sequence = Some(7));

        let first = h.outbound_rx.recv().await.unwrap();
        let first_at = Instant::now();
        assert!(first_at - start <= INTERVAL + Duration::from_millis(1));
        assert_eq!(beat_seq(first), serde_json::json!(7));
        h.state.lock().await.ack(Instant::now());

        let second = h.outbound_rx.recv().await.unwrap();
        let gap = Instant::now() - first_at;
        assert!(gap >= INTERVAL - Duration::from_millis(1));
        assert!(gap <= INTERVAL + Duration::from_millis(1));
        assert_eq!(beat_seq(second), serde_json::json!(7));
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_is_zombie_by_two_intervals() {
        let start = Instant::now();
        let mut h = spawn(INTERVAL);

        let first = h.outbound_rx.recv().await.unwrap();
        assert!(beat_seq(first).is_null());

        (&mut h.zombie_rx).await.unwrap();
        assert!(Instant::now() - start <= INTERVAL * 2 + Duration::from_millis(1));
        assert!(h.outbound_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_task() {
        let mut h = spawn(INTERVAL);
        h.cancel.cancel();
        assert!(h.outbound_rx.recv().await.is_none());
        assert!((&mut h.zombie_rx).await.is_err());
    }
}
