//! Voice `WebSocket` plumbing: connect, Hello, writer and heartbeat tasks.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use sable_gateway::HeartbeatState;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{VoiceFrame, VoiceMessage, close_code, opcode};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsWriter = SplitSink<WsStream, Message>;
pub(crate) type WsReader = SplitStream<WsStream>;

/// Something for the voice writer to send.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    Frame(VoiceFrame),
    Close(u16),
}

pub(crate) async fn connect(url: &str, timeout: Duration) -> VoiceResult<(WsWriter, WsReader)> {
    debug!(url = %url, "Connecting to voice gateway");
    let (ws, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| VoiceError::Timeout("voice connect"))??;
    Ok(ws.split())
}

pub(crate) async fn wait_for_hello(reader: &mut WsReader, timeout: Duration) -> VoiceResult<Duration> {
    let hello = async {
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => match VoiceMessage::decode(text.as_str())? {
                    VoiceMessage::Hello { heartbeat_interval } => return Ok(heartbeat_interval),
                    other => debug!(message = ?other, "Skipping voice frame before Hello"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map_or(1000, |f| u16::from(f.code));
                    return Err(if close_code::is_fatal(code) {
                        VoiceError::FatalClose(code)
                    } else {
                        VoiceError::Protocol(format!("closed with {code} before Hello"))
                    });
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => return Err(e.into()),
                None => return Err(VoiceError::Protocol("closed before Hello".into())),
            }
        }
    };

    tokio::time::timeout(timeout, hello)
        .await
        .map_err(|_| VoiceError::Timeout("voice Hello"))?
}

pub(crate) async fn run_writer(mut sink: WsWriter, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Frame(frame) => {
                let json = match frame.encode() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(op = frame.op, error = %e, "Failed to serialize voice frame");
                        continue;
                    },
                };
                trace!(op = frame.op, "Writing voice frame");
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    debug!(error = %e, "Voice writer: send failed");
                    return;
                }
            },
            Outbound::Close(code) => {
                let frame = CloseFrame {
                    code: code.into(),
                    reason: "closing".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return;
            },
        }
    }
}

fn nonce() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Beat every `interval` with a timestamp nonce; a missed ack is a zombie.
pub(crate) async fn run_heartbeat(
    state: Arc<Mutex<HeartbeatState>>,
    outbound: mpsc::Sender<Outbound>,
    zombie_tx: oneshot::Sender<()>,
    cancel: CancellationToken,
) {
    let interval = state.lock().await.interval();
    let mut next = Instant::now().checked_add(interval).unwrap_or_else(Instant::now);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep_until(next) => {},
        }

        if !state.lock().await.try_beat(Instant::now()) {
            warn!(interval_ms = interval.as_millis(), "Voice heartbeat ACK missed");
            let _ = zombie_tx.send(());
            return;
        }
        let frame = VoiceFrame {
            op: opcode::HEARTBEAT,
            d: serde_json::Value::from(nonce()),
        };
        if outbound.send(Outbound::Frame(frame)).await.is_err() {
            return;
        }
        next = next.checked_add(interval).unwrap_or_else(Instant::now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_sends_nonce_then_zombies() {
        let interval = Duration::from_millis(13_750);
        let state = Arc::new(Mutex::new(HeartbeatState::new(interval)));
        let (tx, mut rx) = mpsc::channel(4);
        let (zombie_tx, zombie_rx) = oneshot::channel();
        let start = Instant::now();
        tokio::spawn(run_heartbeat(state, tx, zombie_tx, CancellationToken::new()));

        let Some(Outbound::Frame(frame)) = rx.recv().await else {
            panic!("expected heartbeat");
        };
        assert_eq!(frame.op, opcode::HEARTBEAT);
        assert!(frame.d.as_u64().unwrap() > 0);

        zombie_rx.await.unwrap();
        assert!(Instant::now() - start <= interval * 2 + Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn acked_heartbeat_keeps_beating() {
        let interval = Duration::from_secs(5);
        let state = Arc::new(Mutex::new(HeartbeatState::new(interval)));
        let (tx, mut rx) = mpsc::channel(4);
        let (zombie_tx, mut zombie_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_heartbeat(Arc::clone(&state), tx, zombie_tx, cancel.clone()));

        for _ in 0..3 {
            rx.recv().await.unwrap();
            state.lock().await.ack(Instant::now());
        }
        assert!(zombie_rx.try_recv().is_err());
        cancel.cancel();
    }
}
