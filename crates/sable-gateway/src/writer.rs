//! `WebSocket` writer task.
//!
//! Owns the sink half of the connection. Control frames (heartbeats,
//! identify, resume, close) arrive on the priority channel and are written
//! immediately; caller commands arrive on the command channel and pass
//! through a sliding-window limiter first.

use futures::{Sink, SinkExt};
use sable_core::SlidingWindow;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, error, trace};

use crate::protocol::Frame;

/// Something for the writer to put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    /// A frame, written as JSON text.
    Frame(Frame),
    /// A close frame with this code; the writer exits after sending it.
    Close(u16),
}

/// Drive `sink` until the priority channel closes or a close frame is sent.
pub(crate) async fn run_writer<S>(
    mut sink: S,
    mut priority_rx: mpsc::Receiver<Outbound>,
    mut command_rx: mpsc::Receiver<Frame>,
    mut limiter: SlidingWindow,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut pending: Option<Frame> = None;
    let mut ready_at = Instant::now();
    let mut commands_open = true;

    loop {
        if let Some(frame) = pending.take() {
            match limiter.try_acquire(Instant::now()) {
                Ok(()) => {
                    if !write_frame(&mut sink, &frame).await {
                        return;
                    }
                },
                Err(wait) => {
                    debug!(
                        op = frame.op,
                        wait_ms = wait.as_millis(),
                        "Command rate limit reached, holding command"
                    );
                    pending = Some(frame);
                    ready_at = Instant::now().checked_add(wait).unwrap_or_else(Instant::now);
                },
            }
        }

        let throttled = pending.is_some();
        tokio::select! {
            biased;
            out = priority_rx.recv() => match out {
                Some(Outbound::Frame(frame)) => {
                    if !write_frame(&mut sink, &frame).await {
                        return;
                    }
                },
                Some(Outbound::Close(code)) => {
                    let frame = CloseFrame {
                        code: code.into(),
                        reason: "closing".into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!(error = %e, "Writer task: close failed");
                    }
                    return;
                },
                None => return,
            },
            () = tokio::time::sleep_until(ready_at), if throttled => {},
            cmd = command_rx.recv(), if !throttled && commands_open => match cmd {
                Some(frame) => pending = Some(frame),
                None => commands_open = false,
            },
        }
    }
}

async fn write_frame<S>(sink: &mut S, frame: &Frame) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = match frame.encode() {
        Ok(json) => json,
        Err(e) => {
            error!(op = frame.op, error = %e, "Failed to serialize gateway frame");
            return true;
        },
    };
    trace!(op = frame.op, "Writing frame");
    if let Err(e) = sink.send(Message::Text(json.into())).await {
        debug!(error = %e, "Writer task: send failed");
        return false;
    }
    true
}
