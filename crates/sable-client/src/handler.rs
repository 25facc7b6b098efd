//! Caller-supplied event handlers and the per-shard pump that runs them.
//!
//! Each shard has one pump task. The router forwards events into the
//! pump's queue without waiting, so a slow handler delays only later
//! handler calls for that shard, never heartbeats or frame reads.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use sable_core::Snowflake;
use sable_gateway::{DispatchEvent, ShardId};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A shard received READY.
    Connected {
        /// Shard.
        shard: ShardId,
        /// New gateway session id.
        session_id: String,
    },
    /// A shard resumed its session.
    Resumed {
        /// Shard.
        shard: ShardId,
    },
    /// A shard lost its connection.
    Disconnected {
        /// Shard.
        shard: ShardId,
        /// Close code, if any.
        code: Option<u16>,
        /// `true` if the shard stopped for good.
        fatal: bool,
    },
    /// A voice connection confirmed its media path.
    VoiceConnected {
        /// Guild.
        guild: Snowflake,
        /// Our SSRC.
        ssrc: u32,
    },
    /// A voice connection ended.
    VoiceDisconnected {
        /// Guild.
        guild: Snowflake,
        /// `true` if it ended on an error rather than a leave or shutdown.
        fatal: bool,
    },
}

/// Receives decoded events, in wire order per shard.
///
/// Both methods default to doing nothing.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// A dispatch event from `shard`.
    async fn dispatch(&self, shard: ShardId, event: &DispatchEvent) {
        let _ = (shard, event);
    }

    /// A lifecycle change.
    async fn lifecycle(&self, event: &LifecycleEvent) {
        let _ = event;
    }
}

/// Work queued for a shard's pump.
#[derive(Debug)]
pub(crate) enum PumpItem {
    Dispatch(DispatchEvent),
    Lifecycle(LifecycleEvent),
    /// Everything queued before this has been delivered.
    Stop,
}

/// Run `handlers` over `queue` until [`PumpItem::Stop`] or the queue closes.
pub(crate) async fn run_pump(
    shard: ShardId,
    handlers: Arc<[Arc<dyn EventHandler>]>,
    mut queue: mpsc::UnboundedReceiver<PumpItem>,
) {
    while let Some(item) = queue.recv().await {
        match item {
            PumpItem::Dispatch(event) => {
                trace!(%shard, event = event.name(), "Delivering dispatch");
                for handler in handlers.iter() {
                    let call = AssertUnwindSafe(handler.dispatch(shard, &event));
                    if let Err(e) = call.catch_unwind().await {
                        warn!(%shard, event = event.name(), error = ?e, "Event handler panicked");
                    }
                }
            },
            PumpItem::Lifecycle(event) => {
                for handler in handlers.iter() {
                    let call = AssertUnwindSafe(handler.lifecycle(&event));
                    if let Err(e) = call.catch_unwind().await {
                        warn!(%shard, event = ?event, error = ?e, "Lifecycle handler panicked");
                    }
                }
            },
            PumpItem::Stop => break,
        }
    }
    debug!(%shard, "Event pump stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn dispatch(&self, _shard: ShardId, event: &DispatchEvent) {
            // Later events must still arrive after earlier slow ones.
            if event.name() == "FIRST" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.seen.lock().await.push(event.name().to_owned());
        }

        async fn lifecycle(&self, event: &LifecycleEvent) {
            self.seen.lock().await.push(format!("{event:?}"));
        }
    }

    fn other(name: &str) -> DispatchEvent {
        DispatchEvent::Other {
            name: name.into(),
            data: json!({}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_in_queue_order() {
        let recorder = Arc::new(Recorder::default());
        let handlers: Arc<[Arc<dyn EventHandler>]> = Arc::from(vec![recorder.clone() as Arc<dyn EventHandler>]);
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(run_pump(ShardId::ONE, handlers, rx));

        tx.send(PumpItem::Dispatch(other("FIRST"))).unwrap();
        tx.send(PumpItem::Lifecycle(LifecycleEvent::Resumed { shard: ShardId::ONE }))
            .unwrap();
        tx.send(PumpItem::Dispatch(other("SECOND"))).unwrap();
        tx.send(PumpItem::Stop).unwrap();
        tx.send(PumpItem::Dispatch(other("AFTER_STOP"))).unwrap();
        pump.await.unwrap();

        let seen = recorder.seen.lock().await.clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], "FIRST");
        assert!(seen[1].starts_with("Resumed"));
        assert_eq!(seen[2], "SECOND");
    }

    struct Boom;

    #[async_trait]
    impl EventHandler for Boom {
        async fn dispatch(&self, _shard: ShardId, event: &DispatchEvent) {
            assert_ne!(event.name(), "BAD", "handler blew up");
        }

        async fn lifecycle(&self, _event: &LifecycleEvent) {
            panic!("lifecycle blew up");
        }
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_the_pump() {
        let recorder = Arc::new(Recorder::default());
        let handlers: Arc<[Arc<dyn EventHandler>]> = Arc::from(vec![
            Arc::new(Boom) as Arc<dyn EventHandler>,
            recorder.clone() as Arc<dyn EventHandler>,
        ]);
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(run_pump(ShardId::ONE, handlers, rx));

        tx.send(PumpItem::Dispatch(other("BAD"))).unwrap();
        tx.send(PumpItem::Lifecycle(LifecycleEvent::Resumed { shard: ShardId::ONE }))
            .unwrap();
        tx.send(PumpItem::Dispatch(other("NEXT"))).unwrap();
        tx.send(PumpItem::Stop).unwrap();
        pump.await.unwrap();

        let seen = recorder.seen.lock().await.clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], "BAD");
        assert!(seen[1].starts_with("Resumed"));
        assert_eq!(seen[2], "NEXT");
    }

    #[tokio::test]
    async fn default_methods_do_nothing() {
        struct Nop;
        impl EventHandler for Nop {}

        Nop.dispatch(ShardId::ONE, &other("X")).await;
        Nop.lifecycle(&LifecycleEvent::Resumed { shard: ShardId::ONE })
            .await;
    }
}
