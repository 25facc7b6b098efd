//! Gateway session: connect, identify or resume, receive, reconnect.
//!
//! A [`GatewaySession`] runs as one task per shard. Each connection gets a
//! writer task and a heartbeat task; the session task itself is the receive
//! loop and the only writer of the [`SessionSnapshot`]. Callers talk to it
//! through a [`GatewayHandle`] and receive [`SessionEvent`]s on an unbounded
//! channel, so a slow consumer never stalls heartbeats.
//!
//! # Lifecycle
//!
//! `Connecting` (socket + Hello) → `Identifying` or `Resuming` →
//! `Connected` on READY/RESUMED. Any loss goes through `Reconnecting` with
//! a delay picked by [`LoopAction`]; fatal close codes and caller
//! shutdown end in `Closed`.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sable_core::{Backoff, SlidingWindow, Snowflake, Token};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::close_code::{self, CloseAction};
use crate::connection::{self, WsReader};
use crate::error::{GatewayError, GatewayResult};
use crate::heartbeat::{self, HeartbeatState};
use crate::limiter::IdentifyGate;
use crate::protocol::{
    self, DispatchEvent, Frame, GatewayEvent, IdentifyOptions, PresenceUpdate,
    RequestGuildMembers, UpdateVoiceState,
};
use crate::state::{SessionSnapshot, SessionState, ShardId};
use crate::writer::{self, Outbound};

const PRIORITY_CAPACITY: usize = 16;
const COMMAND_CAPACITY: usize = 64;
/// Upper bound of the pause before honoring a server reconnect request.
const RECONNECT_JITTER_MS: u64 = 1000;
/// Grace period for the writer to flush the close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

// ── Configuration ────────────────────────────────────────────

/// Gateway session configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway base URL, e.g. `wss://gateway.discord.gg`.
    pub url: String,
    /// Identify parameters.
    pub identify: IdentifyOptions,
    /// Time allowed between socket open and Hello.
    pub hello_timeout: Duration,
    /// Time allowed for the `WebSocket` handshake.
    pub connect_timeout: Duration,
    /// First reconnect backoff ceiling.
    pub backoff_base: Duration,
    /// Maximum reconnect backoff ceiling.
    pub backoff_max: Duration,
    /// Consecutive reconnects allowed without reaching `Connected`.
    pub max_reconnect_attempts: u32,
    /// Caller commands allowed per `command_window` (0 = unlimited).
    pub command_limit: usize,
    /// Window for `command_limit`.
    pub command_window: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "wss://gateway.discord.gg".to_string(),
            identify: IdentifyOptions::default(),
            hello_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            max_reconnect_attempts: u32::MAX,
            command_limit: 120,
            command_window: Duration::from_secs(60),
        }
    }
}

// ── Events ───────────────────────────────────────────────────

/// Notifications from a running session, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// READY received.
    Connected {
        /// New session id.
        session_id: String,
        /// Our user id.
        user_id: Snowflake,
    },
    /// RESUMED received.
    Resumed,
    /// A dispatch event, after sequence deduplication.
    Dispatch {
        /// Sequence number.
        seq: Option<u64>,
        /// Payload.
        event: DispatchEvent,
    },
    /// A connection ended.
    Disconnected {
        /// Close code, if the server sent one.
        code: Option<u16>,
        /// `true` if the session will not reconnect.
        fatal: bool,
    },
}

/// What to do after a connection ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Caller asked to stop.
    Shutdown,
    /// Server sent `op 7`: resume after a short jitter.
    ServerReconnect,
    /// Transport lost or zombied: resume after backoff.
    Lost,
    /// Server sent `op 9`: wait 1-5 s, resuming only if allowed.
    Invalidated {
        /// Whether the session survives.
        resumable: bool,
    },
    /// Session is gone: identify afresh after backoff.
    Reidentify,
}

// ── Handle ───────────────────────────────────────────────────

/// Cloneable control handle for a running session.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    shard: ShardId,
    commands: mpsc::Sender<Frame>,
    snapshot: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
}

impl GatewayHandle {
    /// Shard this session serves.
    #[must_use]
    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// Watch snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the session reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Shutdown`] if the session ends first.
    pub async fn wait_for_state(&self, state: SessionState) -> GatewayResult<()> {
        let mut rx = self.snapshot.clone();
        let reached = rx
            .wait_for(|s| s.state == state || s.state.is_closed())
            .await
            .map(|s| s.state == state)
            .unwrap_or(false);
        if reached {
            Ok(())
        } else {
            Err(GatewayError::Shutdown)
        }
    }

    /// Queue a raw command frame. Commands are rate limited per connection
    /// and held while disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Shutdown`] if the session has ended.
    pub async fn send(&self, frame: Frame) -> GatewayResult<()> {
        self.commands
            .send(frame)
            .await
            .map_err(|_| GatewayError::Shutdown)
    }

    /// Send a voice state update (`op 4`).
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn update_voice_state(&self, update: &UpdateVoiceState) -> GatewayResult<()> {
        self.send(protocol::voice_state_update(update)?).await
    }

    /// Send a presence update (`op 3`).
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn update_presence(&self, presence: &PresenceUpdate) -> GatewayResult<()> {
        self.send(protocol::presence_update(presence)?).await
    }

    /// Request guild members (`op 8`).
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn request_guild_members(&self, request: &RequestGuildMembers) -> GatewayResult<()> {
        self.send(protocol::request_guild_members(request)?).await
    }

    /// Disconnect and stop reconnecting.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ── Session ──────────────────────────────────────────────────

/// One shard's gateway connection state machine.
pub struct GatewaySession {
    token: Token,
    shard: ShardId,
    config: GatewayConfig,
    gate: IdentifyGate,
    snapshot: watch::Sender<SessionSnapshot>,
    events: mpsc::UnboundedSender<SessionEvent>,
    commands: mpsc::Receiver<Frame>,
    commands_open: bool,
    cancel: CancellationToken,
    backoff: Backoff,
    attempts: u32,
    last_close: Option<u16>,
}

impl GatewaySession {
    /// Create a session without starting it.
    #[must_use]
    pub fn new(
        token: Token,
        shard: ShardId,
        config: GatewayConfig,
        gate: IdentifyGate,
    ) -> (Self, GatewayHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(shard));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let cancel = CancellationToken::new();
        let backoff = Backoff::new(config.backoff_base, config.backoff_max);

        let handle = GatewayHandle {
            shard,
            commands: commands_tx,
            snapshot: snapshot_rx,
            cancel: cancel.clone(),
        };
        let session = Self {
            token,
            shard,
            config,
            gate,
            snapshot: snapshot_tx,
            events: events_tx,
            commands: commands_rx,
            commands_open: true,
            cancel,
            backoff,
            attempts: 0,
            last_close: None,
        };
        (session, handle, events_rx)
    }

    /// Create a session and run it on a new task.
    #[must_use]
    pub fn spawn(
        token: Token,
        shard: ShardId,
        config: GatewayConfig,
        gate: IdentifyGate,
    ) -> (
        GatewayHandle,
        mpsc::UnboundedReceiver<SessionEvent>,
        JoinHandle<GatewayResult<()>>,
    ) {
        let (session, handle, events) = Self::new(token, shard, config, gate);
        let task = tokio::spawn(session.run());
        (handle, events, task)
    }

    /// Run until closed or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns the fatal error ([`GatewayError::AuthenticationFailed`],
    /// [`GatewayError::FatalClose`] or [`GatewayError::MaxReconnects`]).
    pub async fn run(mut self) -> GatewayResult<()> {
        let shard = self.shard;
        let result = self.run_loop().await;
        self.set_state(SessionState::Closed);

        match &result {
            Ok(()) => info!(%shard, "Gateway session closed"),
            Err(e) => {
                error!(%shard, error = %e, "Gateway session ended");
                let _ = self.events.send(SessionEvent::Disconnected {
                    code: self.last_close,
                    fatal: true,
                });
            },
        }
        result
    }

    async fn run_loop(&mut self) -> GatewayResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let action = match self.connect_and_run().await {
                Ok(action) => action,
                Err(GatewayError::Shutdown) => LoopAction::Shutdown,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(shard = %self.shard, error = %e, "Gateway connection error");
                    LoopAction::Lost
                },
            };
            if action == LoopAction::Shutdown {
                return Ok(());
            }

            self.connection_lost();

            let delay = self.plan(action)?;
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {},
            }
        }
    }

    /// Apply `action` to the session and pick the pause before reconnecting.
    fn plan(&mut self, action: LoopAction) -> GatewayResult<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.config.max_reconnect_attempts {
            return Err(GatewayError::MaxReconnects(self.config.max_reconnect_attempts));
        }

        let delay = match action {
            LoopAction::Shutdown => Duration::ZERO,
            LoopAction::ServerReconnect => {
                Duration::from_millis(fastrand::u64(0..=RECONNECT_JITTER_MS))
            },
            LoopAction::Lost => self.backoff.next_delay(),
            LoopAction::Invalidated { resumable } => {
                if !resumable {
                    self.snapshot.send_modify(SessionSnapshot::clear_session);
                }
                Duration::from_millis(fastrand::u64(1000..=5000))
            },
            LoopAction::Reidentify => {
                self.snapshot.send_modify(SessionSnapshot::clear_session);
                self.backoff.next_delay()
            },
        };

        info!(
            shard = %self.shard,
            ?action,
            delay_ms = delay.as_millis(),
            attempt = self.attempts,
            resume = self.snapshot.borrow().can_resume(),
            "Reconnecting"
        );
        Ok(delay)
    }

    fn set_state(&self, state: SessionState) {
        self.snapshot.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            debug!(shard = %self.shard, from = ?s.state, to = ?state, "Session state");
            s.state = state;
            true
        });
    }

    /// Leave the connection behind: report it and mark the session
    /// reconnecting. Safe to call more than once per connection.
    fn connection_lost(&mut self) {
        let was_connected = self.snapshot.borrow().state == SessionState::Connected;
        self.set_state(SessionState::Reconnecting);
        if was_connected {
            let _ = self.events.send(SessionEvent::Disconnected {
                code: self.last_close,
                fatal: false,
            });
        }
        self.last_close = None;
    }

    fn on_connected(&mut self) {
        self.set_state(SessionState::Connected);
        self.backoff.reset();
        self.attempts = 0;
    }

    fn resolve_url(&self) -> GatewayResult<String> {
        let snapshot = self.snapshot.borrow();
        let base = match &snapshot.resume_url {
            Some(url) if snapshot.can_resume() => url.as_str(),
            _ => self.config.url.as_str(),
        };
        protocol::connect_url(base)
    }

    /// One connection: open, handshake, receive until it ends.
    async fn connect_and_run(&mut self) -> GatewayResult<LoopAction> {
        self.set_state(SessionState::Connecting);
        let url = self.resolve_url()?;

        let (ws_writer, mut reader) = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(GatewayError::Shutdown),
            conn = connection::connect(&url, self.config.connect_timeout) => conn?,
        };
        let interval = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(GatewayError::Shutdown),
            hello = connection::wait_for_hello(&mut reader, self.config.hello_timeout) => hello?,
        };
        debug!(shard = %self.shard, interval_ms = interval.as_millis(), "Hello received");
        self.snapshot
            .send_modify(|s| s.heartbeat_interval = Some(interval));

        let (priority_tx, priority_rx) = mpsc::channel(PRIORITY_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let limiter = SlidingWindow::new(self.config.command_limit, self.config.command_window);
        let mut writer_task = tokio::spawn(writer::run_writer(
            ws_writer,
            priority_rx,
            command_rx,
            limiter,
        ));

        let hb_state = Arc::new(Mutex::new(HeartbeatState::new(interval)));
        let (zombie_tx, zombie_rx) = oneshot::channel();
        let beat_cancel = self.cancel.child_token();
        let heartbeat_task = tokio::spawn(heartbeat::run_heartbeat(
            Arc::clone(&hb_state),
            self.snapshot.subscribe(),
            priority_tx.clone(),
            zombie_tx,
            beat_cancel.clone(),
        ));

        let action = match self.authenticate(&priority_tx).await {
            Ok(()) => {
                self.event_loop(&mut reader, &priority_tx, &command_tx, &hb_state, zombie_rx)
                    .await
            },
            Err(e) => Err(e),
        };

        beat_cancel.cancel();
        heartbeat_task.abort();

        let lost = match &action {
            Ok(LoopAction::Shutdown) | Err(GatewayError::Shutdown) => false,
            Ok(_) => true,
            Err(e) => !e.is_fatal(),
        };
        if lost {
            self.connection_lost();
        }

        let code = match &action {
            Ok(LoopAction::Shutdown | LoopAction::Reidentify)
            | Ok(LoopAction::Invalidated { resumable: false }) => close_code::NORMAL,
            _ => close_code::CLIENT_RECONNECT,
        };
        let _ = priority_tx.try_send(Outbound::Close(code));
        drop(priority_tx);
        drop(command_tx);

        tokio::select! {
            _ = &mut writer_task => {},
            () = tokio::time::sleep(WRITER_DRAIN) => writer_task.abort(),
        }

        action
    }

    /// Send identify (after the identify gate) or resume.
    async fn authenticate(&mut self, priority: &mpsc::Sender<Outbound>) -> GatewayResult<()> {
        let snapshot = self.snapshot.borrow().clone();
        let frame = match (&snapshot.session_id, snapshot.sequence) {
            (Some(session_id), Some(seq)) => {
                self.set_state(SessionState::Resuming);
                info!(shard = %self.shard, session_id = %session_id, seq, "Resuming session");
                protocol::resume(&self.token, session_id, seq)
            },
            _ => {
                self.set_state(SessionState::Identifying);
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Err(GatewayError::Shutdown),
                    () = self.gate.wait(self.shard.id) => {},
                }
                info!(shard = %self.shard, "Identifying");
                protocol::identify(&self.token, self.shard, &self.config.identify)?
            },
        };

        priority
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| GatewayError::Protocol("writer closed before authentication".into()))
    }

    async fn event_loop(
        &mut self,
        reader: &mut WsReader,
        priority: &mpsc::Sender<Outbound>,
        command_tx: &mpsc::Sender<Frame>,
        hb_state: &Arc<Mutex<HeartbeatState>>,
        mut zombie_rx: oneshot::Receiver<()>,
    ) -> GatewayResult<LoopAction> {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    info!(shard = %self.shard, "Gateway session shutting down");
                    return Ok(LoopAction::Shutdown);
                },

                Ok(()) = &mut zombie_rx => {
                    warn!(shard = %self.shard, error = %GatewayError::Zombied, "Reconnecting");
                    return Ok(LoopAction::Lost);
                },

                msg = reader.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event = match GatewayEvent::decode(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(shard = %self.shard, error = %e, "Dropping malformed frame");
                                continue;
                            },
                        };
                        if let Some(action) = self.handle_event(event, priority, hb_state).await {
                            return Ok(action);
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let Some(code) = frame.map(|f| u16::from(f.code)) else {
                            warn!(shard = %self.shard, "Connection closed without code");
                            return Ok(LoopAction::Lost);
                        };
                        self.last_close = Some(code);
                        return match close_code::classify(code) {
                            CloseAction::Fatal => {
                                error!(shard = %self.shard, code, "Fatal close code");
                                Err(close_code::fatal_error(code))
                            },
                            CloseAction::Reidentify => {
                                info!(shard = %self.shard, code, "Session closed, will identify");
                                Ok(LoopAction::Reidentify)
                            },
                            CloseAction::Resume => {
                                warn!(shard = %self.shard, code, "Connection closed, will resume");
                                Ok(LoopAction::Lost)
                            },
                        };
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        warn!(shard = %self.shard, error = %e, "WebSocket read error");
                        return Ok(LoopAction::Lost);
                    },
                    None => {
                        warn!(shard = %self.shard, "WebSocket stream ended");
                        return Ok(LoopAction::Lost);
                    },
                },

                cmd = self.commands.recv(), if self.commands_open && command_tx.capacity() > 0 => {
                    match cmd {
                        Some(frame) => {
                            if command_tx.try_send(frame).is_err() {
                                warn!(shard = %self.shard, "Command queue full, dropping command");
                            }
                        },
                        None => self.commands_open = false,
                    }
                },
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: GatewayEvent,
        priority: &mpsc::Sender<Outbound>,
        hb_state: &Arc<Mutex<HeartbeatState>>,
    ) -> Option<LoopAction> {
        match event {
            GatewayEvent::Dispatch { seq, event } => {
                self.handle_dispatch(seq, event);
                None
            },
            GatewayEvent::Heartbeat => {
                let seq = self.snapshot.borrow().sequence;
                debug!(shard = %self.shard, seq = ?seq, "Server requested heartbeat");
                let _ = priority
                    .send(Outbound::Frame(protocol::heartbeat(seq)))
                    .await;
                None
            },
            GatewayEvent::HeartbeatAck => {
                let latency = hb_state.lock().await.ack(Instant::now());
                self.snapshot.send_modify(|s| s.latency = latency);
                None
            },
            GatewayEvent::Reconnect => {
                info!(shard = %self.shard, "Server requested reconnect");
                Some(LoopAction::ServerReconnect)
            },
            GatewayEvent::InvalidSession { resumable } => {
                warn!(
                    shard = %self.shard,
                    error = %GatewayError::SessionInvalidated { resumable },
                    "Invalid session"
                );
                Some(LoopAction::Invalidated { resumable })
            },
            GatewayEvent::Hello { .. } => {
                warn!(shard = %self.shard, "Unexpected Hello mid-session");
                None
            },
            GatewayEvent::Unknown { op, .. } => {
                debug!(shard = %self.shard, op, "Unknown gateway opcode");
                None
            },
        }
    }

    fn handle_dispatch(&mut self, seq: Option<u64>, event: DispatchEvent) {
        if let Some(seq) = seq {
            let mut accepted = false;
            self.snapshot.send_modify(|s| accepted = s.advance(seq));
            if !accepted {
                debug!(shard = %self.shard, seq, event = event.name(), "Dropping replayed dispatch");
                return;
            }
        }

        match &event {
            DispatchEvent::Ready(ready) => {
                let resume_url = ready
                    .resume_gateway_url
                    .clone()
                    .filter(|url| protocol::is_valid_resume_url(url));
                if resume_url.is_none() {
                    debug!(
                        shard = %self.shard,
                        url = ?ready.resume_gateway_url,
                        "No usable resume URL, will resume on the base URL"
                    );
                }
                self.snapshot.send_modify(|s| {
                    s.session_id = Some(ready.session_id.clone());
                    s.resume_url = resume_url;
                    s.user_id = Some(ready.user.id);
                });
                self.on_connected();
                info!(
                    shard = %self.shard,
                    session_id = %ready.session_id,
                    user_id = %ready.user.id,
                    "Gateway session established (READY)"
                );
                let _ = self.events.send(SessionEvent::Connected {
                    session_id: ready.session_id.clone(),
                    user_id: ready.user.id,
                });
            },
            DispatchEvent::Resumed => {
                self.on_connected();
                info!(shard = %self.shard, seq = ?self.snapshot.borrow().sequence, "Gateway session resumed");
                let _ = self.events.send(SessionEvent::Resumed);
            },
            _ => trace!(shard = %self.shard, seq = ?seq, event = event.name(), "Dispatch"),
        }

        let _ = self.events.send(SessionEvent::Dispatch { seq, event });
    }
}
