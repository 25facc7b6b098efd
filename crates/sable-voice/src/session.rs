//! Voice session state machine.
//!
//! `Connecting` (socket, Hello, identify) → `SelectingProtocol` (READY,
//! UDP bind, IP discovery, select protocol) → `Ready` (session key) →
//! `Connected` after the first keepalive round trip. A lost voice socket
//! resumes and keeps the key; UDP silence starts a fresh handshake; fatal
//! close codes end the session. The key and SSRC never outlive it.

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::StreamExt;
use sable_core::{Backoff, Snowflake, Token};
use sable_gateway::HeartbeatState;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{self, Outbound, WsReader};
use crate::crypto::{EncryptionMode, SecretKey};
use crate::discovery::{self, DiscoveredAddress};
use crate::error::{VoiceError, VoiceResult};
use crate::keepalive::{self, KeepaliveConfig};
use crate::protocol::{
    self, Identify, Resume, SelectProtocol, SelectProtocolData, Speaking, SpeakingUpdate,
    VoiceFrame, VoiceMessage, close_code, opcode,
};

const OUTBOUND_CAPACITY: usize = 32;
const COMMAND_CAPACITY: usize = 16;
const NORMAL_CLOSE: u16 = 1000;
const RESUME_CLOSE: u16 = 4000;

// ── Configuration ────────────────────────────────────────────

/// Voice session configuration.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Encryption modes in preference order.
    pub modes: Vec<EncryptionMode>,
    /// UDP keepalive schedule.
    pub keepalive: KeepaliveConfig,
    /// Wait per IP discovery probe.
    pub discovery_timeout: Duration,
    /// IP discovery probes before giving up.
    pub discovery_attempts: u32,
    /// `WebSocket` handshake timeout.
    pub connect_timeout: Duration,
    /// Wait for Hello after connecting.
    pub hello_timeout: Duration,
    /// Wait for READY, SESSION_DESCRIPTION and RESUMED.
    pub ready_timeout: Duration,
    /// First reconnect backoff ceiling.
    pub backoff_base: Duration,
    /// Maximum reconnect backoff ceiling.
    pub backoff_max: Duration,
    /// Consecutive reconnects allowed without reaching `Connected`.
    pub max_reconnect_attempts: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            modes: EncryptionMode::PREFERENCE.to_vec(),
            keepalive: KeepaliveConfig::default(),
            discovery_timeout: Duration::from_secs(2),
            discovery_attempts: 5,
            connect_timeout: Duration::from_secs(10),
            hello_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}

/// Everything needed to open a voice connection, gathered from the
/// gateway's voice state and voice server updates.
#[derive(Debug, Clone)]
pub struct VoiceConnectInfo {
    /// Guild (the voice "server id").
    pub guild_id: Snowflake,
    /// Our user id.
    pub user_id: Snowflake,
    /// Session id from our voice state update.
    pub session_id: String,
    /// Voice server host from the voice server update.
    pub endpoint: String,
    /// Voice token from the voice server update. Only the raw secret is
    /// sent.
    pub token: Token,
}

// ── State ────────────────────────────────────────────────────

/// Voice connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum VoiceState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Opening the voice socket and identifying.
    Connecting,
    /// UDP discovery and protocol selection.
    SelectingProtocol,
    /// Key received, waiting for the first UDP round trip.
    Ready,
    /// Media path confirmed.
    Connected,
    /// Shutting down.
    Disconnecting,
}

/// Read-only view of a voice session.
#[derive(Debug, Clone, Default)]
pub struct VoiceSnapshot {
    /// Current state.
    pub state: VoiceState,
    /// Our SSRC.
    pub ssrc: Option<u32>,
    /// Voice server UDP endpoint.
    pub remote: Option<SocketAddr>,
    /// Our external address from IP discovery.
    pub external: Option<DiscoveredAddress>,
    /// Negotiated mode.
    pub mode: Option<EncryptionMode>,
    /// Whether a session key is held. Read it through
    /// [`VoiceHandle::with_key`].
    pub has_key: bool,
    /// Whether we announced speaking.
    pub speaking: bool,
    /// Last heartbeat round trip.
    pub latency: Option<Duration>,
}

impl VoiceSnapshot {
    fn clear_negotiated(&mut self) {
        self.ssrc = None;
        self.remote = None;
        self.external = None;
        self.mode = None;
        self.has_key = false;
        self.speaking = false;
    }
}

/// Notifications from a voice session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// First keepalive round trip after a handshake.
    Connected {
        /// Our SSRC.
        ssrc: u32,
    },
    /// The voice socket resumed with the existing key.
    Resumed,
    /// Another user's speaking state.
    Speaking(SpeakingUpdate),
    /// Another user left.
    ClientDisconnect {
        /// User who left.
        user_id: Snowflake,
    },
    /// The connection dropped.
    Disconnected {
        /// Close code, if any.
        code: Option<u16>,
        /// `true` if the session will not reconnect.
        fatal: bool,
    },
}

#[derive(Debug)]
enum Command {
    Speaking { flags: u32, delay: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Shutdown,
    /// Reconnect the socket and resume with the current key.
    Resume,
    /// Discard the key and handshake again.
    Restart,
}

/// UDP side of a negotiated session; survives voice socket resumes.
struct Media {
    cancel: CancellationToken,
    confirmed: bool,
    first_round_trip: Option<oneshot::Receiver<()>>,
    failed: Option<oneshot::Receiver<VoiceError>>,
    task: JoinHandle<()>,
}

impl Drop for Media {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn take_once<T>(rx: &mut Option<oneshot::Receiver<T>>) -> Option<T> {
    match rx {
        Some(inner) => {
            let value = inner.await.ok();
            *rx = None;
            value
        },
        None => std::future::pending().await,
    }
}

/// The session key, shared by a session and its handles. Only the
/// session stores into it; clearing drops (and zeroizes) the key.
#[derive(Debug, Clone, Default)]
struct KeySlot(Arc<RwLock<Option<SecretKey>>>);

impl KeySlot {
    fn set(&self, key: SecretKey) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(key);
    }

    fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn with<R>(&self, f: impl FnOnce(&SecretKey) -> R) -> Option<R> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
    }
}

// ── Handle ───────────────────────────────────────────────────

/// Cloneable control handle for a voice session.
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    guild_id: Snowflake,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<VoiceSnapshot>,
    key: KeySlot,
    cancel: CancellationToken,
}

impl VoiceHandle {
    /// Guild of this connection.
    #[must_use]
    pub fn guild_id(&self) -> Snowflake {
        self.guild_id
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> VoiceSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> VoiceState {
        self.snapshot.borrow().state
    }

    /// Run `f` against the session key, if one is held.
    ///
    /// The key is only lent for the call; once the session discards it,
    /// this returns `None`.
    pub fn with_key<R>(&self, f: impl FnOnce(&SecretKey) -> R) -> Option<R> {
        self.key.with(f)
    }

    /// Watch snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<VoiceSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the session reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Shutdown`] if the session ends first.
    pub async fn wait_for_state(&self, state: VoiceState) -> VoiceResult<()> {
        let mut rx = self.snapshot.clone();
        rx.wait_for(|s| s.state == state)
            .await
            .map(|_| ())
            .map_err(|_| VoiceError::Shutdown)
    }

    /// Announce speaking (microphone flag) or silence after `delay`.
    ///
    /// Does not change the connection state.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::NotConnected`] before an SSRC is assigned and
    /// [`VoiceError::Shutdown`] after the session ended.
    pub async fn set_speaking(&self, speaking: bool, delay: Duration) -> VoiceResult<()> {
        if self.snapshot.borrow().ssrc.is_none() {
            return Err(VoiceError::NotConnected);
        }
        let flags = if speaking {
            protocol::speaking::MICROPHONE
        } else {
            0
        };
        let delay = u32::try_from(delay.as_millis()).unwrap_or(u32::MAX);
        self.commands
            .send(Command::Speaking { flags, delay })
            .await
            .map_err(|_| VoiceError::Shutdown)
    }

    /// Disconnect and discard the session key.
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

/// One guild's voice connection.
pub struct VoiceSession {
    info: VoiceConnectInfo,
    config: VoiceConfig,
    snapshot: watch::Sender<VoiceSnapshot>,
    key: KeySlot,
    events: mpsc::UnboundedSender<VoiceEvent>,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    cancel: CancellationToken,
    backoff: Backoff,
    attempts: u32,
    last_close: Option<u16>,
    media: Option<Media>,
}

impl VoiceSession {
    /// Create a session without starting it.
    #[must_use]
    pub fn new(
        info: VoiceConnectInfo,
        config: VoiceConfig,
    ) -> (Self, VoiceHandle, mpsc::UnboundedReceiver<VoiceEvent>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(VoiceSnapshot::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let cancel = CancellationToken::new();
        let key = KeySlot::default();

        let handle = VoiceHandle {
            guild_id: info.guild_id,
            commands: commands_tx,
            snapshot: snapshot_rx,
            key: key.clone(),
            cancel: cancel.clone(),
        };
        let session = Self {
            backoff: Backoff::new(config.backoff_base, config.backoff_max),
            info,
            config,
            snapshot: snapshot_tx,
            key,
            events: events_tx,
            commands: commands_rx,
            commands_open: true,
            cancel,
            attempts: 0,
            last_close: None,
            media: None,
        };
        (session, handle, events_rx)
    }

    /// Create a session and run it on a new task.
    #[must_use]
    pub fn spawn(
        info: VoiceConnectInfo,
        config: VoiceConfig,
    ) -> (
        VoiceHandle,
        mpsc::UnboundedReceiver<VoiceEvent>,
        JoinHandle<VoiceResult<()>>,
    ) {
        let (session, handle, events) = Self::new(info, config);
        let task = tokio::spawn(session.run());
        (handle, events, task)
    }

    /// Run until closed or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session: a handshake failure,
    /// unsupported mode, fatal close code or exhausted reconnects.
    pub async fn run(mut self) -> VoiceResult<()> {
        let guild = self.info.guild_id;
        let result = self.run_loop().await;

        self.media = None;
        self.key.clear();
        self.snapshot.send_modify(|s| {
            s.clear_negotiated();
            s.state = VoiceState::Disconnected;
        });

        match &result {
            Ok(()) => info!(%guild, "Voice session closed"),
            Err(e) => {
                error!(%guild, error = %e, "Voice session ended");
                let _ = self.events.send(VoiceEvent::Disconnected {
                    code: self.last_close,
                    fatal: true,
                });
            },
        }
        result
    }

    async fn run_loop(&mut self) -> VoiceResult<()> {
        loop {
            let action = match self.connect_and_run().await {
                Ok(action) => action,
                Err(VoiceError::Shutdown) => Action::Shutdown,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(guild = %self.info.guild_id, error = %e, "Voice connection error");
                    if self.media.is_some() {
                        Action::Resume
                    } else {
                        Action::Restart
                    }
                },
            };
            if action == Action::Shutdown {
                return Ok(());
            }

            if self.snapshot.borrow().state == VoiceState::Connected {
                let _ = self.events.send(VoiceEvent::Disconnected {
                    code: self.last_close,
                    fatal: false,
                });
            }
            self.last_close = None;

            if action == Action::Restart || self.media.is_none() {
                self.media = None;
                self.key.clear();
                self.snapshot.send_modify(VoiceSnapshot::clear_negotiated);
            }
            self.set_state(VoiceState::Connecting);

            self.attempts = self.attempts.saturating_add(1);
            if self.attempts > self.config.max_reconnect_attempts {
                return Err(VoiceError::MaxReconnects(self.config.max_reconnect_attempts));
            }
            let delay = self.backoff.next_delay();
            info!(
                guild = %self.info.guild_id,
                ?action,
                attempt = self.attempts,
                delay_ms = delay.as_millis(),
                "Reconnecting voice"
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {},
            }
        }
    }

    fn set_state(&self, state: VoiceState) {
        self.snapshot.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            debug!(guild = %self.info.guild_id, from = ?s.state, to = ?state, "Voice state");
            s.state = state;
            true
        });
    }

    fn on_connected(&mut self) {
        self.set_state(VoiceState::Connected);
        self.backoff.reset();
        self.attempts = 0;
    }

    async fn connect_and_run(&mut self) -> VoiceResult<Action> {
        self.set_state(VoiceState::Connecting);
        let url = protocol::connect_url(&self.info.endpoint)?;

        let (ws_writer, mut reader) = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(VoiceError::Shutdown),
            conn = connection::connect(&url, self.config.connect_timeout) => conn?,
        };
        let interval = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(VoiceError::Shutdown),
            hello = connection::wait_for_hello(&mut reader, self.config.hello_timeout) => hello?,
        };

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut writer_task = tokio::spawn(connection::run_writer(ws_writer, out_rx));

        let hb_state = Arc::new(Mutex::new(HeartbeatState::new(interval)));
        let (zombie_tx, zombie_rx) = oneshot::channel();
        let beat_cancel = self.cancel.child_token();
        let heartbeat_task = tokio::spawn(connection::run_heartbeat(
            Arc::clone(&hb_state),
            out_tx.clone(),
            zombie_tx,
            beat_cancel.clone(),
        ));

        let handshake = if self.media.is_some() {
            self.resume(&mut reader, &out_tx, &hb_state).await
        } else {
            self.handshake(&mut reader, &out_tx, &hb_state).await
        };
        let action = match handshake {
            Ok(()) => self.event_loop(&mut reader, &out_tx, &hb_state, zombie_rx).await,
            Err(e) => Err(e),
        };

        beat_cancel.cancel();
        heartbeat_task.abort();

        if matches!(action, Ok(Action::Shutdown)) {
            self.set_state(VoiceState::Disconnecting);
        }
        let code = match &action {
            Ok(Action::Shutdown | Action::Restart) | Err(_) => NORMAL_CLOSE,
            Ok(Action::Resume) => RESUME_CLOSE,
        };
        let _ = out_tx.try_send(Outbound::Close(code));
        drop(out_tx);
        tokio::select! {
            _ = &mut writer_task => {},
            () = tokio::time::sleep(Duration::from_secs(2)) => writer_task.abort(),
        }

        action
    }

    /// Identify, discover, select protocol, receive the key.
    async fn handshake(
        &mut self,
        reader: &mut WsReader,
        out: &mpsc::Sender<Outbound>,
        hb: &Arc<Mutex<HeartbeatState>>,
    ) -> VoiceResult<()> {
        let guild = self.info.guild_id;
        let identify = VoiceFrame::new(
            opcode::IDENTIFY,
            &Identify {
                server_id: guild,
                user_id: self.info.user_id,
                session_id: &self.info.session_id,
                token: self.info.token.expose(),
            },
        )?;
        send(out, identify).await?;

        let ready = self
            .await_message(reader, hb, "voice READY", |msg| match msg {
                VoiceMessage::Ready(ready) => Ok(ready),
                other => Err(other),
            })
            .await?;
        info!(%guild, ssrc = ready.ssrc, ip = %ready.ip, port = ready.port, "Voice READY");
        self.set_state(VoiceState::SelectingProtocol);

        let mode = EncryptionMode::negotiate(&self.config.modes, &ready.modes)?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((ready.ip.as_str(), ready.port)).await?;
        let remote = socket.peer_addr()?;
        self.snapshot.send_modify(|s| {
            s.ssrc = Some(ready.ssrc);
            s.remote = Some(remote);
        });

        let external = discovery::discover(
            &socket,
            ready.ssrc,
            self.config.discovery_timeout,
            self.config.discovery_attempts,
        )
        .await?;

        let select = VoiceFrame::new(
            opcode::SELECT_PROTOCOL,
            &SelectProtocol {
                protocol: "udp",
                data: SelectProtocolData {
                    address: external.ip.clone(),
                    port: external.port,
                    mode,
                },
            },
        )?;
        send(out, select).await?;
        debug!(%guild, %mode, address = %external.ip, port = external.port, "Protocol selected");
        self.snapshot.send_modify(|s| s.external = Some(external));

        let description = match self
            .await_message(reader, hb, "session description", |msg| match msg {
                VoiceMessage::SessionDescription(desc) => Ok(desc),
                other => Err(other),
            })
            .await
        {
            Err(VoiceError::Timeout(what)) => {
                return Err(VoiceError::HandshakeFailed(format!("timed out waiting for {what}")));
            },
            other => other?,
        };
        self.apply_description(&description.mode, &description.secret_key)?;
        self.set_state(VoiceState::Ready);

        let socket = Arc::new(socket);
        let (rt_tx, rt_rx) = oneshot::channel();
        let (failed_tx, failed_rx) = oneshot::channel();
        let cancel = self.cancel.child_token();
        let keepalive_cancel = cancel.clone();
        let config = self.config.keepalive;
        let task = tokio::spawn(async move {
            if let Err(e) = keepalive::run_keepalive(socket, config, rt_tx, keepalive_cancel).await {
                let _ = failed_tx.send(e);
            }
        });
        self.media = Some(Media {
            cancel,
            confirmed: false,
            first_round_trip: Some(rt_rx),
            failed: Some(failed_rx),
            task,
        });
        Ok(())
    }

    /// Resume the voice socket, keeping key and UDP path.
    async fn resume(
        &mut self,
        reader: &mut WsReader,
        out: &mpsc::Sender<Outbound>,
        hb: &Arc<Mutex<HeartbeatState>>,
    ) -> VoiceResult<()> {
        let frame = VoiceFrame::new(
            opcode::RESUME,
            &Resume {
                server_id: self.info.guild_id,
                session_id: &self.info.session_id,
                token: self.info.token.expose(),
            },
        )?;
        send(out, frame).await?;

        let result = self
            .await_message(reader, hb, "voice RESUMED", |msg| match msg {
                VoiceMessage::Resumed => Ok(()),
                other => Err(other),
            })
            .await;
        if let Err(e) = result {
            // A failed resume falls back to a fresh handshake.
            self.media = None;
            return Err(e);
        }

        info!(guild = %self.info.guild_id, "Voice session resumed");
        let _ = self.events.send(VoiceEvent::Resumed);
        if self.media.as_ref().is_some_and(|m| m.confirmed) {
            self.on_connected();
        } else {
            self.set_state(VoiceState::Ready);
        }
        Ok(())
    }

    fn apply_description(&self, mode: &str, secret_key: &[u8]) -> VoiceResult<()> {
        let mode: EncryptionMode = mode.parse()?;
        let key = SecretKey::try_from(secret_key)?;
        debug!(guild = %self.info.guild_id, %mode, "Session key received");
        self.key.set(key);
        self.snapshot.send_modify(|s| {
            s.mode = Some(mode);
            s.has_key = true;
        });
        Ok(())
    }

    /// Read until `pick` accepts a message, answering acks on the way.
    async fn await_message<T>(
        &mut self,
        reader: &mut WsReader,
        hb: &Arc<Mutex<HeartbeatState>>,
        what: &'static str,
        mut pick: impl FnMut(VoiceMessage) -> Result<T, VoiceMessage>,
    ) -> VoiceResult<T> {
        let deadline = tokio::time::sleep(self.config.ready_timeout);
        tokio::pin!(deadline);

        loop {
            let msg = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(VoiceError::Shutdown),
                () = &mut deadline => return Err(VoiceError::Timeout(what)),
                msg = reader.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => match VoiceMessage::decode(text.as_str()) {
                    Ok(VoiceMessage::HeartbeatAck(_)) => self.record_ack(hb).await,
                    Ok(message) => match pick(message) {
                        Ok(found) => return Ok(found),
                        Err(other) => {
                            debug!(message = ?other, waiting_for = what, "Skipping voice frame");
                        },
                    },
                    Err(e) => warn!(error = %e, "Dropping malformed voice frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map_or(NORMAL_CLOSE, |f| u16::from(f.code));
                    self.last_close = Some(code);
                    return Err(if close_code::is_fatal(code) {
                        VoiceError::FatalClose(code)
                    } else {
                        VoiceError::Protocol(format!("closed with {code} while waiting for {what}"))
                    });
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => return Err(e.into()),
                None => return Err(VoiceError::Protocol(format!("closed while waiting for {what}"))),
            }
        }
    }

    async fn record_ack(&self, hb: &Arc<Mutex<HeartbeatState>>) {
        let latency = hb.lock().await.ack(Instant::now());
        self.snapshot.send_modify(|s| s.latency = latency);
    }

    async fn event_loop(
        &mut self,
        reader: &mut WsReader,
        out: &mpsc::Sender<Outbound>,
        hb: &Arc<Mutex<HeartbeatState>>,
        mut zombie_rx: oneshot::Receiver<()>,
    ) -> VoiceResult<Action> {
        let guild = self.info.guild_id;
        loop {
            let (first_rt, failed) = match self.media.as_mut() {
                Some(media) => (&mut media.first_round_trip, &mut media.failed),
                None => return Ok(Action::Restart),
            };

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return Ok(Action::Shutdown),

                Ok(()) = &mut zombie_rx => {
                    warn!(%guild, error = %VoiceError::Zombied, "Reconnecting voice");
                    return Ok(Action::Resume);
                },

                Some(e) = take_once(failed) => {
                    warn!(%guild, error = %e, "Voice media path lost, starting a fresh handshake");
                    return Ok(Action::Restart);
                },

                Some(()) = take_once(first_rt) => {
                    if let Some(media) = self.media.as_mut() {
                        media.confirmed = true;
                    }
                    self.on_connected();
                    let ssrc = self.snapshot.borrow().ssrc.unwrap_or_default();
                    info!(%guild, ssrc, "Voice connected");
                    let _ = self.events.send(VoiceEvent::Connected { ssrc });
                },

                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(Command::Speaking { flags, delay }) => self.send_speaking(out, flags, delay).await?,
                    None => self.commands_open = false,
                },

                msg = reader.next() => match msg {
                    Some(Ok(Message::Text(text))) => match VoiceMessage::decode(text.as_str()) {
                        Ok(message) => self.handle_message(message, hb).await?,
                        Err(e) => warn!(%guild, error = %e, "Dropping malformed voice frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let Some(code) = frame.map(|f| u16::from(f.code)) else {
                            return Ok(Action::Resume);
                        };
                        self.last_close = Some(code);
                        if close_code::is_fatal(code) {
                            error!(%guild, code, "Fatal voice close code");
                            return Err(VoiceError::FatalClose(code));
                        }
                        if code == close_code::SESSION_TIMEOUT {
                            info!(%guild, code, "Voice session timed out, starting over");
                            return Ok(Action::Restart);
                        }
                        warn!(%guild, code, "Voice socket closed, will resume");
                        return Ok(Action::Resume);
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        warn!(%guild, error = %e, "Voice socket read error");
                        return Ok(Action::Resume);
                    },
                    None => return Ok(Action::Resume),
                },
            }
        }
    }

    async fn handle_message(
        &mut self,
        message: VoiceMessage,
        hb: &Arc<Mutex<HeartbeatState>>,
    ) -> VoiceResult<()> {
        match message {
            VoiceMessage::HeartbeatAck(_) => self.record_ack(hb).await,
            VoiceMessage::Speaking(update) => {
                let _ = self.events.send(VoiceEvent::Speaking(update));
            },
            VoiceMessage::ClientDisconnect { user_id } => {
                let _ = self.events.send(VoiceEvent::ClientDisconnect { user_id });
            },
            VoiceMessage::SessionDescription(desc) => {
                self.apply_description(&desc.mode, &desc.secret_key)?;
            },
            other => debug!(guild = %self.info.guild_id, message = ?other, "Ignoring voice frame"),
        }
        Ok(())
    }

    async fn send_speaking(&self, out: &mpsc::Sender<Outbound>, flags: u32, delay: u32) -> VoiceResult<()> {
        let Some(ssrc) = self.snapshot.borrow().ssrc else {
            return Ok(());
        };
        let frame = VoiceFrame::new(
            opcode::SPEAKING,
            &Speaking {
                speaking: flags,
                delay,
                ssrc,
            },
        )?;
        send(out, frame).await?;
        self.snapshot.send_modify(|s| s.speaking = flags != 0);
        Ok(())
    }
}

async fn send(out: &mpsc::Sender<Outbound>, frame: VoiceFrame) -> VoiceResult<()> {
    out.send(Outbound::Frame(frame))
        .await
        .map_err(|_| VoiceError::Protocol("voice writer closed".into()))
}
