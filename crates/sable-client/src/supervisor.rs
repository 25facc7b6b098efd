//! Connection supervisor: one gateway session per shard, event routing,
//! and voice connections.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use sable_config::ClientConfig;
use sable_core::{Snowflake, Token};
use sable_gateway::{
    DispatchEvent, GatewayHandle, GatewayResult, GatewaySession, SessionEvent, SessionState,
    ShardId, UpdateVoiceState,
};
use sable_http::{HttpTransport, RestDispatcher};
use sable_voice::VoiceHandle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge;
use crate::error::{ClientError, ClientResult};
use crate::handler::{EventHandler, LifecycleEvent, PumpItem, run_pump};
use crate::voice::{LifecycleSink, VoiceRegistry};

/// Lifecycle broadcast capacity.
const LIFECYCLE_CAPACITY: usize = 256;

// ── Shared state ─────────────────────────────────────────────

/// State reachable from routers and voice forwarders.
struct Shared {
    shard_count: u32,
    user: OnceLock<Snowflake>,
    voice: VoiceRegistry,
    join_timeout: Duration,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    pumps: Vec<mpsc::UnboundedSender<PumpItem>>,
}

impl Shared {
    fn shard_of(&self, guild: Snowflake) -> ShardId {
        ShardId::new(guild.shard_index(self.shard_count), self.shard_count)
    }

    fn deliver(&self, shard: ShardId, item: PumpItem) {
        let pump = usize::try_from(shard.id)
            .ok()
            .and_then(|index| self.pumps.get(index));
        if let Some(pump) = pump {
            let _ = pump.send(item);
        }
    }

    fn emit(&self, shard: ShardId, event: LifecycleEvent) {
        debug!(%shard, event = ?event, "Lifecycle");
        let _ = self.lifecycle.send(event.clone());
        self.deliver(shard, PumpItem::Lifecycle(event));
    }
}

impl LifecycleSink for Shared {
    fn emit_for_guild(&self, guild: Snowflake, event: LifecycleEvent) {
        self.emit(self.shard_of(guild), event);
    }

    fn voice_ended(&self, guild: Snowflake, generation: u64) {
        self.voice.release(guild, generation);
    }
}

/// Turn one shard's session events into lifecycle events, voice
/// bookkeeping and pump work.
async fn route_events(
    shared: Arc<Shared>,
    shard: ShardId,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    let sink: Arc<dyn LifecycleSink> = Arc::clone(&shared) as Arc<dyn LifecycleSink>;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected {
                session_id,
                user_id,
            } => {
                let _ = shared.user.set(user_id);
                shared.emit(shard, LifecycleEvent::Connected { shard, session_id });
            },
            SessionEvent::Resumed => shared.emit(shard, LifecycleEvent::Resumed { shard }),
            SessionEvent::Disconnected { code, fatal } => {
                shared.emit(shard, LifecycleEvent::Disconnected { shard, code, fatal });
            },
            SessionEvent::Dispatch { event, .. } => {
                let replaced = match &event {
                    DispatchEvent::VoiceStateUpdate(state) => shared
                        .user
                        .get()
                        .and_then(|user| shared.voice.on_voice_state(*user, state)),
                    DispatchEvent::VoiceServerUpdate(update) => {
                        shared.voice.on_voice_server(update, &sink)
                    },
                    _ => None,
                };
                if let Some(old) = replaced {
                    tokio::spawn(old.shutdown());
                }
                shared.deliver(shard, PumpItem::Dispatch(event));
            },
        }
    }
    debug!(%shard, "Event router stopped");
}

// ── Builder ──────────────────────────────────────────────────

/// Configures and starts a [`ConnectionSupervisor`].
pub struct SupervisorBuilder {
    config: ClientConfig,
    token: Option<Token>,
    handlers: Vec<Arc<dyn EventHandler>>,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl SupervisorBuilder {
    /// Builder over `config`.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            token: None,
            handlers: Vec::new(),
            transport: None,
        }
    }

    /// Use `token` instead of reading the configured environment variable.
    #[must_use]
    pub fn token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Add an event handler. Handlers run in registration order.
    #[must_use]
    pub fn handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Add an event handler the caller keeps a reference to.
    #[must_use]
    pub fn shared_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Send REST requests through `transport` instead of `reqwest`.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate the configuration, resolve the shard layout and start every
    /// shard.
    ///
    /// The gateway URL and shard count come from the configuration; if
    /// either is unset, `GET /gateway/bot` supplies it along with the
    /// identify concurrency.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Config`] for invalid configuration or a missing
    ///   token
    /// - [`ClientError::Core`] for a blank token
    /// - [`ClientError::Rest`] if `/gateway/bot` is needed and fails
    pub async fn start(self) -> ClientResult<ConnectionSupervisor> {
        let config = self.config;
        config.validate()?;
        let token = match self.token {
            Some(token) => token,
            None => Token::bot(config.resolve_token()?)?,
        };

        let rest_config = bridge::dispatcher_config(&config.rest);
        let rest = Arc::new(match self.transport {
            Some(transport) => RestDispatcher::with_transport(token.clone(), rest_config, transport),
            None => RestDispatcher::new(token.clone(), rest_config)?,
        });

        let section = &config.gateway;
        let (url, shard_count, max_concurrency) = match (&section.url, section.shard_count) {
            (Some(url), Some(count)) => (url.clone(), count, 1),
            (url, count) => {
                let bot = rest.gateway_bot().await?;
                info!(
                    url = %bot.url,
                    shards = bot.shards,
                    remaining = bot.session_start_limit.remaining,
                    max_concurrency = bot.session_start_limit.max_concurrency,
                    "Fetched gateway info"
                );
                let count = count.unwrap_or(bot.shards).max(1);
                if bot.session_start_limit.remaining < count {
                    warn!(
                        remaining = bot.session_start_limit.remaining,
                        shards = count,
                        reset_after_ms = bot.session_start_limit.reset_after,
                        "Not enough session starts left for every shard"
                    );
                }
                (
                    url.clone().unwrap_or(bot.url),
                    count,
                    bot.session_start_limit.max_concurrency,
                )
            },
        };

        let voice_config = bridge::voice_config(&config.voice)?;
        let gateway_config = bridge::gateway_config(section, url);
        let gate = bridge::identify_gate(section, max_concurrency);

        let (pumps, queues): (Vec<_>, Vec<_>) =
            (0..shard_count).map(|_| mpsc::unbounded_channel()).unzip();
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        let shared = Arc::new(Shared {
            shard_count,
            user: OnceLock::new(),
            voice: VoiceRegistry::new(voice_config),
            join_timeout: Duration::from_millis(config.voice.join_timeout_ms),
            lifecycle,
            pumps,
        });
        let handlers: Arc<[Arc<dyn EventHandler>]> = Arc::from(self.handlers);

        info!(shards = shard_count, url = %gateway_config.url, "Starting shards");
        let shards = (0..shard_count)
            .zip(queues)
            .map(|(id, queue)| {
                let shard = ShardId::new(id, shard_count);
                let (handle, events, session) =
                    GatewaySession::spawn(token.clone(), shard, gateway_config.clone(), gate.clone());
                ShardRunner {
                    handle,
                    session,
                    router: tokio::spawn(route_events(Arc::clone(&shared), shard, events)),
                    pump: tokio::spawn(run_pump(shard, Arc::clone(&handlers), queue)),
                }
            })
            .collect();

        Ok(ConnectionSupervisor {
            shared,
            rest,
            shards,
        })
    }
}

// ── Supervisor ───────────────────────────────────────────────

struct ShardRunner {
    handle: GatewayHandle,
    session: JoinHandle<GatewayResult<()>>,
    router: JoinHandle<()>,
    pump: JoinHandle<()>,
}

/// Owns every shard's gateway session and the voice connections made
/// through them.
pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
    rest: Arc<RestDispatcher>,
    shards: Vec<ShardRunner>,
}

impl ConnectionSupervisor {
    /// Start configuring a supervisor.
    #[must_use]
    pub fn builder(config: ClientConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(config)
    }

    /// The REST dispatcher shared with the supervisor.
    #[must_use]
    pub fn rest(&self) -> &Arc<RestDispatcher> {
        &self.rest
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shared.shard_count
    }

    /// The shard that receives events for `guild`.
    #[must_use]
    pub fn shard_for(&self, guild: Snowflake) -> ShardId {
        self.shared.shard_of(guild)
    }

    /// Handle for shard `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownShard`] if `id` is out of range.
    pub fn shard(&self, id: u32) -> ClientResult<&GatewayHandle> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.shards.get(index))
            .map(|runner| &runner.handle)
            .ok_or(ClientError::UnknownShard(id))
    }

    /// Our user id, once any shard has received READY.
    #[must_use]
    pub fn user_id(&self) -> Option<Snowflake> {
        self.shared.user.get().copied()
    }

    /// Lifecycle events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.lifecycle.subscribe()
    }

    /// Wait until every shard is connected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Gateway`] if a shard stops first.
    pub async fn wait_until_connected(&self) -> ClientResult<()> {
        for runner in &self.shards {
            runner.handle.wait_for_state(SessionState::Connected).await?;
        }
        Ok(())
    }

    /// Handle of the guild's voice session, if one is running.
    #[must_use]
    pub fn voice(&self, guild: Snowflake) -> Option<VoiceHandle> {
        self.shared.voice.handle(guild)
    }

    /// Join a voice channel and start the voice session.
    ///
    /// Sends a voice state update on the guild's shard, then waits for the
    /// gateway to deliver both our voice state (session id) and the voice
    /// server (token and endpoint). Any existing session for the guild is
    /// closed first. The returned handle reports `Connected` once the media
    /// path is up.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotReady`] before any READY
    /// - [`ClientError::VoiceJoinTimeout`] if the updates do not arrive in
    ///   time
    /// - [`ClientError::VoiceJoinSuperseded`] if another join or a leave
    ///   for the guild happened meanwhile
    /// - [`ClientError::Gateway`] if the shard has stopped
    pub async fn join_voice(
        &self,
        guild: Snowflake,
        channel: Snowflake,
        self_mute: bool,
        self_deaf: bool,
    ) -> ClientResult<VoiceHandle> {
        let shard = self.shard_for(guild);
        let gateway = self.shard(shard.id)?;
        let user = self.user_id().ok_or(ClientError::NotReady)?;

        let (details, previous) = self.shared.voice.begin_join(guild);
        if let Some(previous) = previous {
            previous.shutdown().await;
        }

        info!(%guild, %channel, %shard, "Joining voice channel");
        let update = UpdateVoiceState {
            guild_id: guild,
            channel_id: Some(channel),
            self_mute,
            self_deaf,
        };
        if let Err(e) = gateway.update_voice_state(&update).await {
            self.shared.voice.abandon_join(guild);
            return Err(e.into());
        }

        let details = match tokio::time::timeout(self.shared.join_timeout, details).await {
            Ok(Ok(details)) => details,
            Ok(Err(_)) => return Err(ClientError::VoiceJoinSuperseded(guild)),
            Err(_) => {
                self.shared.voice.abandon_join(guild);
                warn!(%guild, "Voice join timed out");
                return Err(ClientError::VoiceJoinTimeout {
                    guild,
                    timeout: self.shared.join_timeout,
                });
            },
        };

        let sink: Arc<dyn LifecycleSink> = Arc::clone(&self.shared) as Arc<dyn LifecycleSink>;
        self.shared.voice.activate(guild, user, details, sink)
    }

    /// Leave the guild's voice channel and close its voice session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Gateway`] if the shard has stopped; the
    /// voice session is closed regardless.
    pub async fn leave_voice(&self, guild: Snowflake) -> ClientResult<()> {
        let shard = self.shard_for(guild);
        let active = self.shared.voice.remove(guild);
        info!(%guild, %shard, "Leaving voice channel");

        let update = UpdateVoiceState {
            guild_id: guild,
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        };
        let sent = match self.shard(shard.id) {
            Ok(gateway) => gateway.update_voice_state(&update).await.map_err(ClientError::from),
            Err(e) => Err(e),
        };
        if let Some(active) = active {
            active.shutdown().await;
        }
        sent
    }

    /// Close every voice session and shard, then drain the handlers.
    pub async fn shutdown(mut self) {
        info!(shards = self.shards.len(), "Shutting down");
        for voice in self.shared.voice.drain() {
            voice.shutdown().await;
        }
        for runner in &self.shards {
            runner.handle.close();
        }

        for runner in std::mem::take(&mut self.shards) {
            let shard = runner.handle.shard();
            match runner.session.await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => debug!(%shard, error = %e, "Shard had already failed"),
                Err(e) => warn!(%shard, error = %e, "Shard task join failed"),
            }
            let _ = runner.router.await;
            self.shared.deliver(shard, PumpItem::Stop);
            let _ = runner.pump.await;
        }
        info!("Shutdown complete");
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        for runner in &self.shards {
            runner.handle.close();
        }
        for voice in self.shared.voice.drain() {
            voice.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use sable_config::ClientConfig;
    use sable_gateway::protocol::opcode;
    use sable_test::{MockConnection, MockGateway, MockTransport, MockVoiceUdp, mock_response};
    use serde_json::{Value, json};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);
    const GUILD: u64 = 41_771_983_423_143_937;
    const CHANNEL: u64 = 555;

    fn config(gateway: Option<&MockGateway>, shards: Option<u32>) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.gateway.url = gateway.map(MockGateway::url);
        config.gateway.shard_count = shards;
        config.gateway.identify_interval_ms = 10;
        config.voice.keepalive_interval_ms = 50;
        config.voice.discovery_timeout_ms = 200;
        config.voice.join_timeout_ms = 2_000;
        config.voice.backoff_base_ms = 10;
        config.voice.backoff_max_ms = 50;
        config
    }

    async fn start(config: ClientConfig) -> ConnectionSupervisor {
        ConnectionSupervisor::builder(config)
            .token(Token::bot("secret").unwrap())
            .start()
            .await
            .unwrap()
    }

    async fn ready(conn: &mut MockConnection) -> Value {
        conn.hello(45_000).await;
        let identify = conn.expect_op(opcode::IDENTIFY).await;
        conn.dispatch(
            1,
            "READY",
            json!({"session_id": "main", "user": {"id": "42", "username": "sable"}}),
        )
        .await;
        identify
    }

    async fn next_lifecycle(rx: &mut broadcast::Receiver<LifecycleEvent>) -> LifecycleEvent {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for lifecycle event")
            .expect("lifecycle channel closed")
    }

    /// Serve the voice side of a join; returns the voice identify payload.
    async fn serve_voice(voice: &mut MockGateway, udp: &MockVoiceUdp, ssrc: u32) -> Value {
        let mut conn = voice.accept().await;
        conn.send_json(json!({"op": 8, "d": {"heartbeat_interval": 45_000.0}}))
            .await;
        let identify = conn.expect_op(0).await;
        conn.send_json(json!({"op": 2, "d": {
            "ssrc": ssrc, "ip": "127.0.0.1", "port": udp.addr().port(),
            "modes": ["xsalsa20_poly1305"],
        }}))
        .await;
        conn.expect_op(1).await;
        conn.send_json(json!({"op": 4, "d": {"mode": "xsalsa20_poly1305", "secret_key": vec![1u8; 32]}}))
            .await;
        // Keep the socket open until the test ends.
        tokio::spawn(async move {
            while conn.recv_json().await.is_some() {}
        });
        identify
    }

    async fn voice_updates(conn: &mut MockConnection, seq: u64, endpoint: &str, token: &str) {
        conn.dispatch(
            seq,
            "VOICE_STATE_UPDATE",
            json!({"guild_id": GUILD.to_string(), "channel_id": CHANNEL.to_string(), "user_id": "42", "session_id": "voice-1"}),
        )
        .await;
        conn.dispatch(
            seq.saturating_add(1),
            "VOICE_SERVER_UPDATE",
            json!({"guild_id": GUILD.to_string(), "token": token, "endpoint": endpoint}),
        )
        .await;
    }

    #[tokio::test]
    async fn shard_layout_from_gateway_bot() {
        let mut gateway = MockGateway::start().await;
        let body = json!({
            "url": gateway.url(),
            "shards": 2,
            "session_start_limit": {"total": 1000, "remaining": 999, "reset_after": 0, "max_concurrency": 2},
        })
        .to_string();
        let transport = MockTransport::new().with_response(mock_response(200, &[], &body));

        let supervisor = ConnectionSupervisor::builder(config(None, None))
            .token(Token::bot("secret").unwrap())
            .transport(Arc::new(transport.clone()))
            .start()
            .await
            .unwrap();
        assert_eq!(supervisor.shard_count(), 2);
        assert!(transport.requests()[0].request.url.ends_with("/gateway/bot"));

        let mut shards = Vec::new();
        for _ in 0..2 {
            let mut conn = gateway.accept().await;
            let identify = ready(&mut conn).await;
            shards.push(identify["d"]["shard"].clone());
        }
        shards.sort_by_key(|s| s[0].as_u64());
        assert_eq!(shards, vec![json!([0, 2]), json!([1, 2])]);

        tokio::time::timeout(WAIT, supervisor.wait_until_connected())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(supervisor.user_id(), Some(Snowflake::new(42)));
        assert!(matches!(supervisor.shard(2), Err(ClientError::UnknownShard(2))));
        supervisor.shutdown().await;
    }

    struct Forward(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl EventHandler for Forward {
        async fn dispatch(&self, _shard: ShardId, event: &DispatchEvent) {
            let _ = self.0.send(event.name().to_owned());
        }

        async fn lifecycle(&self, event: &LifecycleEvent) {
            if let LifecycleEvent::Connected { session_id, .. } = event {
                let _ = self.0.send(format!("connected:{session_id}"));
            }
        }
    }

    #[tokio::test]
    async fn handlers_see_wire_order() {
        let mut gateway = MockGateway::start().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor = ConnectionSupervisor::builder(config(Some(&gateway), Some(1)))
            .token(Token::bot("secret").unwrap())
            .handler(Forward(tx))
            .start()
            .await
            .unwrap();

        let mut conn = gateway.accept().await;
        ready(&mut conn).await;
        for (seq, name) in [(2, "GUILD_CREATE"), (3, "MESSAGE_CREATE"), (4, "TYPING_START")] {
            conn.dispatch(seq, name, json!({})).await;
        }

        let mut seen = Vec::new();
        while seen.len() < 5 {
            seen.push(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(
            seen,
            ["connected:main", "READY", "GUILD_CREATE", "MESSAGE_CREATE", "TYPING_START"]
        );
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn join_before_ready_is_refused() {
        let gateway = MockGateway::start().await;
        let supervisor = start(config(Some(&gateway), Some(1))).await;
        let result = supervisor
            .join_voice(Snowflake::new(GUILD), Snowflake::new(CHANNEL), false, false)
            .await;
        assert!(matches!(result, Err(ClientError::NotReady)));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn join_times_out_without_voice_updates() {
        let mut gateway = MockGateway::start().await;
        let mut config = config(Some(&gateway), Some(1));
        config.voice.join_timeout_ms = 100;
        let supervisor = start(config).await;

        let mut conn = gateway.accept().await;
        ready(&mut conn).await;
        supervisor.wait_until_connected().await.unwrap();

        let result = supervisor
            .join_voice(Snowflake::new(GUILD), Snowflake::new(CHANNEL), true, false)
            .await;
        assert!(matches!(result, Err(ClientError::VoiceJoinTimeout { .. })));

        let update = conn.expect_op(opcode::VOICE_STATE_UPDATE).await;
        assert_eq!(update["d"]["channel_id"], CHANNEL.to_string());
        assert_eq!(update["d"]["self_mute"], true);
        assert!(supervisor.voice(Snowflake::new(GUILD)).is_none());
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn join_migrate_and_leave_voice() {
        let mut gateway = MockGateway::start().await;
        let mut voice = MockGateway::start().await;
        let mut moved = MockGateway::start().await;
        let udp = MockVoiceUdp::start().await;
        let supervisor = start(config(Some(&gateway), Some(1))).await;
        let mut lifecycle = supervisor.subscribe();
        let guild = Snowflake::new(GUILD);

        let mut conn = gateway.accept().await;
        ready(&mut conn).await;
        supervisor.wait_until_connected().await.unwrap();
        assert!(matches!(next_lifecycle(&mut lifecycle).await, LifecycleEvent::Connected { .. }));

        let join = supervisor.join_voice(guild, Snowflake::new(CHANNEL), false, false);
        let serve = async {
            conn.expect_op(opcode::VOICE_STATE_UPDATE).await;
            voice_updates(&mut conn, 2, &voice.url(), "voice-token").await;
            serve_voice(&mut voice, &udp, 11).await
        };
        let (handle, identify) = tokio::join!(join, serve);
        let handle = handle.unwrap();
        assert_eq!(identify["d"]["session_id"], "voice-1");
        assert_eq!(identify["d"]["token"], "voice-token");
        assert_eq!(identify["d"]["user_id"], "42");
        assert_eq!(
            next_lifecycle(&mut lifecycle).await,
            LifecycleEvent::VoiceConnected { guild, ssrc: 11 }
        );
        assert_eq!(handle.guild_id(), guild);
        assert!(supervisor.voice(guild).is_some());

        // A new server update moves the session without a lifecycle drop.
        conn.dispatch(
            4,
            "VOICE_SERVER_UPDATE",
            json!({"guild_id": GUILD.to_string(), "token": "moved-token", "endpoint": moved.url()}),
        )
        .await;
        let identify = serve_voice(&mut moved, &udp, 12).await;
        assert_eq!(identify["d"]["token"], "moved-token");
        assert_eq!(identify["d"]["session_id"], "voice-1");
        assert_eq!(
            next_lifecycle(&mut lifecycle).await,
            LifecycleEvent::VoiceConnected { guild, ssrc: 12 }
        );
        assert!(handle.is_closing());

        supervisor.leave_voice(guild).await.unwrap();
        let update = conn.expect_op(opcode::VOICE_STATE_UPDATE).await;
        assert_eq!(update["d"]["channel_id"], Value::Null);
        assert_eq!(
            next_lifecycle(&mut lifecycle).await,
            LifecycleEvent::VoiceDisconnected { guild, fatal: false }
        );
        assert!(supervisor.voice(guild).is_none());
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn guilds_route_to_their_shard() {
        let gateway = MockGateway::start().await;
        let supervisor = start(config(Some(&gateway), Some(4))).await;
        let guild = Snowflake::new(GUILD);
        assert_eq!(supervisor.shard_for(guild).id, guild.shard_index(4));
        assert_eq!(supervisor.shard_for(guild).total, 4);
        supervisor.shutdown().await;
    }
}
