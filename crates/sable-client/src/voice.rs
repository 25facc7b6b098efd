//! Voice connections owned by the supervisor.
//!
//! A join registers a pending entry, then the shard router fills it from
//! VOICE_STATE_UPDATE (our session id) and VOICE_SERVER_UPDATE (token and
//! endpoint). Once both are in, the entry becomes an active
//! [`VoiceSession`]. A later server update for an active guild restarts
//! the session against the new endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use sable_core::{Snowflake, Token};
use sable_gateway::{VoiceServerUpdate, VoiceState};
use sable_voice::{VoiceConfig, VoiceConnectInfo, VoiceEvent, VoiceHandle, VoiceResult, VoiceSession};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientResult;
use crate::handler::LifecycleEvent;

/// What the gateway told us about a voice connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoinDetails {
    pub(crate) session_id: String,
    pub(crate) token: String,
    pub(crate) endpoint: String,
}

#[derive(Debug)]
struct PendingJoin {
    session_id: Option<String>,
    server: Option<(String, String)>,
    done: Option<oneshot::Sender<JoinDetails>>,
}

impl PendingJoin {
    fn try_complete(&mut self) {
        let (Some(session_id), Some((token, endpoint))) = (&self.session_id, &self.server) else {
            return;
        };
        if let Some(done) = self.done.take() {
            let _ = done.send(JoinDetails {
                session_id: session_id.clone(),
                token: token.clone(),
                endpoint: endpoint.clone(),
            });
        }
    }
}

#[derive(Debug)]
pub(crate) struct ActiveVoice {
    generation: u64,
    info: VoiceConnectInfo,
    handle: VoiceHandle,
    session: JoinHandle<VoiceResult<()>>,
    forwarder: JoinHandle<()>,
    /// Set when a newer session replaces this one.
    retired: CancellationToken,
}

impl ActiveVoice {
    /// Ask the session to stop without waiting.
    pub(crate) fn close(&self) {
        self.handle.close();
    }

    /// Close and wait for both tasks.
    pub(crate) async fn shutdown(self) {
        self.handle.close();
        if let Err(e) = self.session.await {
            debug!(guild = %self.info.guild_id, error = %e, "Voice task join failed");
        }
        let _ = self.forwarder.await;
    }
}

#[derive(Debug)]
enum VoiceSlot {
    Pending(PendingJoin),
    Active(ActiveVoice),
}

/// Where voice forwarders report to.
pub(crate) trait LifecycleSink: Send + Sync + 'static {
    /// Deliver a lifecycle event on the guild's shard.
    fn emit_for_guild(&self, guild: Snowflake, event: LifecycleEvent);

    /// A session's task finished; forget it unless it was replaced.
    fn voice_ended(&self, guild: Snowflake, generation: u64);
}

/// Voice connections by guild.
#[derive(Debug)]
pub(crate) struct VoiceRegistry {
    config: VoiceConfig,
    slots: DashMap<Snowflake, VoiceSlot>,
    generation: AtomicU64,
}

impl VoiceRegistry {
    pub(crate) fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Register a join, replacing whatever the guild had.
    pub(crate) fn begin_join(&self, guild: Snowflake) -> (oneshot::Receiver<JoinDetails>, Option<ActiveVoice>) {
        let (tx, rx) = oneshot::channel();
        let pending = VoiceSlot::Pending(PendingJoin {
            session_id: None,
            server: None,
            done: Some(tx),
        });
        let previous = match self.slots.insert(guild, pending) {
            Some(VoiceSlot::Active(active)) => Some(active),
            _ => None,
        };
        (rx, previous)
    }

    /// Drop a pending join that never completed.
    pub(crate) fn abandon_join(&self, guild: Snowflake) {
        self.slots
            .remove_if(&guild, |_, slot| matches!(slot, VoiceSlot::Pending(_)));
    }

    /// Remove the guild's entry, returning its session if one was running.
    pub(crate) fn remove(&self, guild: Snowflake) -> Option<ActiveVoice> {
        match self.slots.remove(&guild) {
            Some((_, VoiceSlot::Active(active))) => Some(active),
            _ => None,
        }
    }

    /// Remove every entry.
    pub(crate) fn drain(&self) -> Vec<ActiveVoice> {
        let guilds: Vec<Snowflake> = self.slots.iter().map(|entry| *entry.key()).collect();
        guilds.into_iter().filter_map(|guild| self.remove(guild)).collect()
    }

    /// Handle of the guild's running session.
    pub(crate) fn handle(&self, guild: Snowflake) -> Option<VoiceHandle> {
        match self.slots.get(&guild).as_deref() {
            Some(VoiceSlot::Active(active)) => Some(active.handle.clone()),
            _ => None,
        }
    }

    /// Start a session from completed join details.
    pub(crate) fn activate(
        &self,
        guild: Snowflake,
        user_id: Snowflake,
        details: JoinDetails,
        sink: Arc<dyn LifecycleSink>,
    ) -> ClientResult<VoiceHandle> {
        let info = VoiceConnectInfo {
            guild_id: guild,
            user_id,
            session_id: details.session_id,
            endpoint: details.endpoint,
            token: Token::bearer(details.token)?,
        };
        let active = self.start(info, sink);
        let handle = active.handle.clone();
        self.slots.insert(guild, VoiceSlot::Active(active));
        Ok(handle)
    }

    fn start(&self, info: VoiceConnectInfo, sink: Arc<dyn LifecycleSink>) -> ActiveVoice {
        let guild = info.guild_id;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        info!(%guild, endpoint = %info.endpoint, "Starting voice session");

        let (handle, events, session) = VoiceSession::spawn(info.clone(), self.config.clone());
        let retired = CancellationToken::new();
        let forwarder = tokio::spawn(forward_voice_events(guild, generation, events, retired.clone(), sink));
        ActiveVoice {
            generation,
            info,
            handle,
            session,
            forwarder,
            retired,
        }
    }

    /// Forget the guild's session if it is still `generation`.
    pub(crate) fn release(&self, guild: Snowflake, generation: u64) {
        self.slots.remove_if(&guild, |_, slot| {
            matches!(slot, VoiceSlot::Active(active) if active.generation == generation)
        });
    }

    /// Feed a VOICE_STATE_UPDATE.
    ///
    /// Returns a session the caller should shut down, if our user was
    /// removed from the channel.
    pub(crate) fn on_voice_state(&self, user_id: Snowflake, state: &VoiceState) -> Option<ActiveVoice> {
        if state.user_id != user_id {
            return None;
        }
        let guild = state.guild_id?;
        let left = {
            let mut slot = self.slots.get_mut(&guild)?;
            match &mut *slot {
                VoiceSlot::Pending(pending) => {
                    if state.channel_id.is_some() {
                        pending.session_id = Some(state.session_id.clone());
                        pending.try_complete();
                    }
                    false
                },
                VoiceSlot::Active(_) => state.channel_id.is_none(),
            }
        };
        if left {
            info!(%guild, "Removed from voice channel");
            self.remove(guild)
        } else {
            None
        }
    }

    /// Feed a VOICE_SERVER_UPDATE.
    ///
    /// Returns the replaced session when the update moved an active guild
    /// to a new endpoint.
    pub(crate) fn on_voice_server(
        &self,
        update: &VoiceServerUpdate,
        sink: &Arc<dyn LifecycleSink>,
    ) -> Option<ActiveVoice> {
        let guild = update.guild_id;
        let Some(endpoint) = update.endpoint.clone() else {
            debug!(%guild, "Voice server is being reallocated");
            return None;
        };
        let mut slot = self.slots.get_mut(&guild)?;
        match &mut *slot {
            VoiceSlot::Pending(pending) => {
                pending.server = Some((update.token.clone(), endpoint));
                pending.try_complete();
                None
            },
            VoiceSlot::Active(active) => {
                let token = match Token::bearer(&update.token) {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(%guild, error = %e, "Ignoring voice server update");
                        return None;
                    },
                };
                info!(%guild, from = %active.info.endpoint, to = %endpoint, "Voice server moved");
                let info = VoiceConnectInfo {
                    endpoint,
                    token,
                    ..active.info.clone()
                };
                let replacement = self.start(info, Arc::clone(sink));
                let old = std::mem::replace(active, replacement);
                old.retired.cancel();
                Some(old)
            },
        }
    }
}

async fn forward_voice_events(
    guild: Snowflake,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<VoiceEvent>,
    retired: CancellationToken,
    sink: Arc<dyn LifecycleSink>,
) {
    let mut fatal = false;
    while let Some(event) = events.recv().await {
        match event {
            VoiceEvent::Connected { ssrc } => {
                sink.emit_for_guild(guild, LifecycleEvent::VoiceConnected { guild, ssrc });
            },
            VoiceEvent::Disconnected { fatal: true, .. } => fatal = true,
            other => debug!(%guild, event = ?other, "Voice event"),
        }
    }
    if !retired.is_cancelled() {
        sink.voice_ended(guild, generation);
        sink.emit_for_guild(guild, LifecycleEvent::VoiceDisconnected { guild, fatal });
    }
}
