//! Session state published to readers.
//!
//! The receive loop is the only writer of [`SessionSnapshot`]; it publishes
//! through a `watch` channel so the heartbeat task and [`GatewayHandle`]s
//! always see a consistent copy.
//!
//! [`GatewayHandle`]: crate::GatewayHandle

use std::fmt;
use std::time::Duration;

use sable_core::Snowflake;

/// A shard's position in the shard set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardId {
    /// Zero-based shard index.
    pub id: u32,
    /// Total shard count.
    pub total: u32,
}

impl ShardId {
    /// The only shard of an unsharded client.
    pub const ONE: Self = Self { id: 0, total: 1 };

    /// Shard `id` of `total`.
    #[must_use]
    pub const fn new(id: u32, total: u32) -> Self {
        Self { id, total }
    }

    /// Returns `true` if this shard receives events for `guild`.
    #[must_use]
    pub fn handles(self, guild: Snowflake) -> bool {
        guild.shard_index(self.total) == self.id
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}]", self.id, self.total)
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Not started.
    #[default]
    Disconnected,
    /// Opening the `WebSocket` and waiting for Hello.
    Connecting,
    /// Identify sent, waiting for READY.
    Identifying,
    /// Resume sent, waiting for RESUMED.
    Resuming,
    /// Receiving events.
    Connected,
    /// Between connections.
    Reconnecting,
    /// Stopped for good.
    Closed,
}

impl SessionState {
    /// Returns `true` once the session has stopped.
    #[must_use]
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

/// Point-in-time view of a gateway session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Shard this session serves.
    pub shard: ShardId,
    /// Lifecycle state.
    pub state: SessionState,
    /// Session id from READY.
    pub session_id: Option<String>,
    /// Last accepted dispatch sequence.
    pub sequence: Option<u64>,
    /// Resume URL from READY, if it passed validation.
    pub resume_url: Option<String>,
    /// Our user id from READY.
    pub user_id: Option<Snowflake>,
    /// Heartbeat interval from the last Hello.
    pub heartbeat_interval: Option<Duration>,
    /// Round trip of the last acknowledged heartbeat.
    pub latency: Option<Duration>,
}

impl SessionSnapshot {
    /// Initial snapshot for `shard`.
    #[must_use]
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard,
            state: SessionState::Disconnected,
            session_id: None,
            sequence: None,
            resume_url: None,
            user_id: None,
            heartbeat_interval: None,
            latency: None,
        }
    }

    /// Returns `true` if the next connection should resume.
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    /// Forget the session so the next connection identifies afresh.
    pub fn clear_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
    }

    /// Accept `seq` if it advances the counter.
    ///
    /// Returns `false` for replayed sequences, which must be dropped.
    pub fn advance(&mut self, seq: u64) -> bool {
        match self.sequence {
            Some(last) if seq <= last => false,
            _ => {
                self.sequence = Some(seq);
                true
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_snapshot_is_empty() {
        let snapshot = SessionSnapshot::new(ShardId::ONE);
        assert_eq!(snapshot.state, SessionState::Disconnected);
        assert!(!snapshot.can_resume());
    }

    #[test]
    fn can_resume_needs_session_and_sequence() {
        let mut snapshot = SessionSnapshot::new(ShardId::ONE);
        snapshot.session_id = Some("abc".into());
        assert!(!snapshot.can_resume());
        snapshot.advance(1);
        assert!(snapshot.can_resume());
    }

    #[test]
    fn clear_session_keeps_user() {
        let mut snapshot = SessionSnapshot::new(ShardId::ONE);
        snapshot.session_id = Some("abc".into());
        snapshot.resume_url = Some("wss://resume.example".into());
        snapshot.user_id = Some(Snowflake::new(7));
        snapshot.advance(10);

        snapshot.clear_session();
        assert!(snapshot.session_id.is_none());
        assert!(snapshot.sequence.is_none());
        assert!(snapshot.resume_url.is_none());
        assert_eq!(snapshot.user_id, Some(Snowflake::new(7)));
    }

    #[test]
    fn sequence_is_monotonic() {
        let mut snapshot = SessionSnapshot::new(ShardId::ONE);
        assert!(snapshot.advance(5));
        assert!(!snapshot.advance(5));
        assert!(!snapshot.advance(3));
        assert!(snapshot.advance(6));
        assert_eq!(snapshot.sequence, Some(6));
    }

    #[test]
    fn shard_routing() {
        let guild = Snowflake::new(175_928_847_299_117_063);
        assert!(ShardId::new(2, 3).handles(guild));
        assert!(!ShardId::new(0, 3).handles(guild));
        assert!(ShardId::ONE.handles(guild));
        assert_eq!(ShardId::new(2, 3).to_string(), "[2/3]");
    }
}
