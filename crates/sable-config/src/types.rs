//! Configuration types.
//!
//! Durations are plain integers with their unit in the field name so the
//! TOML stays readable. Every struct implements [`Default`], so a bare
//! `[section]` header produces a working configuration.

use serde::{Deserialize, Serialize};

pub use sable_telemetry::LogConfig;

// ---------------------------------------------------------------------------
// Top-level ClientConfig
// ---------------------------------------------------------------------------

/// Root configuration for a Sable client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Environment variable holding the bot token.
    pub token_env: String,
    /// REST dispatch.
    pub rest: RestSection,
    /// Gateway sessions and sharding.
    pub gateway: GatewaySection,
    /// Voice connections.
    pub voice: VoiceSection,
    /// Logging.
    pub logging: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            rest: RestSection::default(),
            gateway: GatewaySection::default(),
            voice: VoiceSection::default(),
            logging: LogConfig::default(),
        }
    }
}

fn default_token_env() -> String {
    "SABLE_TOKEN".to_owned()
}

// ---------------------------------------------------------------------------
// RestSection
// ---------------------------------------------------------------------------

/// Behavior when a rate limit is exhausted before sending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitModeSection {
    /// Sleep until the window resets.
    #[default]
    Wait,
    /// Fail the request immediately.
    FailFast,
}

/// REST dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSection {
    /// API base URL without the version segment.
    pub base_url: String,
    /// API version appended as `/v{n}`.
    pub api_version: u8,
    /// `User-Agent` override.
    pub user_agent: Option<String>,
    /// Per-request network timeout.
    pub timeout_secs: u64,
    /// Aggregate requests per second (0 = unlimited).
    pub global_per_second: u32,
    /// Pre-send rate-limit behavior.
    pub rate_limit_mode: RateLimitModeSection,
    /// 429 responses tolerated per request.
    pub max_rate_limit_retries: u32,
    /// Retry schedule for transient failures.
    pub retry: RetrySection,
    /// Idle time before a bucket is evicted.
    pub bucket_idle_secs: u64,
}

impl Default for RestSection {
    fn default() -> Self {
        Self {
            base_url: "https://discord.com/api".to_owned(),
            api_version: 10,
            user_agent: None,
            timeout_secs: 15,
            global_per_second: 50,
            rate_limit_mode: RateLimitModeSection::Wait,
            max_rate_limit_retries: 5,
            retry: RetrySection::default(),
            bucket_idle_secs: 300,
        }
    }
}

impl RestSection {
    /// Base URL including the version segment.
    #[must_use]
    pub fn api_url(&self) -> String {
        format!("{}/v{}", self.base_url.trim_end_matches('/'), self.api_version)
    }
}

/// Retry behaviour for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Sends per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for a single delay.
    pub max_delay_ms: u64,
    /// Randomize delays.
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

// ---------------------------------------------------------------------------
// GatewaySection
// ---------------------------------------------------------------------------

/// Default intents: guilds, guild voice states, guild messages.
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 7) | (1 << 9);

/// Gateway session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Gateway URL. Fetched from `GET /gateway/bot` when unset.
    pub url: Option<String>,
    /// Intent bitmask.
    pub intents: u64,
    /// Shard count. The recommended count is used when unset.
    pub shard_count: Option<u32>,
    /// Member count above which offline members are omitted (50-250).
    pub large_threshold: u8,
    /// Wait for Hello after connecting.
    pub hello_timeout_ms: u64,
    /// `WebSocket` handshake timeout.
    pub connect_timeout_ms: u64,
    /// First reconnect backoff ceiling.
    pub backoff_base_ms: u64,
    /// Maximum reconnect backoff ceiling.
    pub backoff_max_ms: u64,
    /// Reconnects allowed without reaching `Connected`; unlimited when unset.
    pub max_reconnect_attempts: Option<u32>,
    /// Outbound commands allowed per window (0 = unlimited).
    pub command_limit: usize,
    /// Window for `command_limit`.
    pub command_window_secs: u64,
    /// Spacing between identify batches.
    pub identify_interval_ms: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            url: None,
            intents: DEFAULT_INTENTS,
            shard_count: None,
            large_threshold: 50,
            hello_timeout_ms: 30_000,
            connect_timeout_ms: 15_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            max_reconnect_attempts: None,
            command_limit: 120,
            command_window_secs: 60,
            identify_interval_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceSection
// ---------------------------------------------------------------------------

/// Voice connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSection {
    /// Encryption modes in preference order.
    pub modes: Vec<String>,
    /// UDP keepalive period.
    pub keepalive_interval_ms: u64,
    /// UDP silence before the voice session restarts.
    pub keepalive_timeout_ms: u64,
    /// Wait per IP discovery probe.
    pub discovery_timeout_ms: u64,
    /// IP discovery probes before giving up.
    pub discovery_attempts: u32,
    /// Voice `WebSocket` handshake timeout.
    pub connect_timeout_ms: u64,
    /// Wait for READY, SESSION_DESCRIPTION and RESUMED.
    pub ready_timeout_ms: u64,
    /// Wait for the gateway's voice state and server updates on join.
    pub join_timeout_ms: u64,
    /// First reconnect backoff ceiling.
    pub backoff_base_ms: u64,
    /// Maximum reconnect backoff ceiling.
    pub backoff_max_ms: u64,
    /// Reconnects allowed without reaching `Connected`.
    pub max_reconnect_attempts: u32,
}

impl Default for VoiceSection {
    fn default() -> Self {
        Self {
            modes: [
                "aead_aes256_gcm_rtpsize",
                "aead_xchacha20_poly1305_rtpsize",
                "xsalsa20_poly1305_lite",
                "xsalsa20_poly1305_suffix",
                "xsalsa20_poly1305",
            ]
            .map(str::to_owned)
            .to_vec(),
            keepalive_interval_ms: 5_000,
            keepalive_timeout_ms: 30_000,
            discovery_timeout_ms: 2_000,
            discovery_attempts: 5,
            connect_timeout_ms: 10_000,
            ready_timeout_ms: 10_000,
            join_timeout_ms: 10_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            max_reconnect_attempts: 5,
        }
    }
}
