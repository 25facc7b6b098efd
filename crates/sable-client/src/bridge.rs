//! Conversion from [`ClientConfig`] sections to transport configs.

use std::time::Duration;

use sable_config::{ConfigError, GatewaySection, RateLimitModeSection, RestSection, VoiceSection};
use sable_core::RetryConfig;
use sable_gateway::{GatewayConfig, IdentifyGate, IdentifyOptions};
use sable_http::{DispatcherConfig, RateLimitMode};
use sable_voice::{EncryptionMode, KeepaliveConfig, VoiceConfig};

use crate::error::ClientResult;

/// REST dispatcher settings.
#[must_use]
pub fn dispatcher_config(rest: &RestSection) -> DispatcherConfig {
    let defaults = DispatcherConfig::default();
    DispatcherConfig {
        base_url: rest.api_url(),
        user_agent: rest.user_agent.clone().unwrap_or(defaults.user_agent),
        timeout: Duration::from_secs(rest.timeout_secs),
        global_per_second: rest.global_per_second,
        mode: match rest.rate_limit_mode {
            RateLimitModeSection::Wait => RateLimitMode::Wait,
            RateLimitModeSection::FailFast => RateLimitMode::FailFast,
        },
        max_rate_limit_retries: rest.max_rate_limit_retries,
        retry: RetryConfig::new(
            rest.retry.max_attempts,
            Duration::from_millis(rest.retry.initial_delay_ms),
            Duration::from_millis(rest.retry.max_delay_ms),
        )
        .with_jitter(rest.retry.jitter),
        bucket_idle: Duration::from_secs(rest.bucket_idle_secs),
    }
}

/// Gateway session settings for `url`.
#[must_use]
pub fn gateway_config(section: &GatewaySection, url: String) -> GatewayConfig {
    GatewayConfig {
        url,
        identify: IdentifyOptions {
            intents: section.intents,
            large_threshold: section.large_threshold,
            ..IdentifyOptions::default()
        },
        hello_timeout: Duration::from_millis(section.hello_timeout_ms),
        connect_timeout: Duration::from_millis(section.connect_timeout_ms),
        backoff_base: Duration::from_millis(section.backoff_base_ms),
        backoff_max: Duration::from_millis(section.backoff_max_ms),
        max_reconnect_attempts: section.max_reconnect_attempts.unwrap_or(u32::MAX),
        command_limit: section.command_limit,
        command_window: Duration::from_secs(section.command_window_secs),
    }
}

/// Identify gate shared by all shards.
#[must_use]
pub fn identify_gate(section: &GatewaySection, max_concurrency: u32) -> IdentifyGate {
    IdentifyGate::new(
        max_concurrency,
        Duration::from_millis(section.identify_interval_ms),
    )
}

/// Voice session settings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] for an unknown encryption mode.
pub fn voice_config(section: &VoiceSection) -> ClientResult<VoiceConfig> {
    let modes = section
        .modes
        .iter()
        .map(|name| {
            name.parse::<EncryptionMode>()
                .map_err(|e| ConfigError::ValidationError {
                    field: "voice.modes".to_owned(),
                    message: e.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VoiceConfig {
        modes,
        keepalive: KeepaliveConfig {
            interval: Duration::from_millis(section.keepalive_interval_ms),
            timeout: Duration::from_millis(section.keepalive_timeout_ms),
        },
        discovery_timeout: Duration::from_millis(section.discovery_timeout_ms),
        discovery_attempts: section.discovery_attempts,
        connect_timeout: Duration::from_millis(section.connect_timeout_ms),
        hello_timeout: Duration::from_millis(section.connect_timeout_ms),
        ready_timeout: Duration::from_millis(section.ready_timeout_ms),
        backoff_base: Duration::from_millis(section.backoff_base_ms),
        backoff_max: Duration::from_millis(section.backoff_max_ms),
        max_reconnect_attempts: section.max_reconnect_attempts,
    })
}

#[cfg(test)]
mod tests {
    use sable_config::ClientConfig;

    use super::*;
    use crate::error::ClientError;

    #[test]
    fn defaults_match_transport_defaults() {
        let config = ClientConfig::default();

        let rest = dispatcher_config(&config.rest);
        let expected = DispatcherConfig::default();
        assert_eq!(rest.base_url, expected.base_url);
        assert_eq!(rest.timeout, expected.timeout);
        assert_eq!(rest.max_rate_limit_retries, expected.max_rate_limit_retries);
        assert_eq!(rest.retry, expected.retry);
        assert_eq!(rest.bucket_idle, expected.bucket_idle);

        let gateway = gateway_config(&config.gateway, "wss://gateway.discord.gg".into());
        let expected = GatewayConfig::default();
        assert_eq!(gateway.url, expected.url);
        assert_eq!(gateway.hello_timeout, expected.hello_timeout);
        assert_eq!(gateway.backoff_base, expected.backoff_base);
        assert_eq!(gateway.backoff_max, expected.backoff_max);
        assert_eq!(gateway.max_reconnect_attempts, u32::MAX);
        assert_eq!(gateway.identify, IdentifyOptions::default());

        let voice = voice_config(&config.voice).unwrap();
        assert_eq!(voice.modes, EncryptionMode::PREFERENCE.to_vec());
        assert_eq!(voice.keepalive, KeepaliveConfig::default());
    }

    #[test]
    fn fail_fast_mode_carries_over() {
        let rest = RestSection {
            rate_limit_mode: RateLimitModeSection::FailFast,
            user_agent: Some("custom/1.0".into()),
            ..RestSection::default()
        };
        let config = dispatcher_config(&rest);
        assert_eq!(config.mode, RateLimitMode::FailFast);
        assert_eq!(config.user_agent, "custom/1.0");
    }

    #[test]
    fn unknown_voice_mode_is_a_config_error() {
        let section = VoiceSection {
            modes: vec!["rot13".into()],
            ..VoiceSection::default()
        };
        assert!(matches!(
            voice_config(&section),
            Err(ClientError::Config(ConfigError::ValidationError { .. }))
        ));
    }
}
