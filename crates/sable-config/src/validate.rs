//! Configuration validation.
//!
//! Checks that values are within acceptable ranges and that cross-field
//! invariants hold.

use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{ClientConfig, GatewaySection, RestSection, VoiceSection};

/// Upper bound for any configured timeout or backoff (1 hour).
const MAX_DURATION_MS: u64 = 3_600_000;

/// Validate a deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &ClientConfig) -> ConfigResult<()> {
    if config.token_env.trim().is_empty() {
        return Err(invalid("token_env", "must name an environment variable"));
    }
    validate_rest(&config.rest)?;
    validate_gateway(&config.gateway)?;
    validate_voice(&config.voice)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn require_scheme(field: &str, raw: &str, schemes: &[&str]) -> ConfigResult<()> {
    let url = Url::parse(raw).map_err(|e| invalid(field, format!("'{raw}' is not a URL: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(
            field,
            format!("scheme '{}' not allowed; expected one of: {}", url.scheme(), schemes.join(", ")),
        ));
    }
    Ok(())
}

fn require_duration(field: &str, ms: u64) -> ConfigResult<()> {
    if ms == 0 || ms > MAX_DURATION_MS {
        return Err(invalid(field, format!("must be between 1 and {MAX_DURATION_MS} ms")));
    }
    Ok(())
}

fn require_backoff(prefix: &str, base_ms: u64, max_ms: u64) -> ConfigResult<()> {
    require_duration(&format!("{prefix}.backoff_base_ms"), base_ms)?;
    require_duration(&format!("{prefix}.backoff_max_ms"), max_ms)?;
    if base_ms > max_ms {
        return Err(invalid(
            &format!("{prefix}.backoff_base_ms"),
            format!("backoff_base_ms ({base_ms}) must not exceed backoff_max_ms ({max_ms})"),
        ));
    }
    Ok(())
}

fn validate_rest(rest: &RestSection) -> ConfigResult<()> {
    require_scheme("rest.base_url", &rest.base_url, &["http", "https"])?;
    if rest.api_version == 0 {
        return Err(invalid("rest.api_version", "must be positive"));
    }
    if rest.timeout_secs == 0 {
        return Err(invalid("rest.timeout_secs", "must be positive"));
    }
    if rest.bucket_idle_secs == 0 {
        return Err(invalid("rest.bucket_idle_secs", "must be positive"));
    }
    if rest.user_agent.as_deref().is_some_and(|ua| ua.trim().is_empty()) {
        return Err(invalid("rest.user_agent", "must not be blank"));
    }

    let retry = &rest.retry;
    if retry.max_attempts == 0 || retry.max_attempts > 10 {
        return Err(invalid("rest.retry.max_attempts", "must be between 1 and 10"));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        return Err(invalid(
            "rest.retry.initial_delay_ms",
            format!(
                "initial_delay_ms ({}) must not exceed max_delay_ms ({})",
                retry.initial_delay_ms, retry.max_delay_ms
            ),
        ));
    }
    if retry.max_delay_ms > MAX_DURATION_MS {
        return Err(invalid("rest.retry.max_delay_ms", format!("must not exceed {MAX_DURATION_MS} ms")));
    }
    Ok(())
}

fn validate_gateway(gateway: &GatewaySection) -> ConfigResult<()> {
    if let Some(url) = &gateway.url {
        require_scheme("gateway.url", url, &["ws", "wss"])?;
    }
    if gateway.shard_count == Some(0) {
        return Err(invalid("gateway.shard_count", "must be positive"));
    }
    if !(50..=250).contains(&gateway.large_threshold) {
        return Err(invalid("gateway.large_threshold", "must be between 50 and 250"));
    }
    require_duration("gateway.hello_timeout_ms", gateway.hello_timeout_ms)?;
    require_duration("gateway.connect_timeout_ms", gateway.connect_timeout_ms)?;
    require_duration("gateway.identify_interval_ms", gateway.identify_interval_ms)?;
    require_backoff("gateway", gateway.backoff_base_ms, gateway.backoff_max_ms)?;
    if gateway.max_reconnect_attempts == Some(0) {
        return Err(invalid("gateway.max_reconnect_attempts", "must be positive when set"));
    }
    if gateway.command_limit > 0 && gateway.command_window_secs == 0 {
        return Err(invalid("gateway.command_window_secs", "must be positive when command_limit is set"));
    }
    Ok(())
}

fn validate_voice(voice: &VoiceSection) -> ConfigResult<()> {
    if voice.modes.is_empty() {
        return Err(invalid("voice.modes", "at least one encryption mode is required"));
    }
    require_duration("voice.keepalive_interval_ms", voice.keepalive_interval_ms)?;
    require_duration("voice.keepalive_timeout_ms", voice.keepalive_timeout_ms)?;
    if voice.keepalive_timeout_ms <= voice.keepalive_interval_ms {
        return Err(invalid(
            "voice.keepalive_timeout_ms",
            format!(
                "keepalive_timeout_ms ({}) must exceed keepalive_interval_ms ({})",
                voice.keepalive_timeout_ms, voice.keepalive_interval_ms
            ),
        ));
    }
    require_duration("voice.discovery_timeout_ms", voice.discovery_timeout_ms)?;
    if voice.discovery_attempts == 0 {
        return Err(invalid("voice.discovery_attempts", "must be positive"));
    }
    require_duration("voice.connect_timeout_ms", voice.connect_timeout_ms)?;
    require_duration("voice.ready_timeout_ms", voice.ready_timeout_ms)?;
    require_duration("voice.join_timeout_ms", voice.join_timeout_ms)?;
    require_backoff("voice", voice.backoff_base_ms, voice.backoff_max_ms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(config: &ClientConfig) -> String {
        match validate(config).unwrap_err() {
            ConfigError::ValidationError { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn rest_url_must_be_http() {
        let mut config = ClientConfig::default();
        config.rest.base_url = "ftp://example.test".into();
        assert_eq!(field_of(&config), "rest.base_url");

        config.rest.base_url = "not a url".into();
        assert_eq!(field_of(&config), "rest.base_url");
    }

    #[test]
    fn gateway_url_must_be_websocket() {
        let mut config = ClientConfig::default();
        config.gateway.url = Some("https://gateway.example.test".into());
        assert_eq!(field_of(&config), "gateway.url");

        config.gateway.url = Some("wss://gateway.example.test".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn backoff_base_cannot_exceed_max() {
        let mut config = ClientConfig::default();
        config.gateway.backoff_base_ms = 120_000;
        assert_eq!(field_of(&config), "gateway.backoff_base_ms");
    }

    #[test]
    fn zero_shards_rejected() {
        let mut config = ClientConfig::default();
        config.gateway.shard_count = Some(0);
        assert_eq!(field_of(&config), "gateway.shard_count");
    }

    #[test]
    fn large_threshold_range() {
        let mut config = ClientConfig::default();
        config.gateway.large_threshold = 251;
        assert_eq!(field_of(&config), "gateway.large_threshold");
    }

    #[test]
    fn keepalive_timeout_must_exceed_interval() {
        let mut config = ClientConfig::default();
        config.voice.keepalive_timeout_ms = 5_000;
        assert_eq!(field_of(&config), "voice.keepalive_timeout_ms");
    }

    #[test]
    fn retry_bounds() {
        let mut config = ClientConfig::default();
        config.rest.retry.max_attempts = 0;
        assert_eq!(field_of(&config), "rest.retry.max_attempts");

        let mut config = ClientConfig::default();
        config.rest.retry.initial_delay_ms = 20_000;
        assert_eq!(field_of(&config), "rest.retry.initial_delay_ms");
    }

    #[test]
    fn voice_needs_a_mode() {
        let mut config = ClientConfig::default();
        config.voice.modes.clear();
        assert_eq!(field_of(&config), "voice.modes");
    }
}
