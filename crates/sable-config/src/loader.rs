//! Config file loading.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::ClientConfig;
use crate::validate;

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

impl ClientConfig {
    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or
    /// fails validation.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = parse(&content, &path.display().to_string())?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file exists but cannot be read,
    /// parsed, or fails validation.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = parse(&content, &path.display().to_string())?;
                info!(path = %path.display(), "loaded config");
                Ok(config)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            },
            Err(e) => Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] on malformed TOML or failed validation.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        parse(content, "<string>")
    }

    /// Check ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::ValidationError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        validate::validate(self)
    }

    /// Read the token from the environment variable named by `token_env`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] if the variable is unset or
    /// blank.
    pub fn resolve_token(&self) -> ConfigResult<String> {
        self.resolve_token_with(|name| std::env::var(name).ok())
    }

    /// Like [`resolve_token`](Self::resolve_token) with a custom lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] if `lookup` yields nothing
    /// usable.
    pub fn resolve_token_with(
        &self,
        lookup: impl FnOnce(&str) -> Option<String>,
    ) -> ConfigResult<String> {
        lookup(&self.token_env)
            .map(|raw| raw.trim().to_owned())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ConfigError::MissingToken(self.token_env.clone()))
    }
}

fn parse(content: &str, origin: &str) -> ConfigResult<ClientConfig> {
    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: origin.to_owned(),
            message: format!(
                "config is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }
    let config: ClientConfig = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })?;
    validate::validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "token_env = \"MY_BOT_TOKEN\"\n[voice]\ndiscovery_attempts = 2").unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.token_env, "MY_BOT_TOKEN");
        assert_eq!(config.voice.discovery_attempts, 2);
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = ClientConfig::from_toml_str("[rest\nbase_url = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let err = ClientConfig::from_toml_str("[gateway]\nhello_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { field, .. } if field == "gateway.hello_timeout_ms"));
    }

    #[test]
    fn token_is_trimmed() {
        let config = ClientConfig::default();
        let token = config
            .resolve_token_with(|name| (name == "SABLE_TOKEN").then(|| " abc.def \n".to_owned()))
            .unwrap();
        assert_eq!(token, "abc.def");
    }

    #[test]
    fn missing_or_blank_token() {
        let config = ClientConfig::default();
        assert!(matches!(
            config.resolve_token_with(|_| None),
            Err(ConfigError::MissingToken(name)) if name == "SABLE_TOKEN"
        ));
        assert!(config.resolve_token_with(|_| Some("   ".into())).is_err());
    }
}
