//! Credential holder.
//!
//! The token is needed verbatim for the gateway identify payload and as
//! an `Authorization` header value for REST. It is zeroized on drop and
//! never printed by `Debug` or `Display`.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CoreError, CoreResult};

/// Kind of credential, which selects the `Authorization` scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bot account token (`Authorization: Bot <token>`).
    Bot,
    /// OAuth2 bearer token (`Authorization: Bearer <token>`).
    Bearer,
}

impl TokenKind {
    fn scheme(self) -> &'static str {
        match self {
            Self::Bot => "Bot",
            Self::Bearer => "Bearer",
        }
    }
}

/// A caller-supplied credential.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Token {
    #[zeroize(skip)]
    kind: TokenKind,
    secret: String,
}

impl Token {
    /// Create a bot token. A leading `Bot ` prefix is stripped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyToken`] if nothing remains after trimming.
    pub fn bot(raw: impl AsRef<str>) -> CoreResult<Self> {
        Self::with_kind(TokenKind::Bot, raw.as_ref())
    }

    /// Create a bearer token. A leading `Bearer ` prefix is stripped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyToken`] if nothing remains after trimming.
    pub fn bearer(raw: impl AsRef<str>) -> CoreResult<Self> {
        Self::with_kind(TokenKind::Bearer, raw.as_ref())
    }

    fn with_kind(kind: TokenKind, raw: &str) -> CoreResult<Self> {
        let trimmed = raw.trim();
        let secret = match trimmed.strip_prefix(kind.scheme()) {
            Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
            _ => trimmed,
        };
        if secret.is_empty() {
            return Err(CoreError::EmptyToken);
        }
        Ok(Self {
            kind,
            secret: secret.to_string(),
        })
    }

    /// The credential kind.
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// The raw secret, as sent in gateway identify payloads.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.secret
    }

    /// The value for an HTTP `Authorization` header.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("{} {}", self.kind.scheme(), self.secret)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.kind)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [REDACTED]", self.kind.scheme())
    }
}
