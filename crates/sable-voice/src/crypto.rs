//! Encryption mode negotiation and the session secret key.
//!
//! Media encryption itself is not performed here; the handshake only
//! yields the mode and key a media layer needs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{VoiceError, VoiceResult};

/// Length of the session key in bytes.
pub const SECRET_KEY_LEN: usize = 32;

/// Transport encryption modes, most preferred first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// AES-256-GCM with the RTP header as associated data.
    AeadAes256GcmRtpsize,
    /// XChaCha20-Poly1305 with the RTP header as associated data.
    AeadXchacha20Poly1305Rtpsize,
    /// XSalsa20-Poly1305 with a 4-byte incrementing nonce.
    Xsalsa20Poly1305Lite,
    /// XSalsa20-Poly1305 with a random 24-byte nonce suffix.
    Xsalsa20Poly1305Suffix,
    /// XSalsa20-Poly1305 with the RTP header as nonce.
    Xsalsa20Poly1305,
}

impl EncryptionMode {
    /// Default preference order.
    pub const PREFERENCE: [Self; 5] = [
        Self::AeadAes256GcmRtpsize,
        Self::AeadXchacha20Poly1305Rtpsize,
        Self::Xsalsa20Poly1305Lite,
        Self::Xsalsa20Poly1305Suffix,
        Self::Xsalsa20Poly1305,
    ];

    /// Name on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AeadAes256GcmRtpsize => "aead_aes256_gcm_rtpsize",
            Self::AeadXchacha20Poly1305Rtpsize => "aead_xchacha20_poly1305_rtpsize",
            Self::Xsalsa20Poly1305Lite => "xsalsa20_poly1305_lite",
            Self::Xsalsa20Poly1305Suffix => "xsalsa20_poly1305_suffix",
            Self::Xsalsa20Poly1305 => "xsalsa20_poly1305",
        }
    }

    /// First mode in `preferred` that the server offers.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::UnsupportedMode`] if there is no overlap.
    pub fn negotiate(preferred: &[Self], offered: &[String]) -> VoiceResult<Self> {
        preferred
            .iter()
            .copied()
            .find(|mode| offered.iter().any(|o| o == mode.as_str()))
            .ok_or_else(|| VoiceError::UnsupportedMode(offered.to_vec()))
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = VoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PREFERENCE
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| VoiceError::UnsupportedMode(vec![s.to_string()]))
    }
}

/// The 32-byte session key from SESSION_DESCRIPTION. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    /// Key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = VoiceError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key: [u8; SECRET_KEY_LEN] = bytes.try_into().map_err(|_| {
            VoiceError::HandshakeFailed(format!(
                "secret key is {} bytes, expected {SECRET_KEY_LEN}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}
