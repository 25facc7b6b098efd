//! UDP IP discovery.
//!
//! The client sends a 74-byte probe carrying its SSRC; the voice server
//! answers with the external address and port it saw the probe from:
//!
//! ```text
//! u16 type (1 = request, 2 = response) | u16 length (70) | u32 ssrc |
//! [u8; 64] address, NUL padded         | u16 port
//! ```
//!
//! All integers are big-endian.

use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::error::{VoiceError, VoiceResult};

/// Size of a discovery packet.
pub const PACKET_LEN: usize = 74;
const BODY_LEN: u16 = 70;
const ADDRESS_LEN: usize = 64;
const REQUEST: u16 = 1;
const RESPONSE: u16 = 2;

/// External address reported by the voice server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAddress {
    /// Address text, used verbatim in select protocol.
    pub ip: String,
    /// External UDP port.
    pub port: u16,
}

/// Build the probe for `ssrc`.
#[must_use]
pub fn encode_request(ssrc: u32) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    let header = REQUEST
        .to_be_bytes()
        .into_iter()
        .chain(BODY_LEN.to_be_bytes())
        .chain(ssrc.to_be_bytes());
    for (slot, byte) in packet.iter_mut().zip(header) {
        *slot = byte;
    }
    packet
}

/// Parse a discovery response addressed to `ssrc`.
///
/// # Errors
///
/// Returns [`VoiceError::Protocol`] for a wrong size, type or SSRC, or an
/// address that is not UTF-8.
pub fn decode_response(packet: &[u8], ssrc: u32) -> VoiceResult<DiscoveredAddress> {
    let bad = |what: &str| VoiceError::Protocol(format!("discovery response: {what}"));

    if packet.len() != PACKET_LEN {
        return Err(bad("wrong length"));
    }
    let be16 = |at: usize| {
        packet
            .get(at..at.saturating_add(2))
            .and_then(|b| b.try_into().ok())
            .map(u16::from_be_bytes)
    };
    if be16(0) != Some(RESPONSE) {
        return Err(bad("wrong type"));
    }
    let got_ssrc = packet
        .get(4..8)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes);
    if got_ssrc != Some(ssrc) {
        return Err(bad("SSRC mismatch"));
    }

    let address = packet.get(8..8usize.saturating_add(ADDRESS_LEN)).ok_or_else(|| bad("truncated"))?;
    let end = address.iter().position(|&b| b == 0).unwrap_or(ADDRESS_LEN);
    let ip = std::str::from_utf8(address.get(..end).unwrap_or_default())
        .map_err(|_| bad("address is not UTF-8"))?
        .to_string();
    if ip.is_empty() {
        return Err(bad("empty address"));
    }
    let port = be16(PACKET_LEN.saturating_sub(2)).ok_or_else(|| bad("truncated"))?;

    Ok(DiscoveredAddress { ip, port })
}

/// Run IP discovery on a connected socket.
///
/// Each attempt sends a probe and waits `timeout` for a matching reply;
/// unrelated datagrams are ignored. A socket error, such as an ICMP port
/// unreachable surfacing on `recv`, fails only the current attempt.
///
/// # Errors
///
/// Returns [`VoiceError::HandshakeFailed`] once `attempts` probes have gone
/// unanswered.
pub async fn discover(
    socket: &UdpSocket,
    ssrc: u32,
    timeout: Duration,
    attempts: u32,
) -> VoiceResult<DiscoveredAddress> {
    let probe = encode_request(ssrc);
    let mut buf = [0u8; 1024];
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        debug!(ssrc, attempt, "Sending IP discovery probe");
        if let Err(e) = socket.send(&probe).await {
            warn!(ssrc, attempt, error = %e, "IP discovery probe failed to send");
            last_error = Some(e);
            continue;
        }

        let reply = tokio::time::timeout(timeout, async {
            loop {
                let len = socket.recv(&mut buf).await?;
                match decode_response(buf.get(..len).unwrap_or_default(), ssrc) {
                    Ok(found) => return Ok::<_, std::io::Error>(found),
                    Err(e) => debug!(ssrc, error = %e, "Ignoring datagram during discovery"),
                }
            }
        })
        .await;

        match reply {
            Ok(Ok(found)) => {
                debug!(ssrc, ip = %found.ip, port = found.port, "IP discovery complete");
                return Ok(found);
            },
            Ok(Err(e)) => {
                warn!(ssrc, attempt, error = %e, "IP discovery socket error");
                last_error = Some(e);
            },
            Err(_) => warn!(ssrc, attempt, "IP discovery probe timed out"),
        }
    }

    Err(VoiceError::HandshakeFailed(match last_error {
        Some(e) => format!("no IP discovery reply after {attempts} attempts (last error: {e})"),
        None => format!("no IP discovery reply after {attempts} attempts"),
    }))
}
