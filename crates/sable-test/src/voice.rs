//! Loopback voice UDP server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const DISCOVERY_LEN: usize = 74;
const KEEPALIVE_LEN: usize = 8;

#[derive(Debug, Default)]
struct Shared {
    probes: Mutex<Vec<u32>>,
    keepalives: AtomicU32,
    ignore_discovery: AtomicU32,
    silent: AtomicBool,
}

/// UDP endpoint that answers IP discovery and echoes keepalives.
///
/// Discovery replies report `external` (the caller's own address unless
/// overridden) with the requested SSRC.
#[derive(Debug)]
pub struct MockVoiceUdp {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MockVoiceUdp {
    /// Bind on `127.0.0.1` and reply with each sender's own address.
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    /// Bind on `127.0.0.1` and always report `external` in discovery replies.
    pub async fn with_external(external: SocketAddr) -> Self {
        Self::spawn(Some(external)).await
    }

    async fn spawn(external: Option<SocketAddr>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        let state = Arc::clone(&shared);

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let Some(packet) = buf.get(..len) else {
                    continue;
                };
                if let Some(reply) = state.reply(packet, external.unwrap_or(peer)) {
                    let _ = socket.send_to(&reply, peer).await;
                }
            }
        });

        Self { addr, shared, task }
    }

    /// Address to hand out as the voice server endpoint.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// SSRCs of every discovery probe received.
    #[must_use]
    pub fn probes(&self) -> Vec<u32> {
        self.shared.probes.lock().unwrap().clone()
    }

    /// Keepalive packets received.
    #[must_use]
    pub fn keepalives(&self) -> u32 {
        self.shared.keepalives.load(Ordering::SeqCst)
    }

    /// Drop the next `count` discovery probes without answering.
    pub fn ignore_discovery(&self, count: u32) {
        self.shared.ignore_discovery.store(count, Ordering::SeqCst);
    }

    /// Stop answering anything.
    pub fn go_silent(&self) {
        self.shared.silent.store(true, Ordering::SeqCst);
    }
}

impl Drop for MockVoiceUdp {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Shared {
    fn reply(&self, packet: &[u8], external: SocketAddr) -> Option<Vec<u8>> {
        if self.silent.load(Ordering::SeqCst) {
            return None;
        }
        match packet.len() {
            DISCOVERY_LEN if packet.get(..2) == Some(&[0, 1]) => {
                let ssrc = u32::from_be_bytes(packet.get(4..8)?.try_into().ok()?);
                self.probes.lock().unwrap().push(ssrc);
                let skip = self.ignore_discovery.load(Ordering::SeqCst);
                if skip > 0 {
                    self.ignore_discovery.store(skip.saturating_sub(1), Ordering::SeqCst);
                    return None;
                }
                Some(discovery_response(ssrc, external))
            },
            KEEPALIVE_LEN => {
                self.keepalives.fetch_add(1, Ordering::SeqCst);
                Some(packet.to_vec())
            },
            _ => None,
        }
    }
}

/// Encode a discovery response the way a voice server does.
#[must_use]
pub fn discovery_response(ssrc: u32, external: SocketAddr) -> Vec<u8> {
    let mut packet = Vec::with_capacity(DISCOVERY_LEN);
    packet.extend_from_slice(&2u16.to_be_bytes());
    packet.extend_from_slice(&70u16.to_be_bytes());
    packet.extend_from_slice(&ssrc.to_be_bytes());
    let mut address = [0u8; 64];
    let ip = external.ip().to_string();
    for (slot, byte) in address.iter_mut().zip(ip.as_bytes()) {
        *slot = *byte;
    }
    packet.extend_from_slice(&address);
    packet.extend_from_slice(&external.port().to_be_bytes());
    packet
}
