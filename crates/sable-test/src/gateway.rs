//! Loopback `WebSocket` server speaking JSON frames.
//!
//! Serves both the event gateway and the voice gateway in tests: the mock
//! only moves JSON, scripts decide what the frames mean.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// How long mock helpers wait before failing the test.
pub const MOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A `WebSocket` server on `127.0.0.1` handing out accepted connections.
#[derive(Debug)]
pub struct MockGateway {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    accept_task: JoinHandle<()>,
}

impl MockGateway {
    /// Bind an ephemeral port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, connections) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        let _ = tx.send(MockConnection::new(ws));
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            accept_task,
        }
    }

    /// `ws://` URL of the server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> MockConnection {
        tokio::time::timeout(MOCK_TIMEOUT, self.connections.recv())
            .await
            .expect("timed out waiting for a client connection")
            .expect("accept loop stopped")
    }

    /// Returns `true` if no connection is waiting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// One accepted client connection.
#[derive(Debug)]
pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
    /// Frames read while looking for another opcode.
    skipped: VecDeque<Value>,
    close_code: Option<u16>,
}

impl MockConnection {
    fn new(ws: WebSocketStream<TcpStream>) -> Self {
        Self {
            ws,
            skipped: VecDeque::new(),
            close_code: None,
        }
    }

    /// Send a JSON frame.
    pub async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    /// Send a gateway Hello (`op 10`).
    pub async fn hello(&mut self, heartbeat_interval_ms: u64) {
        self.send_json(json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval_ms}}))
            .await;
    }

    /// Send a dispatch (`op 0`).
    pub async fn dispatch(&mut self, seq: u64, name: &str, data: Value) {
        self.send_json(json!({"op": 0, "s": seq, "t": name, "d": data}))
            .await;
    }

    /// Close with `code`.
    pub async fn close(&mut self, code: u16) {
        let frame = CloseFrame {
            code: code.into(),
            reason: "mock".into(),
        };
        let _ = self.ws.send(Message::Close(Some(frame))).await;
    }

    /// Next JSON frame from the client, or `None` once it closes.
    pub async fn recv_json(&mut self) -> Option<Value> {
        if let Some(value) = self.skipped.pop_front() {
            return Some(value);
        }
        self.read_json().await
    }

    async fn read_json(&mut self) -> Option<Value> {
        loop {
            let next = tokio::time::timeout(MOCK_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a client frame");
            match next {
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(text.as_str()).unwrap());
                },
                Some(Ok(Message::Close(frame))) => {
                    self.close_code = frame.map(|f| u16::from(f.code));
                    return None;
                },
                Some(Ok(_)) => {},
                Some(Err(_)) | None => return None,
            }
        }
    }

    /// First frame with opcode `op`, buffering frames with other opcodes.
    ///
    /// Panics if the client closes first.
    pub async fn expect_op(&mut self, op: u8) -> Value {
        if let Some(pos) = self.skipped.iter().position(|v| v["op"] == op)
            && let Some(value) = self.skipped.remove(pos)
        {
            return value;
        }
        loop {
            let value = self
                .read_json()
                .await
                .unwrap_or_else(|| panic!("connection closed while waiting for op {op}"));
            if value["op"] == op {
                return value;
            }
            self.skipped.push_back(value);
        }
    }

    /// Read until the client closes and return its close code.
    pub async fn closed(&mut self) -> Option<u16> {
        self.skipped.clear();
        while self.read_json().await.is_some() {}
        self.close_code
    }
}
