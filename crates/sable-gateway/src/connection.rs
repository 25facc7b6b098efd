//! `WebSocket` connection setup.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::close_code;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::GatewayEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a gateway connection.
pub(crate) type WsWriter = SplitSink<WsStream, Message>;
/// Read half of a gateway connection.
pub(crate) type WsReader = SplitStream<WsStream>;

/// Open a `WebSocket` to `url` within `timeout`.
pub(crate) async fn connect(url: &str, timeout: Duration) -> GatewayResult<(WsWriter, WsReader)> {
    info!(url = %url, "Connecting to gateway");
    let (ws, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| GatewayError::ConnectTimeout(url.to_string()))??;
    Ok(ws.split())
}

/// Read until Hello arrives and return its heartbeat interval.
///
/// Other frames before Hello are skipped. A close frame is classified like
/// any other close so a bad token surfaces as
/// [`GatewayError::AuthenticationFailed`].
pub(crate) async fn wait_for_hello(
    reader: &mut WsReader,
    timeout: Duration,
) -> GatewayResult<Duration> {
    let hello = async {
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => match GatewayEvent::decode(text.as_str())? {
                    GatewayEvent::Hello { heartbeat_interval } => return Ok(heartbeat_interval),
                    other => debug!(event = ?other, "Skipping frame before Hello"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map_or(close_code::NORMAL, |f| u16::from(f.code));
                    return Err(match close_code::classify(code) {
                        close_code::CloseAction::Fatal => close_code::fatal_error(code),
                        _ => GatewayError::Protocol(format!("closed with {code} before Hello")),
                    });
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(GatewayError::Protocol(
                        "Connection closed before Hello".into(),
                    ));
                },
            }
        }
    };

    tokio::time::timeout(timeout, hello)
        .await
        .map_err(|_| GatewayError::HelloTimeout)?
}
