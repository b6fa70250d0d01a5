//! Client-side WebSocket transport.
//!
//! This module dials the relay using tokio-tungstenite and hands back split
//! reader/writer halves that speak [`WireMessage`]s.

use beacon_protocol::{codec, WireMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace};

use crate::traits::TransportError;

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial the relay, giving up after `timeout`.
///
/// # Errors
///
/// Returns [`TransportError::Timeout`] if the handshake does not finish in
/// time, or [`TransportError::ConnectFailed`] if the dial or handshake fails.
pub async fn connect(url: &str, timeout: Duration) -> Result<(WsWriter, WsReader), TransportError> {
    let (stream, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    debug!(url = %url, "WebSocket handshake completed");

    let (sink, stream) = stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// Write half of a client connection.
pub struct WsWriter {
    sink: SplitSink<ClientStream, Message>,
}

impl WsWriter {
    /// Encode and send a message.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the send fails.
    pub async fn send(&mut self, message: &WireMessage) -> Result<(), TransportError> {
        let text = codec::encode(message)?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Send a close frame and shut the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake cannot be started.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }
}

/// Read half of a client connection.
pub struct WsReader {
    stream: SplitStream<ClientStream>,
}

impl WsReader {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when the connection closes cleanly. A frame that
    /// fails to decode is reported as [`TransportError::Protocol`]; the
    /// connection is still usable afterwards.
    pub async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(codec::decode(&text)?));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(codec::decode_bytes(&data)?));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Transport-level keepalive; tungstenite answers pings itself.
                    trace!("WebSocket control frame");
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }
}
