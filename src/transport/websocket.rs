//! WebSocket transport
//!
//! Dials a relay server at `{relay_host}/connect/{topic}`. The relay is an
//! untrusted rendezvous point: it forwards text frames verbatim between the
//! parties on a topic and never sees anything but ciphertext and public
//! identifiers.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{Connector, FrameSink, FrameSource, TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector dialing a relay topic over WebSocket
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Build a connector for `topic` on the relay at `relay_host`
    ///
    /// `relay_host` is a WebSocket origin such as `ws://127.0.0.1:8787`.
    pub fn new(relay_host: &str, topic: &str) -> Self {
        let base = relay_host.trim_end_matches('/');
        WsConnector {
            url: format!("{base}/connect/{topic}"),
        }
    }

    /// The full URL this connector dials
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> TransportResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let (ws, _) = connect_async(&self.url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { stream })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> TransportResult<()> {
        self.sink
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

struct WsSource {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next(&mut self) -> TransportResult<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Ping/pong bookkeeping happens inside the stream; binary
                // frames are not part of the protocol
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        }
    }
}
