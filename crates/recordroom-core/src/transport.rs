//! Outbound streaming transport.
//!
//! The connection manager only talks to [`Connector`] and [`Transport`], so the
//! WebSocket implementation can be swapped for [`memory::MemoryConnector`] in tests.

pub mod memory;

use crate::{RecordroomError, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// One open connection to the ingest endpoint.
#[async_trait]
pub trait Transport: Send {
    /// Hand one serialized event to the connection.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Resolves once the peer closes or the connection fails. Cancel-safe.
    async fn closed(&mut self);

    /// Close from our side.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports to an ingest URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector for `ws://` and `wss://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| RecordroomError::Transport(e.to_string()))?;
        let (sink, stream) = stream.split();
        Ok(Box::new(WebSocketTransport { sink, stream }))
    }
}

pub struct WebSocketTransport {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.sink
            .send(Message::text(frame))
            .await
            .map_err(|e| RecordroomError::Transport(e.to_string()))
    }

    async fn closed(&mut self) {
        // Inbound traffic is not part of the protocol; read only to notice the end.
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Close(frame)) => {
                    debug!(target: "recordroom::transport", "Peer closed ingest socket: {:?}", frame);
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(target: "recordroom::transport", "Ingest socket failed: {}", e);
                    return;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.sink
            .close()
            .await
            .map_err(|e| RecordroomError::Transport(e.to_string()))
    }
}
