//! Transport seam between the session state machine and the wire.
//!
//! Production connects over `tokio-tungstenite`; tests inject scripted fakes.

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use rosterex_model::wire::GatewayFrame;

/// One live gateway connection.
#[async_trait]
pub trait GatewayTransport: Send {
    async fn send(&mut self, frame: GatewayFrame) -> anyhow::Result<()>;

    /// Next decoded frame. `None` means the remote closed the connection.
    /// Undecodable payloads are skipped, not surfaced.
    async fn recv(&mut self) -> Option<anyhow::Result<GatewayFrame>>;

    /// Close the connection cleanly. Best effort.
    async fn close(&mut self);
}

/// Factory for gateway connections, so sessions can recycle and tests can
/// hand out fakes.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Box<dyn GatewayTransport>>;
}

/// The production connector: JSON text frames over a WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        WsConnector { url: url.into() }
    }
}

#[async_trait]
impl GatewayConnector for WsConnector {
    async fn connect(&self) -> anyhow::Result<Box<dyn GatewayTransport>> {
        let (stream, _response) = connect_async(&self.url)
            .await
            .with_context(|| format!("gateway connect to {}", self.url))?;
        Ok(Box::new(WsTransport { inner: stream }))
    }
}

struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl GatewayTransport for WsTransport {
    async fn send(&mut self, frame: GatewayFrame) -> anyhow::Result<()> {
        let text = serde_json::to_string(&frame).context("encode gateway frame")?;
        self.inner
            .send(Message::Text(text.into()))
            .await
            .context("send gateway frame")
    }

    async fn recv(&mut self) -> Option<anyhow::Result<GatewayFrame>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(err.into())),
            };

            let decoded = match &message {
                Message::Text(text) => serde_json::from_str::<GatewayFrame>(text),
                Message::Binary(bytes) => serde_json::from_slice::<GatewayFrame>(bytes),
                Message::Close(_) => return None,
                // Ping/pong are answered by the websocket layer.
                _ => continue,
            };

            match decoded {
                Ok(frame) => return Some(Ok(frame)),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping undecodable gateway frame");
                    continue;
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
