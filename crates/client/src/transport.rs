//! Transport abstraction and the WebSocket implementation.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsFrame;

use vx_domain::protocol::{ClientMessage, ServerMessage};
use vx_domain::{Error, Result};

/// One established connection.
#[async_trait]
pub trait TransportLink: Send {
    async fn send(&mut self, msg: ClientMessage) -> Result<()>;

    /// Next server message; `None` once the transport is gone.
    async fn recv(&mut self) -> Option<ServerMessage>;
}

/// Connection factory. Each reconnect attempt calls `connect` again.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn TransportLink>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn TransportLink>> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Http {
                status: 0,
                message: e.to_string(),
            })?;
        Ok(Box::new(WsLink { ws }))
    }
}

struct WsLink {
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl TransportLink for WsLink {
    async fn send(&mut self, msg: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&msg)?;
        self.ws
            .send(WsFrame::Text(json))
            .await
            .map_err(|e| Error::Http {
                status: 0,
                message: e.to_string(),
            })
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        while let Some(frame) = self.ws.next().await {
            match frame {
                Ok(WsFrame::Text(text)) => match serde_json::from_str(&text) {
                    Ok(msg) => return Some(msg),
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring unparseable server message");
                    }
                },
                Ok(WsFrame::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    }
}
