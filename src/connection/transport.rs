//! Push transport abstraction
//!
//! A [`Connector`] opens one physical push session and hands back a pair of
//! channels. The connection manager never touches sockets directly, which
//! lets tests script sessions without a server.

use crate::error::ChatError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// What the transport reports about a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame, undecoded
    Frame(String),
    /// Transport-level failure. Logged, never a teardown by itself.
    Error(String),
    /// The session ended (peer close or stream end)
    Closed,
}

/// Channels of one physical push session.
///
/// Dropping `outbound` asks the transport to close the session.
pub struct PushLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens push sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<PushLink, ChatError>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<PushLink, ChatError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| ChatError::transport(format!("Failed to connect {url}: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        // Writer: drains outbound payloads, closes the socket once the sender is dropped
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = sink.send(Message::text(text)).await {
                    tracing::warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: forwards frames until the stream ends
        tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                let event = match next {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text.as_str().to_owned()),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => TransportEvent::Error("non-UTF-8 binary frame".to_string()),
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(frame = ?frame, "WebSocket close frame received");
                        break;
                    }
                    // Pings are answered by tungstenite
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                    Err(e) => {
                        let fatal = matches!(
                            e,
                            WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_)
                        );
                        if inbound_tx.send(TransportEvent::Error(e.to_string())).is_err() || fatal {
                            break;
                        }
                        continue;
                    }
                };
                if inbound_tx.send(event).is_err() {
                    break;
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed);
        });

        Ok(PushLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
