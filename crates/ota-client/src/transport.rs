//! Channels to the update service.
//!
//! A [`Connection`] is an outbound [`Transport`] plus the ordered stream of
//! inbound messages. Sending is fire-and-forget; replies arrive on `inbound`.

use crate::error::TransportError;
use futures_util::{SinkExt, StreamExt};
use ota_core::Message;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// One-way, non-blocking send to the service.
pub trait Transport: Send + Sync {
    fn send(&self, message: Message) -> Result<(), TransportError>;
}

/// Transport backed by an unbounded queue.
#[derive(Debug, Clone)]
pub struct QueueTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl QueueTransport {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }
}

impl Transport for QueueTransport {
    fn send(&self, message: Message) -> Result<(), TransportError> {
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }
}

/// Transport feeding a WebSocket writer task with JSON text frames.
///
/// Encoding happens in `send`, so a message that cannot be encoded is
/// reported to the caller instead of being lost in the writer.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    frames: mpsc::UnboundedSender<String>,
}

impl WebSocketTransport {
    pub fn new(frames: mpsc::UnboundedSender<String>) -> Self {
        Self { frames }
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, message: Message) -> Result<(), TransportError> {
        let text = serde_json::to_string(&message)?;
        self.frames.send(text).map_err(|_| TransportError::Closed)
    }
}

/// An attached channel to the service.
pub struct Connection {
    pub outbound: Arc<dyn Transport>,
    pub inbound: mpsc::UnboundedReceiver<Message>,
}

/// The service's side of an in-process connection.
pub struct ServiceLink {
    /// Requests sent by the client, in order.
    pub requests: mpsc::UnboundedReceiver<Message>,
    /// Replies delivered to the client.
    pub replies: mpsc::UnboundedSender<Message>,
}

/// Create an in-process connection and the service end it talks to.
pub fn in_process() -> (Connection, ServiceLink) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let connection = Connection {
        outbound: Arc::new(QueueTransport::new(request_tx)),
        inbound: reply_rx,
    };
    let link = ServiceLink {
        requests: request_rx,
        replies: reply_tx,
    };
    (connection, link)
}

/// Connect to a service over WebSocket. Messages travel as JSON text frames.
pub async fn connect_websocket(url: &str) -> Result<Connection, TransportError> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();
    tracing::info!("Connected to {}", url);

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                tracing::warn!("WebSocket send failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("WebSocket error: {}", e);
                    break;
                }
            };
            match frame {
                WsMessage::Text(text) => match serde_json::from_str::<Message>(&text) {
                    Ok(message) => {
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Invalid message: {}", e),
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        tracing::debug!("WebSocket reader finished");
    });

    Ok(Connection {
        outbound: Arc::new(WebSocketTransport::new(outbound_tx)),
        inbound: inbound_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_core::{FieldMap, Response};

    #[tokio::test]
    async fn in_process_delivers_both_ways() {
        let (mut connection, mut link) = in_process();
        connection
            .outbound
            .send(Message::new(1, FieldMap::new()))
            .unwrap();
        let request = link.requests.recv().await.unwrap();
        assert_eq!(request.discriminant, 1);

        link.replies.send(Response::UpToDate.into_message(None)).unwrap();
        let reply = connection.inbound.recv().await.unwrap();
        assert_eq!(reply.discriminant, 2);
    }

    #[tokio::test]
    async fn send_after_service_drops_is_closed() {
        let (connection, link) = in_process();
        drop(link);
        let err = connection
            .outbound
            .send(Message::new(0, FieldMap::new()))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn websocket_transport_encodes_before_queueing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = WebSocketTransport::new(tx);
        let request = Message::new(1, FieldMap::new()).with_request_id(4);
        transport.send(request.clone()).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame, r#"{"discriminant":1,"request_id":4,"fields":{}}"#);
        assert_eq!(serde_json::from_str::<Message>(&frame).unwrap(), request);

        drop(rx);
        let err = transport.send(request).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
