//! WebSocket wrapper for the chat push channel

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::PushEvent;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// One frame worth reporting to the connection manager. Anything that
/// proves the channel alive counts, even if it carries no event.
pub enum SocketFrame {
    Event(PushEvent),
    Keepalive,
}

pub struct ChatSocket {
    stream: WsStream,
}

impl ChatSocket {
    /// Connect to the push endpoint for one conversation.
    ///
    /// The endpoint id distinguishes this client instance from other
    /// sessions of the same user.
    pub async fn connect(ws_url: &str, conversation_id: &str) -> Result<Self, ChatError> {
        let epid = Uuid::new_v4();
        let sep = if ws_url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}conversation={}&epid={}",
            ws_url, sep, conversation_id, epid
        );

        tracing::info!("Connecting WebSocket to {}", url);
        let (stream, response) = connect_async(&url).await?;
        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send one JSON text frame.
    pub async fn send_json(&mut self, json: &str) -> Result<(), ChatError> {
        tracing::debug!("WS send: {}", json);
        self.stream
            .send(Message::Text(json.to_string()))
            .await
            .map_err(ChatError::from)
    }

    /// Send a ping to probe liveness.
    pub async fn ping(&mut self) -> Result<(), ChatError> {
        self.stream
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(ChatError::from)
    }

    /// Receive the next frame. Returns `None` on a clean server close.
    ///
    /// Malformed text frames are logged and reported as keepalives; they
    /// never reach the reconciliation engine.
    pub async fn next_frame(&mut self) -> Result<Option<SocketFrame>, ChatError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    match serde_json::from_str::<PushEvent>(&text) {
                        Ok(event) => return Ok(Some(SocketFrame::Event(event))),
                        Err(e) => {
                            tracing::warn!("Dropping malformed push payload: {}", e);
                            return Ok(Some(SocketFrame::Keepalive));
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(ChatError::from)?;
                    return Ok(Some(SocketFrame::Keepalive));
                }
                Some(Ok(Message::Pong(_))) => {
                    return Ok(Some(SocketFrame::Keepalive));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(ChatError::from(e));
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }
}
