//! Persistent inference channel: one WebSocket connection carries many
//! logical requests.
//!
//! Inbound messages are JSON with a `type` field; each `generate` message is
//! validated independently and dispatched to the orchestrator in its own
//! task. Outbound `token`/`complete`/`error` events are tagged per message;
//! request-level failures never close the connection.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::orchestrator::{self, FragmentSink, SinkClosed};
use crate::request::InferenceRequest;
use crate::state::AppState;

/// Messages sent from client to gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start a generation for the contained request.
    Generate(InferenceRequest),
}

/// Messages sent from gateway to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One fragment of generated text.
    Token { token: String },
    /// Generation finished; carries the full reply and its session.
    Complete { message: String, session_id: String },
    /// A request-level failure. The connection stays open.
    Error { error: String },
}

/// Build the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Sink that frames orchestrator events as outbound WebSocket messages.
struct WsSink {
    tx: mpsc::Sender<ServerMessage>,
}

#[async_trait]
impl FragmentSink for WsSink {
    async fn fragment(&mut self, text: &str) -> std::result::Result<(), SinkClosed> {
        self.tx
            .send(ServerMessage::Token {
                token: text.to_string(),
            })
            .await
            .map_err(|_| SinkClosed)
    }

    async fn complete(
        &mut self,
        message: &str,
        session_id: &str,
    ) -> std::result::Result<(), SinkClosed> {
        self.tx
            .send(ServerMessage::Complete {
                message: message.to_string(),
                session_id: session_id.to_string(),
            })
            .await
            .map_err(|_| SinkClosed)
    }

    async fn error(&mut self, error: &Error) -> std::result::Result<(), SinkClosed> {
        self.tx
            .send(ServerMessage::Error {
                error: error.to_string(),
            })
            .await
            .map_err(|_| SinkClosed)
    }
}

/// Handle one client connection until it closes.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("WebSocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // All in-flight requests for this connection funnel their outbound
    // events through one channel; per-request ordering is preserved.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);

    loop {
        tokio::select! {
            // Outbound events (orchestrator to client)
            Some(msg) = rx.recv() => {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to encode outbound message: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }

            // Inbound messages (client to gateway)
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&text, state.clone(), tx.clone());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore binary, pong, etc.
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            else => break,
        }
    }

    tracing::info!("WebSocket client disconnected");
}

/// Parse and dispatch one inbound message.
///
/// Each generate request runs in its own task so a long generation never
/// blocks the connection loop. A malformed payload comes back as an error
/// event, not a closed connection.
fn dispatch(text: &str, state: Arc<AppState>, tx: mpsc::Sender<ServerMessage>) {
    let request = match parse_generate(text) {
        Ok(request) => request,
        Err(e) => {
            let error = e.to_string();
            tokio::spawn(async move {
                let _ = tx.send(ServerMessage::Error { error }).await;
            });
            return;
        }
    };

    tokio::spawn(async move {
        let mut sink = WsSink { tx };
        orchestrator::handle(state, request, &mut sink).await;
    });
}

/// A malformed payload maps to the same error variant the rest of the
/// gateway reports validation failures with.
fn parse_generate(text: &str) -> Result<InferenceRequest> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Generate(request)) => Ok(request),
        Err(e) => Err(Error::InvalidRequest(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let json = r#"{"type": "generate", "prompt": "Hello", "max_tokens": 32}"#;
        let ClientMessage::Generate(request) = serde_json::from_str(json).unwrap();
        assert_eq!(request.prompt, "Hello");
        assert_eq!(request.max_tokens, 32);
    }

    #[test]
    fn test_client_message_rejects_unknown_type() {
        let json = r#"{"type": "shutdown"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn test_malformed_payload_maps_to_invalid_request() {
        let err = parse_generate("not json").unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(err.to_string().starts_with("Invalid request: "));
    }

    #[test]
    fn test_token_event_shape() {
        let msg = ServerMessage::Token {
            token: "Hel".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"token","token":"Hel"}"#
        );
    }

    #[test]
    fn test_complete_event_shape() {
        let msg = ServerMessage::Complete {
            message: "Hello".to_string(),
            session_id: "s1".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"complete","message":"Hello","session_id":"s1"}"#
        );
    }

    #[test]
    fn test_error_event_shape() {
        let msg = ServerMessage::Error {
            error: "Request queue is full.".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"error","error":"Request queue is full."}"#
        );
    }
}
