use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::models::{ChatEvent, TurnId};
use crate::service::ChatSession;

#[derive(Debug, Deserialize)]
pub struct WsChatRequest {
    pub message: String,
}

/// Frames pushed to the panel while a turn is streaming.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    StreamStart { turn: TurnId },
    /// `content` is the whole reply so far, not just the increment.
    StreamChunk { turn: TurnId, content: String },
    StreamEnd { turn: TurnId, full_content: String },
    Error { turn: Option<TurnId>, message: String },
}

impl From<ChatEvent> for WsEvent {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::Partial { turn, text } => WsEvent::StreamChunk { turn, content: text },
            ChatEvent::Completed { turn, text } => WsEvent::StreamEnd { turn, full_content: text },
            ChatEvent::Failed { turn, error } => WsEvent::Error {
                turn: Some(turn),
                message: error.to_string(),
            },
        }
    }
}

/// GET `/ws/chat` — upgrades to a WebSocket for streaming chat.
pub async fn ws_chat_handler(
    ws: WebSocketUpgrade,
    State(svc): State<ChatSession>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, svc))
}

/// Handles a single WebSocket connection.
///
/// Protocol:
/// - Client sends JSON `{ "message": "..." }`
/// - Server streams back:
///   1. `{ "type": "stream_start", "turn": n }`
///   2. `{ "type": "stream_chunk", "turn": n, "content": "..." }` (repeated)
///   3. `{ "type": "stream_end", "turn": n, "full_content": "..." }`
///      or `{ "type": "error", "turn": n, "message": "..." }` on failure.
///
/// A message sent while a turn is streaming gets an `error` frame without a
/// turn. Closing the socket mid-turn stops that turn.
async fn handle_socket(mut socket: WebSocket, svc: ChatSession) {
    info!("WebSocket client connected");

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!("WebSocket receive error: {e}");
                break;
            }
        };

        let text = match &msg {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        let request: WsChatRequest = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                send_event(&mut socket, &WsEvent::Error {
                    turn: None,
                    message: format!("Invalid request: {e}"),
                }).await;
                continue;
            }
        };

        let message = request.message.trim();
        if message.is_empty() {
            let err = AppError::EmptyField { field_name: "message".to_string() };
            send_event(&mut socket, &WsEvent::Error { turn: None, message: err.to_string() }).await;
            continue;
        }

        let mut events = svc.send_message_events(message);
        let turn = events.turn();
        let mut connected = send_event(&mut socket, &WsEvent::StreamStart { turn }).await;
        if !connected {
            svc.stop_turn(turn);
        }

        // Keep reading the socket while the turn streams so a client that
        // leaves stops its turn instead of waiting for the next frame.
        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else { break };
                    if connected && !send_event(&mut socket, &WsEvent::from(event)).await {
                        warn!("WebSocket client went away during turn {turn}, stopping it");
                        svc.stop_turn(turn);
                        connected = false;
                    }
                }
                incoming = socket.recv(), if connected => match incoming {
                    Some(Ok(Message::Text(_))) => {
                        let busy = WsEvent::Error { turn: None, message: AppError::Busy.to_string() };
                        if !send_event(&mut socket, &busy).await {
                            svc.stop_turn(turn);
                            connected = false;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client closed during turn {turn}, stopping it");
                        svc.stop_turn(turn);
                        connected = false;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error during turn {turn}: {e}");
                        svc.stop_turn(turn);
                        connected = false;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        if !connected {
            break;
        }
    }

    info!("WebSocket client disconnected");
}

/// Serializes a `WsEvent` and sends it; `false` once the socket is gone.
async fn send_event(socket: &mut WebSocket, event: &WsEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}
