use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MessageRole {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// One entry of a conversation. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Informational only; insertion order is what orders a conversation.
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn to_wire(&self) -> WireMessage<'_> {
        WireMessage { role: self.role, content: &self.content }
    }
}

/// Model metadata advertised by `GET /api/tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    /// Size on disk in bytes, used only for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ModelInfo {
    /// Human-readable size such as `4.1GB`, or `None` when the host did not report one.
    pub fn size_label(&self) -> Option<String> {
        const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
        self.size
            .filter(|bytes| *bytes > 0)
            .map(|bytes| format!("{:.1}GB", bytes as f64 / GIB))
    }
}

// ── Turn events ──────────────────────────────────────────────────────────────

/// Sequence number identifying one `send_message` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Progress of a single turn.
///
/// Zero or more `Partial` events are followed by exactly one terminal
/// `Completed` or `Failed` event. Each partial text is a prefix of the next.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Partial { turn: TurnId, text: String },
    Completed { turn: TurnId, text: String },
    Failed { turn: TurnId, error: AppError },
}

impl ChatEvent {
    pub fn turn(&self) -> TurnId {
        match self {
            ChatEvent::Partial { turn, .. }
            | ChatEvent::Completed { turn, .. }
            | ChatEvent::Failed { turn, .. } => *turn,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, ChatEvent::Partial { .. })
    }

    /// Text handed to a `(text, final)` callback.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            ChatEvent::Partial { text, .. } | ChatEvent::Completed { text, .. } => {
                Cow::Borrowed(text)
            }
            ChatEvent::Failed { error, .. } => Cow::Owned(error.to_string()),
        }
    }
}

// ── Ollama wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct WireMessage<'a> {
    pub role: MessageRole,
    pub content: &'a str,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage<'a>>,
    pub stream: bool,
}

/// Body of `GET /api/tags`.
#[derive(Debug, Default, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// One newline-delimited object of a streamed `/api/chat` response.
#[derive(Debug, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: String,
}
