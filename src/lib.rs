//! Chat panel backend for talking to an Ollama server.
//!
//! The core is [`service::ChatSession`], which owns the [`conversation::Conversation`]
//! and runs one streamed turn at a time against `/api/chat`. [`routes`] exposes the
//! session to a panel UI over HTTP and a WebSocket.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod models;
pub mod routes;
pub mod service;

pub use config::AppConfig;
pub use conversation::Conversation;
pub use errors::AppError;
pub use models::{ChatEvent, Message, MessageRole, ModelInfo, TurnId};
pub use service::{ChatSession, TurnEvents};
