pub mod chat_session;

pub use chat_session::{fallback_models, uses_fallback_models, ChatSession, TurnEvents};
