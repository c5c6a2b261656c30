use thiserror::Error;

/// Top-level application error.
///
/// Every variant renders to the human-readable text that is delivered through
/// the terminal chat callback, so the payloads are plain owned data and the
/// enum stays `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    // ── Turn preconditions ───────────────────────────────────────────────────
    #[error("Error: No model selected")]
    NoModelSelected,

    #[error("Error: A response is already being generated")]
    Busy,

    #[error("Generation stopped")]
    Cancelled,

    // ── Ollama errors ────────────────────────────────────────────────────────
    #[error("Error: Empty response from model")]
    EmptyResponse,

    #[error("HTTP Error: {status} - {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("Error communicating with Ollama at {host}: {message}")]
    Connection { host: String, message: String },

    #[error("Error: Request to Ollama at {host} timed out")]
    Timeout { host: String },

    #[error("Error decoding response from Ollama: {message}")]
    Decode { message: String },

    #[error("Ollama error: {message}")]
    ModelError { message: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    /// Classifies a transport-level failure talking to `host`.
    pub fn from_transport(host: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout { host: host.to_string() }
        } else if let Some(status) = err.status() {
            AppError::http_status(status)
        } else if err.is_decode() {
            AppError::Decode { message: err.to_string() }
        } else if err.is_connect() || err.is_request() || err.is_body() {
            AppError::Connection { host: host.to_string(), message: err.to_string() }
        } else {
            AppError::Unexpected(err.to_string())
        }
    }

    /// Classifies an I/O failure raised while reading a response body.
    pub fn from_body_io(host: &str, err: &std::io::Error) -> Self {
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<reqwest::Error>()) {
            AppError::from_transport(host, inner)
        } else if err.kind() == std::io::ErrorKind::InvalidData {
            AppError::Decode { message: err.to_string() }
        } else {
            AppError::Connection { host: host.to_string(), message: err.to_string() }
        }
    }

    pub fn http_status(status: reqwest::StatusCode) -> Self {
        AppError::HttpStatus {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::EmptyField { .. })
    }

    pub fn is_agent_unavailable(&self) -> bool {
        matches!(self, AppError::Connection { .. } | AppError::Timeout { .. })
    }

    /// Failures that may go away by simply retrying the same turn.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            AppError::Busy | AppError::Connection { .. } | AppError::Timeout { .. } => true,
            _ => false,
        }
    }
}
