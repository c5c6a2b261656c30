pub mod ndjson;

use std::time::Duration;

use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::models::{ChatRequest, Message, ModelInfo, TagsResponse};

/// Offered when the host cannot be asked for its models.
pub const FALLBACK_MODELS: [&str; 3] = ["llama3.2", "llama2", "mistral"];

const USER_AGENT: &str = "OSS-Chat-Extension/1.0";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);
const CHAT_TIMEOUT: Duration = Duration::from_secs(120);

/// Thin HTTP client for the two Ollama endpoints the chat panel uses.
///
/// The host is passed per call because the session lets it change between
/// requests.
#[derive(Clone)]
pub struct OllamaAgentService {
    http: reqwest::Client,
}

impl OllamaAgentService {
    pub fn new() -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Unexpected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// `GET {host}/api/tags`, in the order the host lists them.
    pub async fn list_models(&self, host: &str) -> Result<Vec<ModelInfo>, AppError> {
        let url = format!("{host}/api/tags");
        info!("Fetching models from: {url}");

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .timeout(MODEL_LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::from_transport(host, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::http_status(status));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| AppError::from_transport(host, &e))?;
        info!("Found {} models at {host}", tags.models.len());
        Ok(tags.models)
    }

    /// Succeeds iff the host answers `GET /api/tags` with a success status.
    pub async fn ping(&self, host: &str) -> Result<(), AppError> {
        let url = format!("{host}/api/tags");
        info!("Testing connection to: {url}");

        let response = self
            .http
            .get(&url)
            .timeout(CONNECTION_TEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::from_transport(host, &e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AppError::http_status(status))
        }
    }

    /// Runs one streamed `POST {host}/api/chat` and returns the full reply.
    ///
    /// Cancelling `cancel` aborts both the pending request and the body read.
    pub async fn stream_chat(
        &self,
        host: &str,
        model: &str,
        history: &[Message],
        cancel: &CancellationToken,
        on_partial: impl FnMut(&str),
    ) -> Result<String, AppError> {
        let url = format!("{host}/api/chat");
        let body = ChatRequest {
            model,
            messages: history.iter().map(Message::to_wire).collect(),
            stream: true,
        };
        info!("Sending {} messages to: {url} (model {model})", body.messages.len());

        let request = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .timeout(CHAT_TIMEOUT)
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            response = request => response.map_err(|e| AppError::from_transport(host, &e))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::http_status(status));
        }
        debug!("Chat stream opened with status {status}");

        ndjson::read_chat_stream(response, host, cancel, on_partial).await
    }
}
