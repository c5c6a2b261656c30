#![allow(dead_code)]

use std::time::Duration;

use oss_chat::{AppConfig, ChatSession};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SYSTEM_PROMPT: &str = "You are a test assistant.";

/// Mock Ollama server for exercising the chat session end to end.
pub struct OllamaMock {
    server: MockServer,
}

impl OllamaMock {
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Streams `lines` as an NDJSON body from `POST /api/chat`.
    pub async fn mock_chat_stream(&self, lines: &[&str]) {
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ndjson_response(lines))
            .mount(&self.server)
            .await;
    }

    /// Same as [`OllamaMock::mock_chat_stream`] but answers only once, ahead of other mocks.
    pub async fn mock_chat_stream_once(&self, lines: &[&str]) {
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ndjson_response(lines))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Serves `body` verbatim, for streams that are not valid text.
    pub async fn mock_chat_bytes(&self, body: Vec<u8>) {
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_chat_stream_delayed(&self, lines: &[&str], delay: Duration) {
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ndjson_response(lines).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_chat_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_tags(&self, body: Value) {
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_tags_raw(&self, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(status).set_body_raw(body, "application/json"))
            .mount(&self.server)
            .await;
    }

    /// JSON bodies of every `POST /api/chat` received so far.
    pub async fn chat_requests(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == "/api/chat")
            .map(|r| serde_json::from_slice(&r.body).expect("chat request body is JSON"))
            .collect()
    }
}

pub fn ndjson_response(lines: &[&str]) -> ResponseTemplate {
    let mut body = lines.join("\n");
    body.push('\n');
    ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson")
}

pub fn tags_body() -> Value {
    json!({
        "models": [
            { "name": "llama3.2:latest", "size": 2019393189u64, "digest": "a80c4f17acd5" },
            { "name": "mistral:7b", "size": 4109865159u64 },
            { "name": "qwen2.5:0.5b" }
        ]
    })
}

pub fn session_with(host: &str, model: Option<&str>, system_prompt: Option<&str>) -> ChatSession {
    let config = AppConfig {
        host: host.to_string(),
        default_model: model.map(str::to_string),
        system_prompt: system_prompt.map(str::to_string),
        port: 0,
    };
    ChatSession::new(&config).expect("session builds inside the test runtime")
}

pub fn session_for(host: &str) -> ChatSession {
    session_with(host, Some("llama3.2"), Some(SYSTEM_PROMPT))
}

/// Collects the `(text, final)` callbacks of one turn until its final one.
pub struct UpdateCollector {
    rx: mpsc::UnboundedReceiver<(String, bool)>,
}

impl UpdateCollector {
    pub fn send(session: &ChatSession, text: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        session.send_message(text, move |update, is_final| {
            let _ = tx.send((update.to_string(), is_final));
        });
        Self { rx }
    }

    pub async fn until_final(mut self) -> Vec<(String, bool)> {
        let mut updates = Vec::new();
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("turn finished in time")
                .expect("final update was delivered");
            let is_final = next.1;
            updates.push(next);
            if is_final {
                return updates;
            }
        }
    }
}

pub async fn run_turn(session: &ChatSession, text: &str) -> Vec<(String, bool)> {
    UpdateCollector::send(session, text).until_final().await
}
