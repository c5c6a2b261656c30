mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use oss_chat::routes::api_routes::{ConnectionStatus, SessionStatus};
use oss_chat::routes::router;
use oss_chat::routes::ws_routes::WsEvent;
use oss_chat::{ChatSession, Message, MessageRole, TurnId};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use common::{session_for, session_with, tags_body, OllamaMock};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_panel(session: ChatSession) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(session)).await.unwrap();
    });
    format!("http://{addr}")
}

async fn connect_chat_socket(panel: &str) -> WsClient {
    let url = format!("{}/ws/chat", panel.replacen("http://", "ws://", 1));
    let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    socket
}

async fn send_chat(socket: &mut WsClient, body: serde_json::Value) {
    socket.send(WsMessage::text(body.to_string())).await.unwrap();
}

/// Next JSON frame from the panel socket, skipping control frames.
async fn next_frame(socket: &mut WsClient) -> WsEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame arrived in time")
            .expect("socket still open")
            .unwrap();
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

#[tokio::test]
async fn models_endpoint_lists_host_models_or_fallback() {
    let ollama = OllamaMock::start().await;
    ollama.mock_tags(tags_body()).await;
    let panel = spawn_panel(session_for(&ollama.uri())).await;

    let models: Vec<String> = reqwest::get(format!("{panel}/api/models"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models, ["llama3.2:latest", "mistral:7b", "qwen2.5:0.5b"]);

    let offline = spawn_panel(session_for("http://127.0.0.1:1")).await;
    let models: Vec<String> = reqwest::get(format!("{offline}/api/models"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models, ["llama3.2", "llama2", "mistral"]);
}

#[tokio::test]
async fn model_details_maps_upstream_failures() {
    let ollama = OllamaMock::start().await;
    ollama.mock_tags_raw(500, "").await;
    let panel = spawn_panel(session_for(&ollama.uri())).await;
    let response = reqwest::get(format!("{panel}/api/models/details")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.headers()[RETRY_AFTER], "5");

    let offline = spawn_panel(session_for("http://127.0.0.1:1")).await;
    let response = reqwest::get(format!("{offline}/api/models/details")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()[RETRY_AFTER], "5");
}

#[tokio::test]
async fn model_details_does_not_invite_retry_of_client_errors() {
    let ollama = OllamaMock::start().await;
    ollama.mock_tags_raw(404, "").await;
    let panel = spawn_panel(session_for(&ollama.uri())).await;

    let response = reqwest::get(format!("{panel}/api/models/details")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.headers().get(RETRY_AFTER).is_none());
}

#[tokio::test]
async fn settings_endpoints_update_the_session() {
    let ollama = OllamaMock::start().await;
    ollama.mock_tags(tags_body()).await;
    let panel = spawn_panel(session_with("http://127.0.0.1:1", None, None)).await;
    let client = reqwest::Client::new();

    let blank = client
        .put(format!("{panel}/api/model"))
        .json(&json!({ "model": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let set = client
        .put(format!("{panel}/api/model"))
        .json(&json!({ "model": "mistral" }))
        .send()
        .await
        .unwrap();
    assert_eq!(set.status(), StatusCode::NO_CONTENT);

    let host = client
        .put(format!("{panel}/api/host"))
        .json(&json!({ "host": format!("{}/", ollama.uri()) }))
        .send()
        .await
        .unwrap();
    assert_eq!(host.status(), StatusCode::NO_CONTENT);

    let status: SessionStatus = client
        .get(format!("{panel}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.model.as_deref(), Some("mistral"));
    assert_eq!(status.host, ollama.uri());
    assert!(!status.generating);
    assert_eq!(status.turn, None);

    let connection: ConnectionStatus = client
        .get(format!("{panel}/api/connection"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(connection.connected);
}

#[tokio::test]
async fn history_hides_system_prompt_and_clear_empties_it() {
    let ollama = OllamaMock::start().await;
    ollama
        .mock_chat_stream(&[r#"{"message":{"content":"Hi there"}}"#, r#"{"done":true}"#])
        .await;
    let session = session_for(&ollama.uri());
    session.chat("hello").await.unwrap();
    let panel = spawn_panel(session.clone()).await;
    let client = reqwest::Client::new();

    let history: Vec<Message> = client
        .get(format!("{panel}/api/history"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let roles: Vec<_> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, [MessageRole::User, MessageRole::Assistant]);
    assert_eq!(history[1].content, "Hi there");

    let cleared = client.post(format!("{panel}/api/clear")).send().await.unwrap();
    assert_eq!(cleared.status(), StatusCode::NO_CONTENT);
    assert_eq!(session.history().len(), 1);

    let stopped = client.post(format!("{panel}/api/stop")).send().await.unwrap();
    assert_eq!(stopped.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn chat_socket_streams_one_turn() {
    let ollama = OllamaMock::start().await;
    ollama
        .mock_chat_stream(&[
            r#"{"message":{"content":"Hel"}}"#,
            r#"{"message":{"content":"lo"}}"#,
            r#"{"done":true}"#,
        ])
        .await;
    let session = session_for(&ollama.uri());
    let panel = spawn_panel(session.clone()).await;
    let mut socket = connect_chat_socket(&panel).await;

    send_chat(&mut socket, json!({ "message": "hi" })).await;

    let WsEvent::StreamStart { turn } = next_frame(&mut socket).await else {
        panic!("turn did not start with stream_start");
    };
    assert_eq!(
        next_frame(&mut socket).await,
        WsEvent::StreamChunk { turn, content: "Hel".into() }
    );
    assert_eq!(
        next_frame(&mut socket).await,
        WsEvent::StreamChunk { turn, content: "Hello".into() }
    );
    assert_eq!(
        next_frame(&mut socket).await,
        WsEvent::StreamEnd { turn, full_content: "Hello".into() }
    );
    assert_eq!(session.history().len(), 3);
    assert!(!session.is_generating());
}

#[tokio::test]
async fn chat_socket_rejects_blank_and_invalid_messages() {
    let panel = spawn_panel(session_for("http://127.0.0.1:1")).await;
    let mut socket = connect_chat_socket(&panel).await;

    send_chat(&mut socket, json!({ "message": "   " })).await;
    assert_eq!(
        next_frame(&mut socket).await,
        WsEvent::Error { turn: None, message: "Field 'message' cannot be empty".into() }
    );

    send_chat(&mut socket, json!({ "text": "hi" })).await;
    let WsEvent::Error { turn: None, message } = next_frame(&mut socket).await else {
        panic!("malformed request was not rejected");
    };
    assert!(message.starts_with("Invalid request"), "{message}");
}

#[tokio::test]
async fn chat_socket_reports_busy_while_a_turn_streams() {
    let ollama = OllamaMock::start().await;
    ollama
        .mock_chat_stream_delayed(
            &[r#"{"message":{"content":"ok"}}"#, r#"{"done":true}"#],
            Duration::from_millis(500),
        )
        .await;
    let session = session_for(&ollama.uri());
    let panel = spawn_panel(session.clone()).await;
    let mut socket = connect_chat_socket(&panel).await;

    send_chat(&mut socket, json!({ "message": "first" })).await;
    let WsEvent::StreamStart { turn } = next_frame(&mut socket).await else {
        panic!("turn did not start with stream_start");
    };
    send_chat(&mut socket, json!({ "message": "second" })).await;
    assert_eq!(
        next_frame(&mut socket).await,
        WsEvent::Error {
            turn: None,
            message: "Error: A response is already being generated".into(),
        }
    );

    assert_eq!(
        next_frame(&mut socket).await,
        WsEvent::StreamChunk { turn, content: "ok".into() }
    );
    assert_eq!(
        next_frame(&mut socket).await,
        WsEvent::StreamEnd { turn, full_content: "ok".into() }
    );
    let contents: Vec<_> = session.history().into_iter().map(|m| m.content).collect();
    assert_eq!(contents[1..], ["first", "ok"]);
}

#[tokio::test]
async fn closing_chat_socket_stops_its_turn() {
    let ollama = OllamaMock::start().await;
    ollama
        .mock_chat_stream_delayed(&[r#"{"done":true}"#], Duration::from_secs(30))
        .await;
    let session = session_for(&ollama.uri());
    let panel = spawn_panel(session.clone()).await;
    let mut socket = connect_chat_socket(&panel).await;

    send_chat(&mut socket, json!({ "message": "hi" })).await;
    let WsEvent::StreamStart { turn } = next_frame(&mut socket).await else {
        panic!("turn did not start with stream_start");
    };
    assert_eq!(session.current_turn(), Some(turn));
    assert_ne!(turn, TurnId(0));

    socket.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while session.is_generating() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("turn stopped after the client left");
    // Only the user message was stored; the cancelled reply was not.
    assert_eq!(session.history().len(), 2);
}
