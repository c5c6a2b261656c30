use axum::extract::State;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::TurnId;
use crate::service::ChatSession;

// ── Request / response bodies ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ModelForm {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct HostForm {
    pub host: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub host: String,
    pub connected: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatus {
    pub host: String,
    pub model: Option<String>,
    pub generating: bool,
    pub turn: Option<TurnId>,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET `/api/models` — model names for the dropdown, never fails
pub async fn list_models_handler(State(svc): State<ChatSession>) -> impl IntoResponse {
    Json(svc.list_models().await)
}

/// GET `/api/models/details` — names and sizes straight from the host
pub async fn model_details_handler(State(svc): State<ChatSession>) -> Response {
    match svc.available_models().await {
        Ok(models) => Json(models).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET `/api/connection`
pub async fn connection_handler(State(svc): State<ChatSession>) -> impl IntoResponse {
    let host = svc.host();
    let connected = svc.test_connection().await;
    Json(ConnectionStatus { host, connected })
}

/// GET `/api/status`
pub async fn status_handler(State(svc): State<ChatSession>) -> impl IntoResponse {
    Json(SessionStatus {
        host: svc.host(),
        model: svc.current_model(),
        generating: svc.is_generating(),
        turn: svc.current_turn(),
    })
}

/// PUT `/api/model`
pub async fn set_model_handler(
    State(svc): State<ChatSession>,
    Json(form): Json<ModelForm>,
) -> Response {
    let model = form.model.trim();
    if model.is_empty() {
        return error_response(&AppError::EmptyField { field_name: "model".to_string() });
    }
    svc.set_model(model);
    StatusCode::NO_CONTENT.into_response()
}

/// PUT `/api/host`
pub async fn set_host_handler(
    State(svc): State<ChatSession>,
    Json(form): Json<HostForm>,
) -> Response {
    if form.host.trim().is_empty() {
        return error_response(&AppError::EmptyField { field_name: "host".to_string() });
    }
    svc.set_host(&form.host);
    StatusCode::NO_CONTENT.into_response()
}

/// POST `/api/clear`
pub async fn clear_handler(State(svc): State<ChatSession>) -> StatusCode {
    svc.clear_conversation();
    StatusCode::NO_CONTENT
}

/// POST `/api/stop`
pub async fn stop_handler(State(svc): State<ChatSession>) -> StatusCode {
    svc.stop_generation();
    StatusCode::NO_CONTENT
}

/// GET `/api/history` — transcript without the system prompt
pub async fn history_handler(State(svc): State<ChatSession>) -> impl IntoResponse {
    Json(svc.transcript())
}

// ── Helper ────────────────────────────────────────────────────────────────────

/// Seconds a panel should wait before retrying a transient failure.
const RETRY_AFTER_SECS: &str = "5";

fn error_response(err: &AppError) -> Response {
    let status = if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_agent_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else if matches!(err, AppError::HttpStatus { .. } | AppError::Decode { .. }) {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let mut response = (status, err.to_string()).into_response();
    if err.is_transient() {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
    }
    response
}
