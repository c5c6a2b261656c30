pub mod api_routes;
pub mod ws_routes;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::ChatSession;
use api_routes::{
    clear_handler, connection_handler, history_handler, list_models_handler,
    model_details_handler, set_host_handler, set_model_handler, status_handler, stop_handler,
};
use ws_routes::ws_chat_handler;

/// Panel backend: JSON endpoints for the controls plus the streaming socket.
pub fn router(session: ChatSession) -> Router {
    Router::new()
        .route("/api/models", get(list_models_handler))
        .route("/api/models/details", get(model_details_handler))
        .route("/api/connection", get(connection_handler))
        .route("/api/status", get(status_handler))
        .route("/api/model", put(set_model_handler))
        .route("/api/host", put(set_host_handler))
        .route("/api/clear", post(clear_handler))
        .route("/api/stop", post(stop_handler))
        .route("/api/history", get(history_handler))
        .route("/ws/chat", get(ws_chat_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(session)
}
