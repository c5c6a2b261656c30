use tracing::{info, warn};

use oss_chat::routes::router;
use oss_chat::service::uses_fallback_models;
use oss_chat::{AppConfig, ChatSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oss_chat=debug,tower_http=debug".into()),
        )
        .init();

    // ── Session ───────────────────────────────────────────────────────────────
    let config = AppConfig::from_env();
    let session = ChatSession::new(&config)?;
    info!(
        "Chat session ready for {} (model: {})",
        session.host(),
        session.current_model().as_deref().unwrap_or("<none>")
    );

    if session.test_connection().await {
        let models = session.list_models().await;
        if uses_fallback_models(&models) {
            warn!("Using fallback models, check the connection to load the real list");
        } else {
            info!("Loaded {} models from Ollama", models.len());
        }
        if session.current_model().is_none() {
            if let Some(first) = models.first() {
                session.set_model(first.clone());
            }
        }
    } else {
        warn!("Ollama is not reachable at {}; chat requests will fail until it is", session.host());
    }

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, router(session)).await?;
    Ok(())
}
