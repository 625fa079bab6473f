/// GrokGate Server
///
/// OpenAI-compatible gateway in front of the Grok streaming dialect:
/// - /v1 chat-completion surface (SSE streaming and JSON)
/// - /images asset proxy
/// - /admin operational surface (settings, stats, batch tasks)

use axum::{
    routing::{get, post},
    Json, Router,
};
use grokgate_core::infrastructure::upstream::{UpstreamClient, UpstreamConfig};
use grokgate_core::service::batch::BatchTaskRegistry;
use grokgate_core::service::logs::RequestLogStore;
use grokgate_core::service::progress::RefreshProgressStore;
use grokgate_core::service::settings::SettingsService;
use grokgate_core::service::tokens::TokenPool;
use grokgate_core::SqliteStore;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use anyhow::Result;

mod routes;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: SettingsService,
    pub registry: BatchTaskRegistry,
    pub logs: RequestLogStore,
    pub progress: RefreshProgressStore,
    pub tokens: Arc<TokenPool>,
    pub upstream: Arc<UpstreamClient>,
    pub app_start_time: std::time::Instant,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

/// Health check handler
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.app_start_time.elapsed().as_secs(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("GrokGate Server v{}", env!("CARGO_PKG_VERSION"));

    let db_path = std::env::var("GROKGATE_DB").unwrap_or_else(|_| "grokgate.db".to_string());
    let store = SqliteStore::open(&PathBuf::from(&db_path))?;

    let settings = SettingsService::new(store.clone());
    let bundle = settings.load().await?;

    let upstream = Arc::new(UpstreamClient::new(UpstreamConfig {
        base_url: bundle.grok.base_url.clone(),
        user_agent: bundle.grok.user_agent.clone(),
        proxy_url: (!bundle.grok.proxy_url.is_empty()).then(|| bundle.grok.proxy_url.clone()),
        ..UpstreamConfig::default()
    }));

    let app_state = AppState {
        settings,
        registry: BatchTaskRegistry::new(),
        logs: RequestLogStore::new(store.clone()),
        progress: RefreshProgressStore::new(store),
        tokens: Arc::new(TokenPool::from_settings(&bundle.token)),
        upstream,
        app_start_time: std::time::Instant::now(),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/v1/chat/completions", post(routes::chat::chat_completions))
        .route("/v1/models", get(routes::chat::list_models))
        .route("/images/:encoded", get(routes::images::proxy_asset))
        .route(
            "/admin/settings",
            get(routes::admin::get_settings).put(routes::admin::save_settings),
        )
        .route("/admin/stats", get(routes::admin::stats))
        .route("/admin/refresh/progress", get(routes::admin::refresh_progress))
        .route("/admin/tokens/refresh", post(routes::admin::start_token_refresh))
        .route("/admin/tasks/:id/stream", get(routes::admin::task_stream))
        .route("/admin/tasks/:id/cancel", post(routes::admin::cancel_task))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let port = std::env::var("GROKGATE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000u16);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Server started: http://{}", addr);
    tracing::info!("Chat endpoint: http://{}/v1/chat/completions", addr);
    tracing::info!("Database: {}", db_path);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
