//! Batchwire notification server
//!
//! Axum server that accepts chunked uploads, hands them to the analysis
//! worker and pushes job outcomes to the owning user's WebSocket connections.

pub mod auth;
pub mod bridge;
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod routes;
pub mod staging;
pub mod state;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use config::ServerConfig;
use dispatch::{AnalysisDispatcher, HttpDispatcher, LogDispatcher};
use state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let chunk_limit = chunk_body_limit(state.staging.max_bytes());

    let api_routes = Router::new()
        .route(
            "/uploads/{task_id}/chunks",
            post(routes::uploads::upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route("/jobs/{task_id}", get(routes::jobs::get_job))
        .route("/session", get(routes::session::current_session))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .route("/ws", get(websocket::ws_handler))
        .route("/internal/jobs/finished", post(routes::internal::job_finished))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Largest JSON body for one chunk: a whole upload in base64 plus the envelope.
fn chunk_body_limit(max_upload_bytes: u64) -> usize {
    let encoded = max_upload_bytes.saturating_add(2) / 3 * 4;
    usize::try_from(encoded.saturating_add(64 * 1024)).unwrap_or(usize::MAX)
}

/// Run the notification server until it fails.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let dispatcher: Arc<dyn AnalysisDispatcher> = match &config.worker_url {
        Some(url) => Arc::new(HttpDispatcher::new(url)),
        None => {
            tracing::warn!("No worker_url configured, uploaded artifacts will be dropped");
            Arc::new(LogDispatcher)
        }
    };

    if config.internal_token.is_empty() {
        tracing::warn!("internal_token is empty, job reports will be refused");
    }
    if config.sessions.is_empty() {
        tracing::warn!("No sessions configured, every client request will be rejected");
    }

    let state = AppState::new(&config, dispatcher);

    let staging = Arc::clone(&state.staging);
    let ttl = Duration::from_secs(config.staging_ttl_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ttl);
        loop {
            interval.tick().await;
            staging.purge_older_than(ttl).await;
        }
    });

    let app = create_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Notification server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
