//! HTTP server setup and routing

use crate::engine::SessionEngine;
use crate::error::{Error, Result};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub engine: Arc<SessionEngine>,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    pub fn new(engine: Arc<SessionEngine>) -> Self {
        Self {
            engine,
            started_at: Utc::now(),
        }
    }
}

/// Build the router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health endpoint
        .route("/health", get(super::handlers::health))

        // Playlist refresh and playback control
        .route("/refresh-site", post(super::handlers::refresh_site))
        .route("/playback", post(super::handlers::playback))
        .route("/track-added", post(super::handlers::track_added))

        // Track suggestions
        .route("/track-suggestions/last-suggested", get(super::handlers::last_suggested))
        .route(
            "/track-suggestions/params",
            get(super::handlers::get_params).put(super::handlers::put_params),
        )

        // Device session
        .route("/session/status", get(super::handlers::session_status))
        .route("/session/reset", post(super::handlers::session_reset))

        // SSE event stream
        .route("/events", get(super::sse::event_stream))

        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run HTTP API server until `shutdown` resolves
pub async fn run(
    engine: Arc<SessionEngine>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(AppContext::new(engine));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
