//! HTTP server setup and routing

use crate::error::{Error, Result};
use crate::playback::Transport;
use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub transport: Arc<Transport>,
    pub state: Arc<SharedState>,
}

impl AppContext {
    pub fn new(transport: Arc<Transport>) -> Self {
        let state = transport.shared_state();
        Self { transport, state }
    }
}

/// Build the router with all routes attached
pub fn create_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/status", get(super::handlers::get_status))
        .route("/tracks/:track_id", get(super::handlers::get_track))
        .route("/tracks/:track_id/toggle", post(super::handlers::toggle_track))
        .route("/tracks/:track_id/level", post(super::handlers::set_track_level))
        .route("/mute-all", post(super::handlers::mute_all))
        .route("/reset", post(super::handlers::reset))
        .route("/master/toggle", post(super::handlers::toggle_master))
        .route("/master/pause", post(super::handlers::pause_master))
        .route("/master/resume", post(super::handlers::resume_master))
        .route("/audio/devices", get(super::handlers::list_audio_devices))
        .route("/events", get(super::sse::event_stream));

    Router::new()
        .route("/health", get(super::handlers::health))
        .nest("/api/v1", api)
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the control surface until `shutdown` resolves
pub async fn run<F>(bind_addr: &str, ctx: AppContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid bind address '{}': {}", bind_addr, e)))?;

    let app = create_router(ctx);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
