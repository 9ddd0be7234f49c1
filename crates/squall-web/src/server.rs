//! Axum server setup and router construction.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::api::{self, AppState};

/// Build the full axum router.
///
/// - Streams at `/api/weather/{current,forecast,historical,progress}` and
///   `/api/chat`
/// - Registry diagnostics at `/api/stats` and `/api/streams`
pub fn build_router(state: AppState) -> Router {
    // Browsers on other origins consume the event streams directly.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/stats", get(api::get_stats))
        .route("/api/streams", get(api::get_streams))
        .route("/api/weather/current", get(api::get_current))
        .route("/api/weather/forecast", get(api::get_forecast))
        .route("/api/weather/historical", get(api::get_historical))
        .route("/api/weather/progress", get(api::get_progress))
        .route("/api/chat", post(api::post_chat))
        .with_state(state)
        .layer(cors)
}

/// Bind `bind_addr`, serve `router` on a background task, and return the
/// bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "Stream server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Stream server stopped: {e}");
        }
    });

    Ok(addr)
}
