//! Axum server wiring.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::routes;
use crate::state::AppState;

/// Build the API router.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/v2/threads",
            post(routes::create_thread).get(routes::list_threads),
        )
        .route(
            "/api/v2/threads/{id}",
            get(routes::get_thread).delete(routes::delete_thread),
        )
        .route("/api/v2/threads/{id}/messages", post(routes::add_message))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start_gateway(state: Arc<AppState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let app = api_router(state);

    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
