use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::state::AppState;
use super::{http, ws};

/// Build the complete axum Router: WebSocket relay, polling API, health.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::handler))
        .route("/health", get(http::health))
        .nest("/api", http::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
