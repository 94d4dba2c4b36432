use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use super::state::AppState;
use crate::error::{RelayError, Result};
use crate::types::{
    AckResponse, CreateResponse, HealthResponse, PollResponse, RoleRequest, SendRequest,
};

/// Build the polling API and admin routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rooms", post(create))
        .route("/rooms/:code", delete(close))
        .route("/rooms/:code/join", post(join))
        .route("/rooms/:code/send", post(send))
        .route("/rooms/:code/poll", get(poll))
        .route("/rooms/:code/leave", post(leave))
}

/// POST /api/rooms - Create a polled session; the caller becomes host.
pub async fn create(State(state): State<AppState>) -> Result<Json<CreateResponse>> {
    Ok(Json(state.polls.create().await?))
}

/// POST /api/rooms/:code/join - Join as the polled client.
pub async fn join(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<AckResponse>> {
    Ok(Json(state.polls.join(&code).await?))
}

/// POST /api/rooms/:code/send - Queue a payload for the other role.
pub async fn send(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<SendRequest>,
) -> Result<Json<AckResponse>> {
    Ok(Json(
        state.polls.send(&code, request.role, request.data).await?,
    ))
}

/// GET /api/rooms/:code/poll?role=host|client - Drain queued messages.
pub async fn poll(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(request): Query<RoleRequest>,
) -> Result<Json<PollResponse>> {
    Ok(Json(state.polls.poll(&code, request.role).await?))
}

/// POST /api/rooms/:code/leave - Leave the session.
pub async fn leave(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<RoleRequest>,
) -> Result<Json<AckResponse>> {
    Ok(Json(state.polls.leave(&code, request.role).await?))
}

/// DELETE /api/rooms/:code - Administrative close; notifies and disconnects both peers.
pub async fn close(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<AckResponse>> {
    let evicted = state
        .registry()
        .close(&code, "closed")
        .await
        .ok_or_else(|| RelayError::NotFound(code.clone()))?;
    for conn in &evicted.peers {
        conn.close();
    }
    Ok(Json(AckResponse { ok: true }))
}

/// GET /health - Session count, liveness settings and a timestamp.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.engine.stats().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: stats.sessions,
        peers: stats.peers,
        probe_interval_secs: state.config.probe_interval_secs,
        idle_timeout_secs: state.config.idle_timeout_secs,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
