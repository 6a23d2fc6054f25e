//! HTTP/JSON gateway in front of the RPC server

use super::error::ServiceError;
use super::handlers::{DeleteTrackById, FindTrackByFingerprint, LoadTrackByUrl};
use crate::rpc::{RpcChannel, RpcHandler};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct GatewayState {
    pub channel: RpcChannel,
    pub started: Instant,
}

impl GatewayState {
    pub fn new(channel: RpcChannel) -> Self {
        Self {
            channel,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /health
pub async fn health_check(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let status = if state.channel.is_accepting() {
        "ok"
    } else {
        "shutting_down"
    };
    Json(HealthResponse {
        status: status.to_string(),
        module: "siren-fingerprint".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
    })
}

async fn forward<H: RpcHandler>(state: &GatewayState, body: Value) -> Result<Json<Value>, ServiceError> {
    let reply = state.channel.call(H::METHOD, body).await?;
    Ok(Json(reply))
}

/// POST /v1/tracks/load
pub async fn load_track(
    State(state): State<GatewayState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ServiceError> {
    forward::<LoadTrackByUrl>(&state, body).await
}

/// POST /v1/tracks/find
pub async fn find_track(
    State(state): State<GatewayState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ServiceError> {
    forward::<FindTrackByFingerprint>(&state, body).await
}

/// POST /v1/tracks/delete
pub async fn delete_track(
    State(state): State<GatewayState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ServiceError> {
    forward::<DeleteTrackById>(&state, body).await
}

pub fn build_router(channel: RpcChannel) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/tracks/load", post(load_track))
        .route("/v1/tracks/find", post(find_track))
        .route("/v1/tracks/delete", post(delete_track))
        .layer(TraceLayer::new_for_http())
        .with_state(GatewayState::new(channel))
}
