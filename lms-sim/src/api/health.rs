//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Jobs known to the simulation
    pub jobs: usize,
    /// Open live sockets
    pub live_clients: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;
    let jobs = state.jobs.read().await.len();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "lms-sim".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        jobs,
        live_clients: state.event_bus.subscriber_count(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<crate::AppState> {
    Router::new().route("/health", get(health_check))
}
