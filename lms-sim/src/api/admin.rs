//! Event injection and connection control
//!
//! Lets tests and demos push notifications and analytics alerts, and
//! simulate dropped or revoked live connections.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use lms_common::events::{NotificationPayload, SignificantChange};
use lms_common::LiveEvent;
use serde_json::{json, Value};
use tracing::info;

use super::authorize;
use crate::{AdminSignal, ApiResult, AppState};

/// POST /api/notifications
pub async fn push_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NotificationPayload>,
) -> ApiResult<StatusCode> {
    authorize(&state, &headers)?;
    info!("Pushing notification {}", payload.id);
    state.event_bus.emit_lossy(LiveEvent::Notification(payload));
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/significant-changes
pub async fn push_significant_change(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(change): Json<SignificantChange>,
) -> ApiResult<StatusCode> {
    authorize(&state, &headers)?;
    info!("Pushing significant change: {}", change.message);
    state.event_bus.emit_lossy(LiveEvent::SignificantChange(change));
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/admin/drop-connections
pub async fn drop_connections(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authorize(&state, &headers)?;
    let sockets = state.admin.send(AdminSignal::DropConnections).unwrap_or(0);
    info!("Dropping {} live connections", sockets);
    Ok(Json(json!({ "dropped": sockets })))
}

/// POST /api/admin/revoke-auth
pub async fn revoke_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authorize(&state, &headers)?;
    let sockets = state.admin.send(AdminSignal::RevokeAuth).unwrap_or(0);
    info!("Revoking auth on {} live connections", sockets);
    Ok(Json(json!({ "revoked": sockets })))
}

/// Build admin routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", post(push_notification))
        .route("/api/significant-changes", post(push_significant_change))
        .route("/api/admin/drop-connections", post(drop_connections))
        .route("/api/admin/revoke-auth", post(revoke_auth))
}
