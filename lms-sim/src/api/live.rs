//! Live analysis WebSocket endpoint
//!
//! `GET /live/analysis?userId=<id>` with `Authorization: Bearer <token>`.
//! Each socket keeps its own set of tracked jobs; `progress` pushes are
//! forwarded only for those. Notifications are forwarded when they are
//! addressed to the socket's user (or to nobody in particular), and
//! significant changes go to everyone.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use lms_common::events::names;
use lms_common::{Frame, LiveEvent, OutboundCommand};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::authorize;
use crate::{AdminSignal, ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// GET /live/analysis
pub async fn live_socket(
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> ApiResult<Response> {
    // Credentials are checked before the upgrade so a rejected client sees a plain 401
    authorize(&state, &headers)?;
    let user_id = query
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("userId query parameter is required".to_string()))?;
    let ws = ws.ok_or_else(|| ApiError::BadRequest("expected a WebSocket upgrade".to_string()))?;

    info!("Live connection opened for user {}", user_id);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, user_id: String) {
    let mut events = state.event_bus.subscribe();
    let mut admin = state.admin.subscribe();
    let mut tracked: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_command(&state, &mut tracked, &text).await {
                        if socket.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Live socket for {} errored: {}", user_id, e);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(event) => {
                    if !should_forward(&event, &tracked, &user_id) {
                        continue;
                    }
                    match event.to_frame().and_then(|frame| frame.to_text()) {
                        Ok(text) => {
                            if socket.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to encode {}: {}", event.event_name(), e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Live socket for {} lagged, {} events skipped", user_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            signal = admin.recv() => match signal {
                Ok(AdminSignal::DropConnections) => {
                    info!("Dropping live connection for {}", user_id);
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Ok(AdminSignal::RevokeAuth) => {
                    info!("Revoking live connection for {}", user_id);
                    let frame = Frame::new(names::AUTH_ERROR, json!({ "message": "token revoked" }));
                    if let Ok(text) = frame.to_text() {
                        let _ = socket.send(Message::Text(text)).await;
                    }
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Err(_) => {}
            },
        }
    }

    info!("Live connection closed for user {}", user_id);
}

/// Apply one client command; returns an immediate reply frame if any
async fn handle_command(
    state: &AppState,
    tracked: &mut HashSet<String>,
    text: &str,
) -> Option<String> {
    let command = match OutboundCommand::parse(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Ignoring malformed command: {}", e);
            return None;
        }
    };

    match command {
        OutboundCommand::TrackProgress { job_id, .. } => {
            debug!("Socket now tracking {}", job_id);
            tracked.insert(job_id.clone());
            // Send the current state right away so the client does not wait a tick
            let jobs = state.jobs.read().await;
            let job = jobs.get(&job_id)?;
            LiveEvent::Progress(job.progress_event())
                .to_frame()
                .and_then(|frame| frame.to_text())
                .ok()
        }
        OutboundCommand::StopTracking { job_id } => {
            tracked.remove(&job_id);
            None
        }
        OutboundCommand::RequestAnalytics { filters } => {
            let jobs = state.jobs.read().await;
            let completed = jobs.values().filter(|job| job.is_terminal()).count();
            let mean_progress = if jobs.is_empty() {
                0.0
            } else {
                jobs.values().map(|job| job.progress()).sum::<f64>() / jobs.len() as f64
            };
            let update = LiveEvent::AnalyticsUpdate(json!({
                "filters": filters,
                "totalJobs": jobs.len(),
                "completedJobs": completed,
                "meanProgress": mean_progress,
            }));
            update.to_frame().and_then(|frame| frame.to_text()).ok()
        }
    }
}

fn should_forward(event: &LiveEvent, tracked: &HashSet<String>, user_id: &str) -> bool {
    match event {
        LiveEvent::Progress(progress) => tracked.contains(&progress.job_id),
        LiveEvent::Notification(payload) => payload
            .owner_user_id
            .as_deref()
            .map_or(true, |owner| owner == user_id),
        _ => true,
    }
}

/// Build live channel routes
pub fn live_routes() -> Router<AppState> {
    Router::new().route("/live/analysis", get(live_socket))
}
