//! HTTP and WebSocket handlers for lms-sim

pub mod admin;
pub mod analysis;
pub mod health;
pub mod live;

pub use admin::admin_routes;
pub use analysis::analysis_routes;
pub use health::health_routes;
pub use live::live_routes;

use crate::{ApiError, ApiResult, AppState};
use axum::http::{header::AUTHORIZATION, HeaderMap};

/// Check the `Authorization: Bearer <token>` header against the configured token
pub(crate) fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.config.token.as_deref() else {
        return Ok(());
    };

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(ApiError::Unauthorized("invalid token".to_string())),
        None => Err(ApiError::Unauthorized("missing bearer token".to_string())),
    }
}
