//! Analysis job endpoints

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use lms_common::events::{JobStatus, PollSnapshot};
use lms_common::LiveEvent;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::authorize;
use crate::jobs::SimJob;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub content_id: String,
    /// Chosen by the server when absent
    #[serde(default)]
    pub job_id: Option<String>,
    /// Overrides the server's model list for this job
    #[serde(default)]
    pub models: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: String,
    pub content_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub error: String,
}

/// POST /api/analysis
pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    authorize(&state, &headers)?;
    if request.content_id.trim().is_empty() {
        return Err(ApiError::BadRequest("contentId must not be empty".to_string()));
    }

    let job_id = request
        .job_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut jobs = state.jobs.write().await;
    if jobs.contains_key(&job_id) {
        return Err(ApiError::Conflict(format!("job {} already exists", job_id)));
    }

    let models = request.models.as_ref().unwrap_or(&state.config.models);
    let job = SimJob::new(job_id.clone(), request.content_id.clone(), models);
    let response = JobResponse {
        job_id: job.job_id.clone(),
        content_id: job.content_id.clone(),
        status: job.status,
    };
    jobs.insert(job_id.clone(), job);
    info!("Created analysis job {} for content {}", job_id, request.content_id);

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/analysis/:job_id/progress
pub async fn job_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> ApiResult<Json<PollSnapshot>> {
    authorize(&state, &headers)?;
    let jobs = state.jobs.read().await;
    let job = jobs
        .get(&job_id)
        .ok_or_else(|| ApiError::NotFound(format!("job {}", job_id)))?;
    Ok(Json(job.snapshot()))
}

/// POST /api/analysis/:job_id/fail
pub async fn fail_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
    Json(request): Json<FailRequest>,
) -> ApiResult<Json<PollSnapshot>> {
    authorize(&state, &headers)?;
    let (event, snapshot) = {
        let mut jobs = state.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| ApiError::NotFound(format!("job {}", job_id)))?;
        let event = job
            .fail(request.error)
            .ok_or_else(|| ApiError::Conflict(format!("job {} already finished", job_id)))?;
        (event, job.snapshot())
    };

    info!("Job {} marked failed", job_id);
    state.event_bus.emit_lossy(LiveEvent::Progress(event));
    Ok(Json(snapshot))
}

/// Build analysis routes
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analysis", post(create_job))
        .route("/api/analysis/:job_id/progress", get(job_progress))
        .route("/api/analysis/:job_id/fail", post(fail_job))
}
