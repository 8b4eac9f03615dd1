//! Job submission, status, results and removal

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{JobStatus, ResultsSnapshot, StatusSnapshot};
use crate::services::JobWorkspace;
use crate::{ApiError, ApiResult, AppState};

/// POST /api/process-video request
#[derive(Debug, Deserialize)]
pub struct ProcessVideoRequest {
    pub youtube_url: String,
}

/// DELETE /api/job/:job_id response
#[derive(Debug, Serialize)]
pub struct DeleteJobResponse {
    pub job_id: Uuid,
    pub deleted: bool,
}

/// Unknown and malformed ids both read as "no such job"
pub(crate) fn parse_job_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound(format!("Job not found: {}", raw)))
}

fn validate_input_url(raw: &str) -> ApiResult<String> {
    let trimmed = raw.trim();
    let url = reqwest::Url::parse(trimmed)
        .map_err(|e| ApiError::BadRequest(format!("Invalid video URL '{}': {}", trimmed, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ApiError::BadRequest(format!(
            "Invalid video URL '{}': expected an http(s) URL",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

/// POST /api/process-video
///
/// Registers the job and starts the pipeline in the background.
pub async fn process_video(
    State(state): State<AppState>,
    Json(request): Json<ProcessVideoRequest>,
) -> ApiResult<(StatusCode, Json<StatusSnapshot>)> {
    let input_reference = validate_input_url(&request.youtube_url)?;
    let job_id = state.runner.submit(input_reference).await;

    let snapshot = state.queries.poll_status(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// GET /api/job-status/:job_id
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusSnapshot>> {
    let job_id = parse_job_id(&job_id)?;
    let snapshot = state.queries.poll_status(job_id).await?;
    tracing::debug!(job_id = %job_id, status = %snapshot.status, progress = snapshot.progress, "Status query");
    Ok(Json(snapshot))
}

/// GET /api/results/:job_id
///
/// 409 NOT_READY until the job is Completed.
pub async fn job_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ResultsSnapshot>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.queries.fetch_results(job_id).await?))
}

/// DELETE /api/job/:job_id
///
/// Only finished jobs can be removed; their work directory goes with them.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DeleteJobResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let removed = state.store.remove_terminal(job_id).await?;

    let workspace = JobWorkspace::new(&state.jobs_dir, job_id);
    match tokio::fs::remove_dir_all(workspace.root()).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to remove job directory");
        }
    }

    tracing::info!(
        job_id = %job_id,
        completed = removed.status == JobStatus::Completed,
        "Job deleted"
    );
    Ok(Json(DeleteJobResponse { job_id, deleted: true }))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/process-video", post(process_video))
        .route("/api/job-status/:job_id", get(job_status))
        .route("/api/results/:job_id", get(job_results))
        .route("/api/job/:job_id", delete(delete_job))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_input_url() {
        assert!(validate_input_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(validate_input_url("  http://youtu.be/abc ").is_ok());
        assert!(matches!(validate_input_url("not a url"), Err(ApiError::BadRequest(_))));
        assert!(matches!(validate_input_url("ftp://example.com/v.mp4"), Err(ApiError::BadRequest(_))));
        assert!(matches!(validate_input_url("file:///etc/passwd"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_parse_job_id() {
        assert!(parse_job_id("00000000-0000-0000-0000-000000000000").is_ok());
        assert!(matches!(parse_job_id("nope"), Err(ApiError::NotFound(_))));
    }
}
