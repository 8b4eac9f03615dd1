//! Artifact download

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

use super::jobs::parse_job_id;
use crate::{ApiResult, AppState};

/// GET /api/image/:job_id/:category/:file_name
///
/// Category is `frames` (or `frame`), `segmented` or `enhanced`.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path((job_id, category, file_name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let job_id = parse_job_id(&job_id)?;
    let artifact = state.queries.fetch_artifact(job_id, &category, &file_name).await?;

    Ok(([(header::CONTENT_TYPE, artifact.content_type)], artifact.bytes))
}

/// Build artifact routes
pub fn artifact_routes() -> Router<AppState> {
    Router::new().route("/api/image/:job_id/:category/:file_name", get(get_artifact))
}
