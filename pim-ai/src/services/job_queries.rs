//! Read-only job queries for polling clients
//!
//! Every query works on a store snapshot and never touches the runner.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use super::job_store::JobStore;
use super::job_workspace::{InvalidArtifactName, JobWorkspace};
use crate::models::{ArtifactCategory, JobStatus, ResultsSnapshot, StatusSnapshot};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Results not ready: job {job_id} is {status}")]
    NotReady { job_id: Uuid, status: JobStatus },

    #[error("Unknown artifact category: {0}")]
    UnknownCategory(String),

    #[error(transparent)]
    InvalidName(#[from] InvalidArtifactName),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Artifact bytes ready to serve
#[derive(Debug)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct JobQueries {
    store: JobStore,
    jobs_dir: PathBuf,
}

impl JobQueries {
    pub fn new(store: JobStore, jobs_dir: PathBuf) -> Self {
        Self { store, jobs_dir }
    }

    pub async fn poll_status(&self, job_id: Uuid) -> Result<StatusSnapshot, QueryError> {
        let record = self.store.get(job_id).await.ok_or(QueryError::JobNotFound(job_id))?;
        Ok(StatusSnapshot::from_record(&record))
    }

    /// Results of a Completed job; any other status is "not ready"
    pub async fn fetch_results(&self, job_id: Uuid) -> Result<ResultsSnapshot, QueryError> {
        let record = self.store.get(job_id).await.ok_or(QueryError::JobNotFound(job_id))?;
        if record.status != JobStatus::Completed {
            return Err(QueryError::NotReady {
                job_id,
                status: record.status,
            });
        }
        Ok(ResultsSnapshot::from_record(&record))
    }

    pub async fn fetch_artifact(
        &self,
        job_id: Uuid,
        category: &str,
        file_name: &str,
    ) -> Result<Artifact, QueryError> {
        if self.store.get(job_id).await.is_none() {
            return Err(QueryError::JobNotFound(job_id));
        }
        let category =
            ArtifactCategory::parse(category).ok_or_else(|| QueryError::UnknownCategory(category.to_string()))?;

        let path = JobWorkspace::new(&self.jobs_dir, job_id).resolve_artifact(category, file_name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueryError::ArtifactNotFound(format!("{}/{}", category.dir_name(), file_name)))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Artifact {
            bytes,
            content_type: content_type_for(file_name),
        })
    }
}

/// Content type from the file extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
