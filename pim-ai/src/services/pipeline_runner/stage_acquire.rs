//! Stage 1: ACQUIRE
//!
//! Materialize the input reference as a local video file

use super::{PipelineRunner, StageContext, StageError};
use crate::models::MediaRef;

impl PipelineRunner {
    pub(super) async fn stage_acquire(
        &self,
        ctx: &StageContext,
        input_reference: &str,
    ) -> Result<MediaRef, StageError> {
        tracing::info!(job_id = %ctx.job_id, input = %input_reference, "Stage 1: ACQUIRE");

        tokio::fs::create_dir_all(ctx.workspace.root()).await?;
        let media = self
            .collaborators
            .fetcher
            .fetch(input_reference, ctx.workspace.root())
            .await?;

        tracing::debug!(job_id = %ctx.job_id, media = %media.path().display(), "Video acquired");
        Ok(media)
    }
}
