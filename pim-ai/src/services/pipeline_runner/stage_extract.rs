//! Stage 2: EXTRACT
//!
//! Sample frames at the configured rate, never more than `max_frames`

use super::{PipelineRunner, StageContext, StageError};
use crate::models::{ArtifactCategory, FrameRef, MediaRef};

impl PipelineRunner {
    pub(super) async fn stage_extract(
        &self,
        ctx: &StageContext,
        media: &MediaRef,
    ) -> Result<Vec<FrameRef>, StageError> {
        let max_frames = self.settings.max_frames;
        tracing::info!(
            job_id = %ctx.job_id,
            sample_rate_fps = self.settings.frame_sample_rate_fps,
            max_frames,
            "Stage 2: EXTRACT"
        );

        let out_dir = ctx.workspace.ensure_dir(ArtifactCategory::Frame).await?;
        let mut frames = self
            .collaborators
            .frames
            .decode_frames(media, self.settings.frame_sample_rate_fps, max_frames, &out_dir)
            .await?;

        if frames.len() > max_frames {
            tracing::debug!(
                job_id = %ctx.job_id,
                decoded = frames.len(),
                kept = max_frames,
                "Dropping frames beyond the cap"
            );
            frames.truncate(max_frames);
        }

        if frames.is_empty() {
            return Err(StageError::NoFrames);
        }

        tracing::info!(job_id = %ctx.job_id, frames = frames.len(), "Frames extracted");
        Ok(frames)
    }
}
