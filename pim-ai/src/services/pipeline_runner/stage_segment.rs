//! Stage 4: SEGMENT
//!
//! Per item: request a mask for the best frame, apply it, trim to content.
//! Item failures are isolated.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::{PipelineRunner, StageContext, StageError};
use crate::models::{ArtifactCategory, ArtifactRef, FrameRef, IdentifiedItem, ItemOutcomes, SegmentedCutout, Stage};
use crate::services::collaborators::Segmenter;
use crate::services::fan_out::fan_out;
use crate::services::image_ops;
use crate::services::job_workspace::sanitize_filename;

impl PipelineRunner {
    pub(super) async fn stage_segment(
        &self,
        ctx: &StageContext,
        items: &[IdentifiedItem],
    ) -> Result<ItemOutcomes<SegmentedCutout>, StageError> {
        tracing::info!(job_id = %ctx.job_id, items = items.len(), "Stage 4: SEGMENT");

        let out_dir = ctx.workspace.ensure_dir(ArtifactCategory::Segmented).await?;
        let best_frames: HashMap<String, FrameRef> = items
            .iter()
            .map(|i| (i.name().to_string(), i.best_frame.clone()))
            .collect();
        let names = items.iter().map(|i| i.name().to_string()).collect();

        let results = fan_out(names, self.settings.max_parallel_items, |name| {
            let segmenter = Arc::clone(&self.collaborators.segmenter);
            let frame = best_frames.get(&name).cloned();
            let out_dir = out_dir.clone();
            async move {
                let frame = frame.ok_or_else(|| StageError::MissingInput(format!("no best frame for {}", name)))?;
                segment_item(segmenter.as_ref(), &name, frame, &out_dir).await
            }
        })
        .await;

        let outcomes = self.collect_outcomes(ctx, Stage::Segment, results);
        tracing::info!(
            job_id = %ctx.job_id,
            segmented = outcomes.artifacts().len(),
            failed = outcomes.errors().len(),
            "Segmentation finished"
        );
        Ok(outcomes)
    }
}

async fn segment_item(
    segmenter: &dyn Segmenter,
    name: &str,
    frame: FrameRef,
    out_dir: &Path,
) -> Result<SegmentedCutout, StageError> {
    let mask = segmenter.segment(name, &frame).await?;

    let safe_name = sanitize_filename(name);
    let mask_name = format!("{}_mask.png", safe_name);
    let cutout_name = format!("{}_segmented.png", safe_name);
    let mask_path = out_dir.join(&mask_name);
    let cutout_path = out_dir.join(&cutout_name);

    tokio::task::spawn_blocking(move || image_ops::cut_out(frame.path(), &mask, &mask_path, &cutout_path))
        .await??;

    tracing::debug!(item = %name, cutout = %cutout_name, "Item segmented");
    Ok(SegmentedCutout {
        image: ArtifactRef::new(ArtifactCategory::Segmented, cutout_name),
        mask: ArtifactRef::new(ArtifactCategory::Segmented, mask_name),
    })
}
