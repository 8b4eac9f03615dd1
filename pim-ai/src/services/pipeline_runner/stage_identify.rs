//! Stage 3: IDENTIFY
//!
//! Ask the intelligence collaborator which products appear in a sparse frame
//! sample, then pick each product's best frame from a denser sample. Products
//! without a usable best frame are dropped.

use std::collections::HashSet;

use super::{PipelineRunner, StageContext, StageError};
use crate::models::{FrameRef, IdentifiedItem, Item};
use crate::services::job_workspace::sanitize_filename;

/// Every `len / count`-th element, at most `count` of them
pub fn subsample<T: Clone>(frames: &[T], count: usize) -> Vec<T> {
    let count = count.max(1);
    let stride = (frames.len() / count).max(1);
    frames.iter().step_by(stride).take(count).cloned().collect()
}

impl PipelineRunner {
    pub(super) async fn stage_identify(
        &self,
        ctx: &StageContext,
        frames: &[FrameRef],
    ) -> Result<Vec<IdentifiedItem>, StageError> {
        let identify_sample = subsample(frames, self.settings.identify_sample_count);
        let best_frame_sample = subsample(frames, self.settings.best_frame_sample_count);

        tracing::info!(
            job_id = %ctx.job_id,
            identify_sample = identify_sample.len(),
            best_frame_sample = best_frame_sample.len(),
            "Stage 3: IDENTIFY"
        );

        let identifier = &self.collaborators.identifier;
        let candidates = identifier.identify_items(&identify_sample).await?;
        tracing::debug!(job_id = %ctx.job_id, candidates = candidates.len(), "Products reported");

        // Keyed by file-name stem so two items never share output files
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for candidate in candidates {
            let name = candidate.name.trim();
            if name.is_empty() || !seen.insert(sanitize_filename(name)) {
                tracing::debug!(job_id = %ctx.job_id, item = %name, "Skipping empty or duplicate product name");
                continue;
            }

            match identifier.select_best_frame(name, &best_frame_sample).await? {
                Some(frame) if best_frame_sample.contains(&frame) => {
                    tracing::debug!(
                        job_id = %ctx.job_id,
                        item = %name,
                        frame = %frame.file_name(),
                        "Best frame selected"
                    );
                    items.push(IdentifiedItem {
                        item: Item {
                            name: name.to_string(),
                            descriptor: candidate.descriptor.trim().to_string(),
                        },
                        best_frame: frame,
                    });
                }
                Some(frame) => {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        item = %name,
                        frame = %frame.path().display(),
                        "Best frame is not one of the offered frames, dropping product"
                    );
                }
                None => {
                    tracing::info!(job_id = %ctx.job_id, item = %name, "No frame shows product, dropping it");
                }
            }
        }

        if items.is_empty() {
            return Err(StageError::NoItems);
        }

        tracing::info!(job_id = %ctx.job_id, items = items.len(), "Products identified");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsample_strides_through_sequence() {
        let frames: Vec<u32> = (0..120).collect();
        let sample = subsample(&frames, 10);
        assert_eq!(sample, vec![0, 12, 24, 36, 48, 60, 72, 84, 96, 108]);
    }

    #[test]
    fn test_subsample_short_sequence_keeps_everything() {
        let frames = vec!["a", "b", "c"];
        assert_eq!(subsample(&frames, 10), frames);
    }

    #[test]
    fn test_denser_sample_for_best_frame() {
        let frames: Vec<u32> = (0..45).collect();
        let sparse = subsample(&frames, 10);
        let dense = subsample(&frames, 20);
        assert_eq!(sparse.len(), 10);
        assert_eq!(dense.len(), 20);
        assert_eq!(dense[1] - dense[0], 2);
        assert_eq!(sparse[1] - sparse[0], 4);
    }

    #[test]
    fn test_subsample_empty() {
        let frames: Vec<u32> = Vec::new();
        assert!(subsample(&frames, 10).is_empty());
    }
}
