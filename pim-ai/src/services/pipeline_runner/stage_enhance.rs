//! Stage 5: ENHANCE
//!
//! Per segmented item: flatten the cutout onto white, then generate one
//! variant per style. Styles run in order and fail independently; an item
//! fails only when no style produced a variant. Items that failed Segment are
//! never attempted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{PipelineRunner, StageContext, StageError};
use crate::models::{
    ArtifactCategory, ArtifactRef, EnhancedVariants, ItemOutcomes, SegmentedCutout, Stage, StyleFailure,
};
use crate::services::collaborators::{CollaboratorError, VariantGenerator};
use crate::services::fan_out::fan_out;
use crate::services::image_ops;
use crate::services::job_workspace::sanitize_filename;

/// Background styles, one variant each
pub const STYLES: [&str; 3] = [
    "a clean white studio background with soft shadows and professional lighting",
    "a modern minimalist desk setup with natural wood texture",
    "a gradient background transitioning from deep purple to electric blue",
];

/// Where one item's enhancement reads and writes
struct EnhanceJob {
    cutout: PathBuf,
    flattened: PathBuf,
    enhanced_dir: PathBuf,
}

impl PipelineRunner {
    pub(super) async fn stage_enhance(
        &self,
        ctx: &StageContext,
        segmentation: &ItemOutcomes<SegmentedCutout>,
    ) -> Result<ItemOutcomes<EnhancedVariants>, StageError> {
        let segmented = segmentation.artifacts();
        tracing::info!(
            job_id = %ctx.job_id,
            items = segmented.len(),
            skipped = segmentation.errors().len(),
            "Stage 5: ENHANCE"
        );

        let enhanced_dir = ctx.workspace.ensure_dir(ArtifactCategory::Enhanced).await?;
        let segmented_dir = ctx.workspace.category_dir(ArtifactCategory::Segmented);

        let cutouts: HashMap<String, PathBuf> = segmented
            .iter()
            .map(|(name, cutout)| (name.clone(), ctx.workspace.artifact_path(&cutout.image)))
            .collect();
        let names = segmented.keys().cloned().collect();

        let results = fan_out(names, self.settings.max_parallel_items, |name| {
            let generator = Arc::clone(&self.collaborators.generator);
            let job = cutouts.get(&name).map(|cutout| EnhanceJob {
                cutout: cutout.clone(),
                flattened: segmented_dir.join(format!("{}_flattened.png", sanitize_filename(&name))),
                enhanced_dir: enhanced_dir.clone(),
            });
            async move {
                let job = job.ok_or_else(|| StageError::MissingInput(format!("no segmented image for {}", name)))?;
                enhance_item(generator.as_ref(), &name, job).await
            }
        })
        .await;

        let outcomes = self.collect_outcomes(ctx, Stage::Enhance, results);
        tracing::info!(
            job_id = %ctx.job_id,
            enhanced = outcomes.artifacts().len(),
            failed = outcomes.errors().len(),
            "Enhancement finished"
        );
        Ok(outcomes)
    }
}

async fn enhance_item(
    generator: &dyn VariantGenerator,
    name: &str,
    job: EnhanceJob,
) -> Result<EnhancedVariants, StageError> {
    let cutout = job.cutout.clone();
    let flattened = job.flattened.clone();
    tokio::task::spawn_blocking(move || image_ops::flatten_file(&cutout, &flattened)).await??;

    let safe_name = sanitize_filename(name);
    let mut variants = Vec::new();
    let mut failed_styles = Vec::new();

    for (index, style) in STYLES.iter().enumerate() {
        let style_number = index + 1;
        let file_name = format!("{}_enhanced_{}.png", safe_name, style_number);

        match generate_style(generator, name, &job.flattened, style, &job.enhanced_dir.join(&file_name)).await {
            Ok(()) => variants.push(ArtifactRef::new(ArtifactCategory::Enhanced, file_name)),
            Err(e) => {
                tracing::warn!(item = %name, style = style_number, error = %e, "Style generation failed");
                failed_styles.push(StyleFailure {
                    style: style_number,
                    error: e.to_string(),
                });
            }
        }
    }

    if variants.is_empty() {
        let summary = failed_styles
            .iter()
            .map(|f| format!("Style {}: {}", f.style, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(StageError::NoVariants(summary));
    }

    tracing::debug!(item = %name, variants = variants.len(), failed = failed_styles.len(), "Item enhanced");
    Ok(EnhancedVariants { variants, failed_styles })
}

async fn generate_style(
    generator: &dyn VariantGenerator,
    name: &str,
    flattened: &Path,
    style: &str,
    output: &Path,
) -> Result<(), StageError> {
    let encoded = generator.generate_variant(name, flattened, style).await?;
    if encoded.is_empty() {
        return Err(CollaboratorError::EmptyResponse("No image returned (possibly rate limited)".to_string()).into());
    }

    let output = output.to_path_buf();
    tokio::task::spawn_blocking(move || image_ops::write_png(&encoded, &output)).await??;
    Ok(())
}
