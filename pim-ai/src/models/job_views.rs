//! Read-only projections of a job record handed to polling clients

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::job::{JobRecord, JobStatus};
use super::stage_output::{ArtifactCategory, ArtifactRef, Item};

/// Status poll response
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub current_step: String,
    pub progress: u8,
    /// Present only when status is Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusSnapshot {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            status: record.status,
            current_step: record.current_stage_label.clone(),
            progress: record.progress_percent,
            error: match record.status {
                JobStatus::Failed => record.fatal_error.clone(),
                _ => None,
            },
        }
    }
}

/// Bytes escaped inside one URL path segment (everything but unreserved)
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Client-facing reference to an artifact
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArtifactLink {
    pub file_name: String,
    /// Route serving the artifact bytes
    pub url: String,
}

impl ArtifactLink {
    pub fn new(job_id: Uuid, artifact: &ArtifactRef) -> Self {
        Self {
            file_name: artifact.file_name.clone(),
            url: format!(
                "/api/image/{}/{}/{}",
                job_id,
                artifact.category.dir_name(),
                utf8_percent_encode(&artifact.file_name, PATH_SEGMENT)
            ),
        }
    }
}

/// Results of a Completed job
#[derive(Debug, Clone, Serialize)]
pub struct ResultsSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub items: Vec<Item>,
    pub best_frames: BTreeMap<String, ArtifactLink>,
    pub segmented_images: BTreeMap<String, ArtifactLink>,
    pub enhanced_images: BTreeMap<String, Vec<ArtifactLink>>,
    pub segmentation_errors: BTreeMap<String, String>,
    pub enhancement_errors: BTreeMap<String, String>,
    /// Style-level failures for items that still produced some variants
    pub enhancement_warnings: BTreeMap<String, Vec<String>>,
}

impl ResultsSnapshot {
    pub fn from_record(record: &JobRecord) -> Self {
        let job_id = record.job_id;
        let items = record.items();

        let best_frames = items
            .iter()
            .map(|identified| {
                let frame = ArtifactRef::new(ArtifactCategory::Frame, identified.best_frame.file_name());
                (identified.name().to_string(), ArtifactLink::new(job_id, &frame))
            })
            .collect();

        let (segmented_images, segmentation_errors) = match record.segmentation() {
            Some(outcomes) => (
                outcomes
                    .artifacts()
                    .iter()
                    .map(|(name, cutout)| (name.clone(), ArtifactLink::new(job_id, &cutout.image)))
                    .collect(),
                outcomes.errors().clone(),
            ),
            None => (BTreeMap::new(), BTreeMap::new()),
        };

        let mut enhanced_images = BTreeMap::new();
        let mut enhancement_warnings = BTreeMap::new();
        let mut enhancement_errors = BTreeMap::new();
        if let Some(outcomes) = record.enhancement() {
            for (name, variants) in outcomes.artifacts() {
                enhanced_images.insert(
                    name.clone(),
                    variants
                        .variants
                        .iter()
                        .map(|v| ArtifactLink::new(job_id, v))
                        .collect::<Vec<_>>(),
                );
                if !variants.failed_styles.is_empty() {
                    enhancement_warnings.insert(
                        name.clone(),
                        variants
                            .failed_styles
                            .iter()
                            .map(|f| format!("Style {}: {}", f.style, f.error))
                            .collect::<Vec<_>>(),
                    );
                }
            }
            enhancement_errors = outcomes.errors().clone();
        }

        Self {
            job_id,
            status: record.status,
            items: items.iter().map(|i| i.item.clone()).collect(),
            best_frames,
            segmented_images,
            enhanced_images,
            segmentation_errors,
            enhancement_errors,
            enhancement_warnings,
        }
    }
}
