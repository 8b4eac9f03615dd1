//! Pipeline runner
//!
//! Drives one job through the stage state machine:
//!
//! ```text
//! ACQUIRE(10) → EXTRACT(30) → IDENTIFY(50) → SEGMENT(70) → ENHANCE(90) → COMPLETED(100)
//! ```
//!
//! Each stage is handled by a dedicated `stage_*` method in its own module.
//! Acquire, Extract and Identify errors are fatal; Segment and Enhance fan
//! out per item and record item failures without stopping the job.
//!
//! The runner owns its `JobRecord` exclusively and publishes a new versioned
//! snapshot to the `JobStore` after every change. `submit` spawns the run and
//! a watchdog; if the run task dies before reaching a terminal status the
//! watchdog fails the job.

use chrono::Utc;
use pim_common::config::PipelineSettings;
use pim_common::events::{EventBus, PimEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::collaborators::{
    CollaboratorError, FrameSource, ItemIdentifier, MediaFetcher, Segmenter, VariantGenerator,
};
use super::fan_out::ItemResult;
use super::image_ops::ImageOpError;
use super::job_store::{JobStore, StoreError};
use super::job_workspace::JobWorkspace;
use crate::models::{Identified, InvalidTransition, ItemOutcomes, JobRecord, JobStatus, Stage, StageOutput};

mod stage_acquire;
mod stage_enhance;
mod stage_extract;
mod stage_identify;
mod stage_segment;

pub use stage_enhance::STYLES;
pub use stage_identify::subsample;

/// Fatal error recorded by the watchdog
pub const TASK_TERMINATED_ERROR: &str = "pipeline task terminated unexpectedly";

/// Errors raised by stage functions
///
/// Whether one is fatal depends on the stage and scope it was raised in, not
/// on the variant.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("No frames extracted from video")]
    NoFrames,

    #[error("No products identified in video")]
    NoItems,

    #[error("{0}")]
    Image(#[from] ImageOpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Every enhancement style failed for one item
    #[error("{0}")]
    NoVariants(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StageError::Task(e.to_string())
    }
}

/// Why a run stopped early
#[derive(Debug, Error)]
enum RunError {
    #[error("{}: {}", .0.failure_prefix(), .1)]
    Stage(Stage, StageError),

    #[error("Job record could not be published: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// External systems the stages call
pub struct Collaborators {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub frames: Arc<dyn FrameSource>,
    pub identifier: Arc<dyn ItemIdentifier>,
    pub segmenter: Arc<dyn Segmenter>,
    pub generator: Arc<dyn VariantGenerator>,
}

/// Per-job values handed to every stage
pub(crate) struct StageContext {
    pub job_id: Uuid,
    pub workspace: JobWorkspace,
}

/// Single writer for one job record
///
/// Every change goes through `publish`, which bumps the version, replaces the
/// store snapshot and broadcasts the new status.
struct JobWriter<'a> {
    store: &'a JobStore,
    event_bus: &'a EventBus,
    record: JobRecord,
}

impl<'a> JobWriter<'a> {
    fn new(store: &'a JobStore, event_bus: &'a EventBus, record: JobRecord) -> Self {
        Self {
            store,
            event_bus,
            record,
        }
    }

    async fn publish(&mut self) -> Result<(), StoreError> {
        self.record.version += 1;
        self.store.publish(&self.record).await?;

        self.event_bus.emit_lossy(PimEvent::JobProgress {
            job_id: self.record.job_id,
            status: self.record.status.to_string(),
            current_step: self.record.current_stage_label.clone(),
            progress: self.record.progress_percent,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Pending → Running at 0%, labelled with the first stage
    async fn start(&mut self) -> Result<(), RunError> {
        self.record.transition_to(JobStatus::Running)?;
        self.record.advance_progress(0, Stage::Acquire.start_label());
        self.publish().await?;
        Ok(())
    }

    /// Record a finished stage: store its output, move to its checkpoint and
    /// label the stage that runs next
    async fn checkpoint(&mut self, stage: Stage, output: StageOutput) -> Result<(), RunError> {
        self.record.output = output;
        self.record.advance_progress(stage.checkpoint(), stage.following_label());
        self.publish().await?;

        tracing::info!(
            job_id = %self.record.job_id,
            stage = stage.as_str(),
            progress = self.record.progress_percent,
            "Stage complete"
        );
        Ok(())
    }

    async fn complete(&mut self) -> Result<(), RunError> {
        let label = completion_label(&self.record);
        self.record.complete(label)?;
        self.publish().await?;

        let segmented = self.record.segmentation().map_or(0, |s| s.artifacts().len());
        let enhanced = self.record.enhancement().map_or(0, |e| e.artifacts().len());
        tracing::info!(
            job_id = %self.record.job_id,
            items = self.record.items().len(),
            segmented,
            enhanced,
            "Job completed"
        );
        self.event_bus.emit_lossy(PimEvent::JobCompleted {
            job_id: self.record.job_id,
            items: self.record.items().len(),
            segmented,
            enhanced,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn fail(&mut self, error: String) -> Result<(), RunError> {
        tracing::error!(job_id = %self.record.job_id, error = %error, "Job failed");
        self.record.fail(error.clone())?;
        self.publish().await?;

        self.event_bus.emit_lossy(PimEvent::JobFailed {
            job_id: self.record.job_id,
            error,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Completed-job label summarising the enhancement outcome
pub fn completion_label(record: &JobRecord) -> String {
    let Some(enhancement) = record.enhancement() else {
        return "Processing complete (enhancement failed for all products)".to_string();
    };

    if enhancement.artifacts().is_empty() {
        return "Processing complete (enhancement failed for all products)".to_string();
    }

    let with_issues = enhancement.errors().len()
        + enhancement
            .artifacts()
            .values()
            .filter(|v| !v.failed_styles.is_empty())
            .count();

    if with_issues > 0 {
        format!("Processing complete! ({} products had enhancement issues)", with_issues)
    } else {
        "Processing complete!".to_string()
    }
}

/// Runs jobs; cheap to clone (one clone moves into each job task)
#[derive(Clone)]
pub struct PipelineRunner {
    store: JobStore,
    event_bus: EventBus,
    collaborators: Arc<Collaborators>,
    settings: PipelineSettings,
    jobs_dir: PathBuf,
}

impl PipelineRunner {
    pub fn new(
        store: JobStore,
        event_bus: EventBus,
        collaborators: Collaborators,
        settings: PipelineSettings,
        jobs_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            event_bus,
            collaborators: Arc::new(collaborators),
            settings,
            jobs_dir,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Register a job and start it in the background
    ///
    /// Returns as soon as the record exists; no stage has run yet.
    pub async fn submit(&self, input_reference: impl Into<String>) -> Uuid {
        let record = self.store.create(input_reference).await;
        let job_id = record.job_id;

        tracing::info!(job_id = %job_id, input = %record.input_reference, "Job submitted");
        self.event_bus.emit_lossy(PimEvent::JobSubmitted {
            job_id,
            input_reference: record.input_reference.clone(),
            timestamp: Utc::now(),
        });

        let runner = self.clone();
        let task = tokio::spawn(async move {
            runner.run(record).await;
        });

        let store = self.store.clone();
        let event_bus = self.event_bus.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                tracing::error!(job_id = %job_id, error = %e, "Pipeline task aborted");
            }
            watchdog_finalize(&store, &event_bus, job_id).await;
        });

        job_id
    }

    /// Run every stage for `record` and return the final record
    ///
    /// The record must be the Pending copy returned by `JobStore::create`.
    pub async fn run(&self, record: JobRecord) -> JobRecord {
        let job_id = record.job_id;
        let mut writer = JobWriter::new(&self.store, &self.event_bus, record);

        let result = match writer.start().await {
            Ok(()) => self.execute(&mut writer).await,
            Err(e) => Err(e),
        };

        let finish = match result {
            Ok(()) => writer.complete().await,
            Err(e @ RunError::Stage(..)) => writer.fail(e.to_string()).await,
            Err(e) => Err(e),
        };

        if let Err(e) = finish {
            // Record stays non-terminal in the store; the watchdog fails it
            tracing::error!(job_id = %job_id, error = %e, "Pipeline run abandoned");
        }

        writer.record
    }

    async fn execute(&self, writer: &mut JobWriter<'_>) -> Result<(), RunError> {
        let ctx = StageContext {
            job_id: writer.record.job_id,
            workspace: JobWorkspace::new(&self.jobs_dir, writer.record.job_id),
        };
        let input_reference = writer.record.input_reference.clone();

        let media = self
            .stage_acquire(&ctx, &input_reference)
            .await
            .map_err(|e| RunError::Stage(Stage::Acquire, e))?;
        writer
            .checkpoint(Stage::Acquire, StageOutput::Acquired { media: media.clone() })
            .await?;

        let frames = self
            .stage_extract(&ctx, &media)
            .await
            .map_err(|e| RunError::Stage(Stage::Extract, e))?;
        writer
            .checkpoint(
                Stage::Extract,
                StageOutput::Extracted {
                    media: media.clone(),
                    frames: frames.clone(),
                },
            )
            .await?;

        let items = self
            .stage_identify(&ctx, &frames)
            .await
            .map_err(|e| RunError::Stage(Stage::Identify, e))?;
        let identified = Identified { media, frames, items };
        writer
            .checkpoint(Stage::Identify, StageOutput::Identified(identified.clone()))
            .await?;

        let segmentation = self
            .stage_segment(&ctx, &identified.items)
            .await
            .map_err(|e| RunError::Stage(Stage::Segment, e))?;
        writer
            .checkpoint(
                Stage::Segment,
                StageOutput::Segmented {
                    identified: identified.clone(),
                    segmentation: segmentation.clone(),
                },
            )
            .await?;

        let enhancement = self
            .stage_enhance(&ctx, &segmentation)
            .await
            .map_err(|e| RunError::Stage(Stage::Enhance, e))?;
        writer
            .checkpoint(
                Stage::Enhance,
                StageOutput::Enhanced {
                    identified,
                    segmentation,
                    enhancement,
                },
            )
            .await?;

        Ok(())
    }

    /// Fold fan-out results into per-item outcomes, reporting each failure
    fn collect_outcomes<T>(&self, ctx: &StageContext, stage: Stage, results: Vec<ItemResult<T>>) -> ItemOutcomes<T> {
        let mut outcomes = ItemOutcomes::new();

        for ItemResult { item, outcome } in results {
            match outcome {
                Ok(artifact) => outcomes.record_success(item, artifact),
                Err(error) => {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        stage = stage.as_str(),
                        item = %item,
                        error = %error,
                        "Item failed, continuing with remaining items"
                    );
                    self.event_bus.emit_lossy(PimEvent::ItemFailed {
                        job_id: ctx.job_id,
                        stage: stage.as_str().to_string(),
                        item: item.clone(),
                        error: error.clone(),
                        timestamp: Utc::now(),
                    });
                    outcomes.record_failure(item, error);
                }
            }
        }

        outcomes
    }
}

/// Fail the job if its run task ended without a terminal status
async fn watchdog_finalize(store: &JobStore, event_bus: &EventBus, job_id: Uuid) {
    let Some(snapshot) = store.mark_failed_if_unfinished(job_id, TASK_TERMINATED_ERROR).await else {
        return;
    };

    tracing::error!(
        job_id = %job_id,
        progress = snapshot.progress_percent,
        "Pipeline task ended before the job finished; marked failed"
    );
    event_bus.emit_lossy(PimEvent::JobProgress {
        job_id,
        status: snapshot.status.to_string(),
        current_step: snapshot.current_stage_label.clone(),
        progress: snapshot.progress_percent,
        timestamp: Utc::now(),
    });
    event_bus.emit_lossy(PimEvent::JobFailed {
        job_id,
        error: TASK_TERMINATED_ERROR.to_string(),
        timestamp: Utc::now(),
    });
}
