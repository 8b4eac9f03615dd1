//! Job record and its state machine
//!
//! Externally a job is Pending → Running → {Completed, Failed}. While Running
//! the pipeline walks the stages below, each advancing the progress to its
//! checkpoint once it returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::stage_output::{EnhancedVariants, IdentifiedItem, ItemOutcomes, SegmentedCutout, StageOutput};

/// Externally observable job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Registered, runner not started yet
    Pending,
    /// Runner is executing stages
    Running,
    /// All stages finished (possibly with item-scoped errors)
    Completed,
    /// A fatal error aborted the job
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Forward-only transition table
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Acquire,
    Extract,
    Identify,
    Segment,
    Enhance,
}

/// Label shown between the last stage and the terminal transition
pub const FINALIZE_LABEL: &str = "Finalizing results...";

/// Label of a freshly submitted job
pub const PENDING_LABEL: &str = "Starting...";

impl Stage {
    pub const ORDER: [Stage; 5] = [
        Stage::Acquire,
        Stage::Extract,
        Stage::Identify,
        Stage::Segment,
        Stage::Enhance,
    ];

    /// Progress reached once this stage returns successfully
    pub fn checkpoint(self) -> u8 {
        match self {
            Stage::Acquire => 10,
            Stage::Extract => 30,
            Stage::Identify => 50,
            Stage::Segment => 70,
            Stage::Enhance => 90,
        }
    }

    /// Label published while this stage is the next one to run
    pub fn start_label(self) -> &'static str {
        match self {
            Stage::Acquire => "Downloading video...",
            Stage::Extract => "Extracting frames...",
            Stage::Identify => "Identifying products...",
            Stage::Segment => "Segmenting products...",
            Stage::Enhance => "Enhancing product images...",
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Acquire => Some(Stage::Extract),
            Stage::Extract => Some(Stage::Identify),
            Stage::Identify => Some(Stage::Segment),
            Stage::Segment => Some(Stage::Enhance),
            Stage::Enhance => None,
        }
    }

    /// Label published after this stage's checkpoint
    pub fn following_label(self) -> &'static str {
        self.next().map(Stage::start_label).unwrap_or(FINALIZE_LABEL)
    }

    /// Stages whose item-scoped errors are isolated rather than fatal
    pub fn isolates_item_errors(self) -> bool {
        matches!(self, Stage::Segment | Stage::Enhance)
    }

    /// Prefix for the fatal error description
    pub fn failure_prefix(self) -> &'static str {
        match self {
            Stage::Acquire => "Failed to download video",
            Stage::Extract => "Failed to extract frames",
            Stage::Identify => "Failed to identify products",
            Stage::Segment => "Failed to segment products",
            Stage::Enhance => "Failed to enhance images",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Extract => "extract",
            Stage::Identify => "identify",
            Stage::Segment => "segment",
            Stage::Enhance => "enhance",
        }
    }
}

/// Rejected status transition
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// The unit of work and single source of truth for a submission
///
/// Only the pipeline runner mutates a record; everyone else reads published
/// snapshots from the job store.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub input_reference: String,
    pub status: JobStatus,
    pub current_stage_label: String,
    pub progress_percent: u8,
    /// Set only when status is Failed
    pub fatal_error: Option<String>,
    /// What the completed stages produced so far
    pub output: StageOutput,
    /// Bumped on every publish; the store rejects stale versions
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Fresh Pending record
    pub fn new(job_id: Uuid, input_reference: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            input_reference,
            status: JobStatus::Pending,
            current_stage_label: PENDING_LABEL.to_string(),
            progress_percent: 0,
            fatal_error: None,
            output: StageOutput::Empty,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move progress forward; never moves it backwards
    pub fn advance_progress(&mut self, percent: u8, label: impl Into<String>) {
        self.progress_percent = self.progress_percent.max(percent.min(100));
        self.current_stage_label = label.into();
        self.updated_at = Utc::now();
    }

    /// Running → Completed with progress forced to 100
    pub fn complete(&mut self, label: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition_to(JobStatus::Completed)?;
        self.progress_percent = 100;
        self.current_stage_label = label.into();
        Ok(())
    }

    /// Any non-terminal status → Failed with a fatal description
    ///
    /// Progress is left where the failing stage found it.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition_to(JobStatus::Failed)?;
        let error = error.into();
        self.current_stage_label = format!("Failed: {}", error);
        self.fatal_error = Some(error);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Items discovered by identification (empty before then)
    pub fn items(&self) -> &[IdentifiedItem] {
        self.output.items()
    }

    pub fn segmentation(&self) -> Option<&ItemOutcomes<SegmentedCutout>> {
        self.output.segmentation()
    }

    pub fn enhancement(&self) -> Option<&ItemOutcomes<EnhancedVariants>> {
        self.output.enhancement()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(Uuid::new_v4(), "https://example.com/watch?v=1".to_string())
    }

    #[test]
    fn test_new_record_is_pending() {
        let job = record();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress_percent, 0);
        assert!(job.items().is_empty());
        assert!(job.fatal_error.is_none());
    }

    #[test]
    fn test_terminal_states_do_not_regress() {
        let mut job = record();
        job.transition_to(JobStatus::Running).unwrap();
        job.complete("done").unwrap();

        assert_eq!(
            job.transition_to(JobStatus::Running),
            Err(InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Running
            })
        );
        assert!(job.fail("late").is_err());
        assert!(job.fatal_error.is_none());
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut job = record();
        assert!(job.complete("skip").is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = record();
        job.advance_progress(50, "half");
        job.advance_progress(30, "stale");
        assert_eq!(job.progress_percent, 50);
        assert_eq!(job.current_stage_label, "stale");
        job.advance_progress(250, "clamped");
        assert_eq!(job.progress_percent, 100);
    }

    #[test]
    fn test_complete_forces_full_progress() {
        let mut job = record();
        job.transition_to(JobStatus::Running).unwrap();
        job.advance_progress(90, FINALIZE_LABEL);
        job.complete("Processing complete!").unwrap();
        assert_eq!(job.progress_percent, 100);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_fail_sets_fatal_error() {
        let mut job = record();
        job.transition_to(JobStatus::Running).unwrap();
        job.fail("Failed to download video: 404").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.fatal_error.as_deref(), Some("Failed to download video: 404"));
    }

    #[test]
    fn test_checkpoints_strictly_increase() {
        let checkpoints: Vec<u8> = Stage::ORDER.iter().map(|s| s.checkpoint()).collect();
        assert!(checkpoints.windows(2).all(|w| w[0] < w[1]));
        assert!(*checkpoints.last().unwrap() < 100);
    }

    #[test]
    fn test_following_label_describes_next_stage() {
        assert_eq!(Stage::Acquire.following_label(), Stage::Extract.start_label());
        assert_eq!(Stage::Enhance.following_label(), FINALIZE_LABEL);
        assert!(!Stage::Identify.isolates_item_errors());
        assert!(Stage::Segment.isolates_item_errors());
    }
}
