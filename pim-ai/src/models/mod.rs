//! Data models for pim-ai (product imagery service)
//!
//! - Job record and status state machine
//! - Progressive stage output
//! - Status/results projections for polling clients

pub mod job;
pub mod job_views;
pub mod stage_output;

pub use job::{InvalidTransition, JobRecord, JobStatus, Stage, FINALIZE_LABEL, PENDING_LABEL};
pub use job_views::{ArtifactLink, ResultsSnapshot, StatusSnapshot};
pub use stage_output::{
    ArtifactCategory, ArtifactRef, EnhancedVariants, FrameRef, Identified, IdentifiedItem, Item,
    ItemOutcomes, MediaRef, SegmentedCutout, StageOutput, StyleFailure,
};
