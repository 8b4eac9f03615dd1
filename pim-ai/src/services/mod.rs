//! Service modules for the product imagery pipeline
//!
//! - Job store, runner and read-only queries
//! - Per-item fan-out executor
//! - Collaborator contracts and their production implementations
//!   (yt-dlp, ffmpeg, Gemini, Hugging Face)
//! - Local image operations

pub mod api_retry;
pub mod collaborators;
pub mod fan_out;
pub mod frame_decoder;
pub mod gemini_client;
pub mod huggingface_client;
pub mod image_ops;
pub mod job_queries;
pub mod job_store;
pub mod job_workspace;
pub mod media_fetcher;
pub mod pipeline_runner;

pub use collaborators::{
    BoundingBox, CollaboratorError, FrameSource, ItemIdentifier, MediaFetcher, SegmentationMask, Segmenter,
    UnconfiguredCollaborator, VariantGenerator,
};
pub use fan_out::{fan_out, ItemResult};
pub use frame_decoder::FfmpegFrameSource;
pub use gemini_client::GeminiClient;
pub use huggingface_client::HuggingFaceClient;
pub use job_queries::{Artifact, JobQueries, QueryError};
pub use job_store::{JobStore, StoreError};
pub use job_workspace::{sanitize_filename, JobWorkspace};
pub use media_fetcher::YtDlpFetcher;
pub use pipeline_runner::{Collaborators, PipelineRunner, StageError, STYLES, TASK_TERMINATED_ERROR};
