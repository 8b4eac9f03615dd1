//! Contracts for the external systems the pipeline calls
//!
//! Production implementations live next to this module (yt-dlp, ffmpeg,
//! Gemini, Hugging Face); tests substitute scripted fakes.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::models::{FrameRef, Item, MediaRef};

/// Collaborator call errors
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty response: {0}")]
    EmptyResponse(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Collaborator not configured (missing key or binary)
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

impl CollaboratorError {
    /// Worth backing off exponentially
    pub fn is_rate_limited(&self) -> bool {
        match self {
            CollaboratorError::RateLimited(_) => true,
            CollaboratorError::Api { status, .. } => *status == 429 || *status == 503,
            _ => false,
        }
    }

    /// Worth retrying at all
    pub fn is_retryable(&self) -> bool {
        match self {
            CollaboratorError::Unavailable(_) | CollaboratorError::Io(_) => false,
            CollaboratorError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => true,
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.as_u16() == 429 => CollaboratorError::RateLimited(e.to_string()),
            Some(status) => CollaboratorError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None if e.is_decode() => CollaboratorError::Parse(e.to_string()),
            None => CollaboratorError::Network(e.to_string()),
        }
    }
}

/// Bounding box of a mask, `[y0, x0, y1, x1]` normalised to 0..=1000
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub y0: u32,
    pub x0: u32,
    pub y1: u32,
    pub x1: u32,
}

impl BoundingBox {
    pub const SCALE: u32 = 1000;

    /// Pixel rectangle `(x, y, width, height)` inside an image of the given size
    ///
    /// Returns `None` for degenerate boxes.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp = |v: u32| v.min(Self::SCALE) as u64;
        let x0 = (clamp(self.x0) * width as u64 / Self::SCALE as u64) as u32;
        let x1 = (clamp(self.x1) * width as u64 / Self::SCALE as u64) as u32;
        let y0 = (clamp(self.y0) * height as u64 / Self::SCALE as u64) as u32;
        let y1 = (clamp(self.y1) * height as u64 / Self::SCALE as u64) as u32;

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Segmentation result: an encoded grayscale mask, optionally scoped to a box
#[derive(Debug, Clone)]
pub struct SegmentationMask {
    /// Encoded image (PNG from Gemini)
    pub encoded: Vec<u8>,
    /// When present the mask covers only this region of the frame
    pub bounding_box: Option<BoundingBox>,
}

/// Media acquisition: materialize the input locally
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, input_reference: &str, dest_dir: &Path) -> Result<MediaRef, CollaboratorError>;
}

/// Frame source: decode sampled frames from local media
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Frames are written to `out_dir` and returned in temporal order
    async fn decode_frames(
        &self,
        media: &MediaRef,
        sample_rate_fps: f64,
        max_count: usize,
        out_dir: &Path,
    ) -> Result<Vec<FrameRef>, CollaboratorError>;
}

/// Intelligence collaborator for identification
#[async_trait]
pub trait ItemIdentifier: Send + Sync {
    async fn identify_items(&self, frames: &[FrameRef]) -> Result<Vec<Item>, CollaboratorError>;

    /// `Ok(None)` when no offered frame shows the item
    async fn select_best_frame(
        &self,
        item_name: &str,
        frames: &[FrameRef],
    ) -> Result<Option<FrameRef>, CollaboratorError>;
}

/// Intelligence collaborator for segmentation
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, item_name: &str, frame: &FrameRef) -> Result<SegmentationMask, CollaboratorError>;
}

/// Generation collaborator for enhancement
#[async_trait]
pub trait VariantGenerator: Send + Sync {
    /// Returns encoded image bytes for one style
    async fn generate_variant(
        &self,
        item_name: &str,
        flattened_image: &Path,
        style: &str,
    ) -> Result<Vec<u8>, CollaboratorError>;
}

/// Stand-in for a collaborator whose credentials are missing
///
/// Every call fails with `Unavailable`, so the job fails (or records item
/// errors) at the stage that needed it instead of refusing to start.
#[derive(Debug, Clone)]
pub struct UnconfiguredCollaborator {
    reason: String,
}

impl UnconfiguredCollaborator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    fn error(&self) -> CollaboratorError {
        CollaboratorError::Unavailable(self.reason.clone())
    }
}

#[async_trait]
impl ItemIdentifier for UnconfiguredCollaborator {
    async fn identify_items(&self, _frames: &[FrameRef]) -> Result<Vec<Item>, CollaboratorError> {
        Err(self.error())
    }

    async fn select_best_frame(
        &self,
        _item_name: &str,
        _frames: &[FrameRef],
    ) -> Result<Option<FrameRef>, CollaboratorError> {
        Err(self.error())
    }
}

#[async_trait]
impl Segmenter for UnconfiguredCollaborator {
    async fn segment(&self, _item_name: &str, _frame: &FrameRef) -> Result<SegmentationMask, CollaboratorError> {
        Err(self.error())
    }
}

#[async_trait]
impl VariantGenerator for UnconfiguredCollaborator {
    async fn generate_variant(
        &self,
        _item_name: &str,
        _flattened_image: &Path,
        _style: &str,
    ) -> Result<Vec<u8>, CollaboratorError> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_to_pixels() {
        let bbox = BoundingBox { y0: 250, x0: 100, y1: 750, x1: 600 };
        assert_eq!(bbox.to_pixels(200, 100), Some((20, 25, 100, 50)));
    }

    #[test]
    fn test_degenerate_bounding_box() {
        let bbox = BoundingBox { y0: 500, x0: 500, y1: 500, x1: 900 };
        assert_eq!(bbox.to_pixels(100, 100), None);
    }

    #[test]
    fn test_retry_classification() {
        assert!(CollaboratorError::RateLimited("slow down".into()).is_rate_limited());
        assert!(CollaboratorError::Api { status: 503, message: String::new() }.is_rate_limited());
        assert!(!CollaboratorError::Api { status: 401, message: String::new() }.is_retryable());
        assert!(CollaboratorError::Parse("bad json".into()).is_retryable());
        assert!(!CollaboratorError::Unavailable("no key".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_unconfigured_collaborator_fails_every_call() {
        let missing = UnconfiguredCollaborator::new("GEMINI_API_KEY not set");
        let err = missing.identify_items(&[]).await.unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }
}
