//! Scripted collaborators
//!
//! Frames and masks are real images written with the `image` crate so the
//! local image operations run exactly as in production.

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use pim_ai::models::{FrameRef, Item, MediaRef};
use pim_ai::services::{
    Collaborators, CollaboratorError, FrameSource, ItemIdentifier, MediaFetcher, SegmentationMask, Segmenter,
    VariantGenerator, STYLES,
};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

fn png_bytes(image: DynamicImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn item(name: &str) -> Item {
    Item {
        name: name.to_string(),
        descriptor: format!("{} seen in the video", name),
    }
}

// ---------------------------------------------------------------------------
// Media fetcher
// ---------------------------------------------------------------------------

pub enum FetchBehavior {
    Succeed,
    Fail(String),
    Panic,
    /// Wait for the notify before succeeding
    WaitFor(Arc<Notify>),
}

pub struct FakeFetcher {
    pub behavior: FetchBehavior,
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, _input_reference: &str, dest_dir: &Path) -> Result<MediaRef, CollaboratorError> {
        match &self.behavior {
            FetchBehavior::Succeed => {}
            FetchBehavior::Fail(msg) => return Err(CollaboratorError::Process(msg.clone())),
            FetchBehavior::Panic => panic!("fetcher crashed"),
            FetchBehavior::WaitFor(gate) => gate.notified().await,
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join("video.mp4");
        tokio::fs::write(&path, b"not really a video").await?;
        Ok(MediaRef(path))
    }
}

// ---------------------------------------------------------------------------
// Frame source
// ---------------------------------------------------------------------------

pub struct FakeFrames {
    pub count: usize,
    /// Return every frame even past `max_count`
    pub ignore_cap: bool,
    pub requested_max: Mutex<Option<usize>>,
}

impl FakeFrames {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            ignore_cap: false,
            requested_max: Mutex::new(None),
        }
    }
}

#[async_trait]
impl FrameSource for FakeFrames {
    async fn decode_frames(
        &self,
        _media: &MediaRef,
        _sample_rate_fps: f64,
        max_count: usize,
        out_dir: &Path,
    ) -> Result<Vec<FrameRef>, CollaboratorError> {
        *self.requested_max.lock().unwrap() = Some(max_count);
        let produced = if self.ignore_cap { self.count } else { self.count.min(max_count) };

        tokio::fs::create_dir_all(out_dir).await?;
        let mut frames = Vec::new();
        for i in 1..=produced {
            let path = out_dir.join(format!("frame_{:04}.jpg", i));
            let shade = (i * 20 % 255) as u8;
            RgbImage::from_pixel(16, 12, Rgb([shade, 80, 160]))
                .save(&path)
                .map_err(|e| CollaboratorError::Process(e.to_string()))?;
            frames.push(FrameRef(path));
        }
        Ok(frames)
    }
}

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

pub struct FakeIdentifier {
    pub items: Vec<Item>,
    pub fail: Option<String>,
    /// Items for which no frame matches
    pub unseen: HashSet<String>,
    pub identify_sample_sizes: Mutex<Vec<usize>>,
    pub best_frame_sample_sizes: Mutex<Vec<usize>>,
}

impl FakeIdentifier {
    pub fn new(names: &[&str]) -> Self {
        Self {
            items: names.iter().map(|n| item(n)).collect(),
            fail: None,
            unseen: HashSet::new(),
            identify_sample_sizes: Mutex::new(Vec::new()),
            best_frame_sample_sizes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ItemIdentifier for FakeIdentifier {
    async fn identify_items(&self, frames: &[FrameRef]) -> Result<Vec<Item>, CollaboratorError> {
        self.identify_sample_sizes.lock().unwrap().push(frames.len());
        match &self.fail {
            Some(msg) => Err(CollaboratorError::Network(msg.clone())),
            None => Ok(self.items.clone()),
        }
    }

    async fn select_best_frame(
        &self,
        item_name: &str,
        frames: &[FrameRef],
    ) -> Result<Option<FrameRef>, CollaboratorError> {
        self.best_frame_sample_sizes.lock().unwrap().push(frames.len());
        if self.unseen.contains(item_name) {
            return Ok(None);
        }
        Ok(frames.last().cloned())
    }
}

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSegmenter {
    pub fail_for: HashSet<String>,
    pub panic_for: HashSet<String>,
    /// Items whose mask is fully transparent
    pub empty_mask_for: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Segmenter for FakeSegmenter {
    async fn segment(&self, item_name: &str, _frame: &FrameRef) -> Result<SegmentationMask, CollaboratorError> {
        self.calls.lock().unwrap().push(item_name.to_string());

        if self.panic_for.contains(item_name) {
            panic!("segmenter crashed on {}", item_name);
        }
        if self.fail_for.contains(item_name) {
            return Err(CollaboratorError::EmptyResponse(format!("no mask for {}", item_name)));
        }

        let value = if self.empty_mask_for.contains(item_name) { 0 } else { 255 };
        Ok(SegmentationMask {
            encoded: png_bytes(DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([value])))),
            bounding_box: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Variant generator
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeGenerator {
    /// 1-based style numbers that always fail
    pub failing_styles: HashSet<usize>,
    /// Items for which every style fails
    pub failing_items: HashSet<String>,
    pub calls: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl VariantGenerator for FakeGenerator {
    async fn generate_variant(
        &self,
        item_name: &str,
        flattened_image: &Path,
        style: &str,
    ) -> Result<Vec<u8>, CollaboratorError> {
        let style_number = STYLES.iter().position(|s| *s == style).map(|i| i + 1).unwrap_or(0);
        self.calls.lock().unwrap().push((item_name.to_string(), style_number));

        let flattened = image::open(flattened_image).map_err(|e| CollaboratorError::Parse(e.to_string()))?;
        assert!(!flattened.color().has_alpha(), "generator received an image with alpha");

        if self.failing_items.contains(item_name) || self.failing_styles.contains(&style_number) {
            return Err(CollaboratorError::RateLimited(format!("style {} throttled", style_number)));
        }

        Ok(png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([250, 250, 250])))))
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Handles kept by the test to inspect calls after the run
pub struct Fakes {
    pub frames: Arc<FakeFrames>,
    pub identifier: Arc<FakeIdentifier>,
    pub segmenter: Arc<FakeSegmenter>,
    pub generator: Arc<FakeGenerator>,
}

impl Fakes {
    /// Happy path: 30 frames, the given items, everything succeeds
    pub fn new(names: &[&str]) -> Self {
        Self {
            frames: Arc::new(FakeFrames::new(30)),
            identifier: Arc::new(FakeIdentifier::new(names)),
            segmenter: Arc::new(FakeSegmenter::default()),
            generator: Arc::new(FakeGenerator::default()),
        }
    }

    pub fn collaborators(&self, fetch: FetchBehavior) -> Collaborators {
        Collaborators {
            fetcher: Arc::new(FakeFetcher { behavior: fetch }),
            frames: self.frames.clone(),
            identifier: self.identifier.clone(),
            segmenter: self.segmenter.clone(),
            generator: self.generator.clone(),
        }
    }
}
