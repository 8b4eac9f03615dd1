//! What the pipeline has produced so far
//!
//! `StageOutput` grows one variant per completed stage. Enhancement results
//! can only exist next to the segmentation results they were derived from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Locally materialized source media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef(pub PathBuf);

impl MediaRef {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// One extracted frame on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameRef(pub PathBuf);

impl FrameRef {
    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn file_name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Artifact families served back to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactCategory {
    Frame,
    Segmented,
    Enhanced,
}

impl ArtifactCategory {
    /// Directory inside the job workspace
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactCategory::Frame => "frames",
            ArtifactCategory::Segmented => "segmented",
            ArtifactCategory::Enhanced => "enhanced",
        }
    }

    /// Accepts both the category name and its directory name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "frame" | "frames" => Some(ArtifactCategory::Frame),
            "segmented" => Some(ArtifactCategory::Segmented),
            "enhanced" => Some(ArtifactCategory::Enhanced),
            _ => None,
        }
    }
}

/// A file produced by the pipeline, relative to the job workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub category: ArtifactCategory,
    pub file_name: String,
}

impl ArtifactRef {
    pub fn new(category: ArtifactCategory, file_name: impl Into<String>) -> Self {
        Self {
            category,
            file_name: file_name.into(),
        }
    }
}

/// A discovered product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(rename = "description", alias = "descriptor", default)]
    pub descriptor: String,
}

/// An item together with the frame that shows it best
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifiedItem {
    pub item: Item,
    pub best_frame: FrameRef,
}

impl IdentifiedItem {
    pub fn name(&self) -> &str {
        &self.item.name
    }
}

/// Output of the Identify stage and everything before it
#[derive(Debug, Clone)]
pub struct Identified {
    pub media: MediaRef,
    pub frames: Vec<FrameRef>,
    pub items: Vec<IdentifiedItem>,
}

/// Per-item results of one stage
///
/// An item name is either in `artifacts` or in `errors`, never both; absence
/// from both means the item was not attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcomes<T> {
    artifacts: BTreeMap<String, T>,
    errors: BTreeMap<String, String>,
}

impl<T> Default for ItemOutcomes<T> {
    fn default() -> Self {
        Self {
            artifacts: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }
}

impl<T> ItemOutcomes<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, item: impl Into<String>, artifact: T) {
        let item = item.into();
        self.errors.remove(&item);
        self.artifacts.insert(item, artifact);
    }

    pub fn record_failure(&mut self, item: impl Into<String>, error: impl Into<String>) {
        let item = item.into();
        self.artifacts.remove(&item);
        self.errors.insert(item, error.into());
    }

    pub fn artifacts(&self) -> &BTreeMap<String, T> {
        &self.artifacts
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn get(&self, item: &str) -> Option<&T> {
        self.artifacts.get(item)
    }

    pub fn succeeded(&self, item: &str) -> bool {
        self.artifacts.contains_key(item)
    }

    pub fn failed(&self, item: &str) -> bool {
        self.errors.contains_key(item)
    }
}

/// Segment stage artifact for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedCutout {
    /// Masked, trimmed RGBA image
    pub image: ArtifactRef,
    /// Mask as returned by the collaborator
    pub mask: ArtifactRef,
}

/// One style that failed inside an otherwise successful variant set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleFailure {
    /// 1-based style number
    pub style: usize,
    pub error: String,
}

/// Enhance stage artifact for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedVariants {
    /// Never empty: an item with zero variants is an item error instead
    pub variants: Vec<ArtifactRef>,
    pub failed_styles: Vec<StyleFailure>,
}

/// Progressive result of the pipeline, one variant per completed stage
#[derive(Debug, Clone, Default)]
pub enum StageOutput {
    #[default]
    Empty,
    Acquired {
        media: MediaRef,
    },
    Extracted {
        media: MediaRef,
        frames: Vec<FrameRef>,
    },
    Identified(Identified),
    Segmented {
        identified: Identified,
        segmentation: ItemOutcomes<SegmentedCutout>,
    },
    Enhanced {
        identified: Identified,
        segmentation: ItemOutcomes<SegmentedCutout>,
        enhancement: ItemOutcomes<EnhancedVariants>,
    },
}

impl StageOutput {
    pub fn items(&self) -> &[IdentifiedItem] {
        match self {
            StageOutput::Identified(identified)
            | StageOutput::Segmented { identified, .. }
            | StageOutput::Enhanced { identified, .. } => &identified.items,
            _ => &[],
        }
    }

    pub fn frames(&self) -> &[FrameRef] {
        match self {
            StageOutput::Extracted { frames, .. } => frames,
            StageOutput::Identified(identified)
            | StageOutput::Segmented { identified, .. }
            | StageOutput::Enhanced { identified, .. } => &identified.frames,
            _ => &[],
        }
    }

    pub fn segmentation(&self) -> Option<&ItemOutcomes<SegmentedCutout>> {
        match self {
            StageOutput::Segmented { segmentation, .. }
            | StageOutput::Enhanced { segmentation, .. } => Some(segmentation),
            _ => None,
        }
    }

    pub fn enhancement(&self) -> Option<&ItemOutcomes<EnhancedVariants>> {
        match self {
            StageOutput::Enhanced { enhancement, .. } => Some(enhancement),
            _ => None,
        }
    }
}
