//! Per-job working directory
//!
//! ```text
//! <root>/jobs/<job_id>/
//!     video.mp4
//!     frames/      frame_0001.jpg ...
//!     segmented/   <item>_mask.png, <item>_segmented.png, <item>_flattened.png
//!     enhanced/    <item>_enhanced_1.png ...
//! ```

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::{ArtifactCategory, ArtifactRef};

#[derive(Debug, Clone)]
pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    pub fn new(jobs_dir: &Path, job_id: Uuid) -> Self {
        Self {
            root: jobs_dir.join(job_id.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: ArtifactCategory) -> PathBuf {
        self.root.join(category.dir_name())
    }

    pub fn artifact_path(&self, artifact: &ArtifactRef) -> PathBuf {
        self.category_dir(artifact.category).join(&artifact.file_name)
    }

    /// Create the category directory if needed and return it
    pub async fn ensure_dir(&self, category: ArtifactCategory) -> std::io::Result<PathBuf> {
        let dir = self.category_dir(category);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Look up an artifact by client-supplied name
    ///
    /// Rejects names that could escape the category directory.
    pub fn resolve_artifact(
        &self,
        category: ArtifactCategory,
        file_name: &str,
    ) -> Result<PathBuf, InvalidArtifactName> {
        if !is_plain_file_name(file_name) {
            return Err(InvalidArtifactName(file_name.to_string()));
        }
        Ok(self.category_dir(category).join(file_name))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid artifact name: {0}")]
pub struct InvalidArtifactName(pub String);

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Item name turned into a safe file-name stem
///
/// Spaces become underscores, characters illegal on common file systems are
/// dropped, and runs of underscores collapse.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = match c {
            ' ' => '_',
            '(' | ')' | '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => continue,
            c => c,
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "item".to_string()
    } else {
        trimmed.to_string()
    }
}
