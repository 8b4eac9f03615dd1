//! Frame sampling via an `ffmpeg` subprocess

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::collaborators::{CollaboratorError, FrameSource};
use crate::models::{FrameRef, MediaRef};

/// Samples `fps=<rate>` frames into `frame_NNNN.jpg` files
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    program: PathBuf,
}

impl Default for FfmpegFrameSource {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegFrameSource {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// Numeric index of a `frame_<n>.jpg` file name
fn frame_index(name: &str) -> Option<u64> {
    name.strip_prefix("frame_")?.strip_suffix(".jpg")?.parse().ok()
}

/// `frame_<n>.jpg` files in `dir` ordered by `n`, at most `max_count`
///
/// Zero padding stops at four digits, so name order would put
/// `frame_10000` ahead of `frame_1001`.
pub async fn list_frames(dir: &Path, max_count: usize) -> Result<Vec<FrameRef>, CollaboratorError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut frames = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(index) = frame_index(&name) {
            frames.push((index, entry.path()));
        }
    }

    frames.sort();
    frames.truncate(max_count);
    Ok(frames.into_iter().map(|(_, path)| FrameRef(path)).collect())
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn decode_frames(
        &self,
        media: &MediaRef,
        sample_rate_fps: f64,
        max_count: usize,
        out_dir: &Path,
    ) -> Result<Vec<FrameRef>, CollaboratorError> {
        tokio::fs::create_dir_all(out_dir).await?;

        tracing::debug!(
            media = %media.path().display(),
            sample_rate_fps,
            max_count,
            "Running ffmpeg frame sampling"
        );

        let output = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(media.path())
            .arg("-vf")
            .arg(format!("fps={}", sample_rate_fps))
            .arg("-frames:v")
            .arg(max_count.to_string())
            .args(["-q:v", "2"])
            .arg(out_dir.join("frame_%04d.jpg"))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                CollaboratorError::Unavailable(format!("{} could not be started: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::Process(format!(
                "ffmpeg failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }

        list_frames(out_dir, max_count).await
    }
}
