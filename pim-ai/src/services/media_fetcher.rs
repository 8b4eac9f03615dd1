//! Video acquisition via the `yt-dlp` command-line tool

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::collaborators::{CollaboratorError, MediaFetcher};
use crate::models::MediaRef;

/// File name of the downloaded source inside the job workspace
pub const VIDEO_FILE_NAME: &str = "video.mp4";

/// Downloads the input reference with `yt-dlp`
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: PathBuf,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, input_reference: &str, dest_dir: &Path) -> Result<MediaRef, CollaboratorError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let video_path = dest_dir.join(VIDEO_FILE_NAME);

        tracing::debug!(url = %input_reference, dest = %video_path.display(), "Running yt-dlp");

        let output = Command::new(&self.program)
            .arg("--format")
            .arg("best[ext=mp4]/best")
            .arg("--output")
            .arg(&video_path)
            .arg("--no-playlist")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg(input_reference)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                CollaboratorError::Unavailable(format!("{} could not be started: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::Process(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }

        if !tokio::fs::try_exists(&video_path).await.unwrap_or(false) {
            return Err(CollaboratorError::Process(
                "yt-dlp finished but produced no video file".to_string(),
            ));
        }

        Ok(MediaRef(video_path))
    }
}
