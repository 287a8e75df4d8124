//! Fast-start remuxing.

use crate::config::UploadConfig;
use crate::error::PipelineError;
use crate::ingress::ScratchFile;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

const FAST_START_SUFFIX: &str = ".processing";

/// Rewrites a container so its index sits at the head of the file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Remuxer: Send + Sync {
    /// Produce a new file next to `path`. The input is never returned as output.
    async fn remux(&self, path: &Path) -> Result<ScratchFile, PipelineError>;
}

/// Remuxer backed by the `ffmpeg` binary, stream copy only
pub struct FfmpegRemuxer {
    ffmpeg_path: String,
}

impl FfmpegRemuxer {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    #[instrument(skip(self), fields(ffmpeg = %self.ffmpeg_path))]
    async fn remux(&self, path: &Path) -> Result<ScratchFile, PipelineError> {
        // Guard first so a partial output from a failed run is removed too
        let output_file = ScratchFile::new(fast_start_output_path(path));

        let output = Command::new(&self.ffmpeg_path)
            .args(["-y", "-v", "error", "-i"])
            .arg(path)
            .args(["-c", "copy", "-movflags", "faststart", "-f", "mp4"])
            .arg(output_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PipelineError::Remux(format!("failed to run {}: {}", self.ffmpeg_path, e)))?;

        if !output.status.success() {
            return Err(PipelineError::Remux(format!(
                "{} exited with {}: {}",
                self.ffmpeg_path,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!(output = %output_file.path().display(), "Remuxed for fast start");

        Ok(output_file)
    }
}

/// `<input>.processing`, alongside the staged file
fn fast_start_output_path(input: &Path) -> PathBuf {
    let mut name = OsString::from(input.as_os_str());
    name.push(FAST_START_SUFFIX);
    PathBuf::from(name)
}
