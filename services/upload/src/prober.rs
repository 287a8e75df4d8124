//! Stream dimension probing.

use crate::classifier::AspectRatio;
use crate::config::UploadConfig;
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Dimensions of the first video stream in a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamDimensions {
    pub width: u32,
    pub height: u32,
}

impl StreamDimensions {
    pub fn aspect_ratio(&self) -> AspectRatio {
        AspectRatio::classify(self.width, self.height)
    }
}

/// Inspects a staged media file without decoding it
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<StreamDimensions, PipelineError>;
}

/// ffprobe JSON output, reduced to what classification needs
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Prober backed by the `ffprobe` binary
pub struct FfprobeProber {
    ffprobe_path: String,
}

impl FfprobeProber {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            ffprobe_path: config.ffprobe_path.clone(),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    #[instrument(skip(self), fields(ffprobe = %self.ffprobe_path))]
    async fn probe(&self, path: &Path) -> Result<StreamDimensions, PipelineError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PipelineError::Probe(format!("failed to run {}: {}", self.ffprobe_path, e)))?;

        if !output.status.success() {
            return Err(PipelineError::Probe(format!(
                "{} exited with {}: {}",
                self.ffprobe_path,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let dimensions = parse_probe_output(&output.stdout)?;

        debug!(
            width = dimensions.width,
            height = dimensions.height,
            "Probed video stream"
        );

        Ok(dimensions)
    }
}

/// Take the first stream of an ffprobe report. Missing dimensions read as zero.
fn parse_probe_output(stdout: &[u8]) -> Result<StreamDimensions, PipelineError> {
    let report: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| PipelineError::Probe(format!("unparsable ffprobe output: {}", e)))?;

    let stream = report
        .streams
        .first()
        .ok_or_else(|| PipelineError::Probe("no video streams found".to_string()))?;

    Ok(StreamDimensions {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANDSCAPE_REPORT: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "30/1"
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio"
            }
        ]
    }"#;

    #[test]
    fn test_parse_first_stream() {
        let dims = parse_probe_output(LANDSCAPE_REPORT.as_bytes()).unwrap();
        assert_eq!(dims, StreamDimensions { width: 1920, height: 1080 });
        assert_eq!(dims.aspect_ratio(), AspectRatio::Landscape);
    }

    #[test]
    fn test_missing_dimensions_read_as_zero() {
        let dims = parse_probe_output(br#"{"streams": [{"codec_type": "video"}]}"#).unwrap();
        assert_eq!(dims, StreamDimensions { width: 0, height: 0 });
        assert_eq!(dims.aspect_ratio(), AspectRatio::Other);
    }

    #[test]
    fn test_no_streams_is_an_error() {
        let err = parse_probe_output(br#"{"streams": []}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Probe(_)));

        let err = parse_probe_output(b"{}").unwrap_err();
        assert!(matches!(err, PipelineError::Probe(_)));
    }

    #[test]
    fn test_garbage_output_is_an_error() {
        let err = parse_probe_output(b"Invalid data found when processing input").unwrap_err();
        assert!(err.to_string().contains("unparsable"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_probe_error() {
        let prober = FfprobeProber {
            ffprobe_path: "/nonexistent/ffprobe".to_string(),
        };
        let err = prober.probe(Path::new("/tmp/none.mp4")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Probe(_)));
    }
}
