//! Request body staging.
//!
//! Uploads are validated against the accepted container type before anything
//! touches the filesystem, then streamed to a temp file that is removed when
//! the [`StagedUpload`] is dropped.

use crate::config::UploadConfig;
use crate::error::PipelineError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use mime::Mime;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, trace, warn};

const STAGING_PREFIX: &str = "tubely-upload";

/// Content type that passed validation, with the extension it maps to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedUpload {
    content_type: String,
    extension: String,
}

impl AcceptedUpload {
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// A request body written to ephemeral storage
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    size_bytes: u64,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// File owned by the current request, deleted on drop
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => trace!(path = %self.path.display(), "Removed scratch file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove scratch file"),
        }
    }
}

/// Validates and stages inbound video bodies
pub struct IngressBuffer {
    accepted: Mime,
    max_bytes: u64,
    temp_dir: Option<PathBuf>,
}

impl IngressBuffer {
    pub fn new(config: &UploadConfig) -> Result<Self, PipelineError> {
        let accepted: Mime = config.accepted_content_type.parse().map_err(|e| {
            PipelineError::Internal(format!(
                "accepted content type {:?} is not a MIME type: {}",
                config.accepted_content_type, e
            ))
        })?;

        Ok(Self {
            accepted,
            max_bytes: config.max_upload_bytes,
            temp_dir: config.temp_dir.clone(),
        })
    }

    /// Check the declared content type. Parameters are ignored; only the
    /// essence (`type/subtype`) has to match.
    pub fn validate(&self, declared: Option<&str>) -> Result<AcceptedUpload, PipelineError> {
        let declared = declared
            .ok_or_else(|| PipelineError::Validation("Missing media type".to_string()))?;

        let mime: Mime = declared
            .parse()
            .map_err(|_| PipelineError::Validation("Couldn't parse mime type".to_string()))?;

        if mime.essence_str() != self.accepted.essence_str() {
            return Err(PipelineError::Validation("invalid media type".to_string()));
        }

        Ok(AcceptedUpload {
            content_type: mime.essence_str().to_string(),
            extension: mime.subtype().as_str().to_string(),
        })
    }

    /// Write the body to a temp file, failing once it grows past the ceiling.
    /// On any error the partial file is removed.
    #[instrument(skip(self, body), fields(max_bytes = self.max_bytes))]
    pub async fn stage<S, E>(
        &self,
        accepted: &AcceptedUpload,
        body: S,
    ) -> Result<StagedUpload, PipelineError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let suffix = format!(".{}", accepted.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX).suffix(&suffix);
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let mut out = tokio::fs::File::from_std(file.as_file().try_clone()?);
        let mut size_bytes: u64 = 0;

        futures::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| PipelineError::Validation(format!("Couldn't read video: {}", e)))?;

            size_bytes += chunk.len() as u64;
            if size_bytes > self.max_bytes {
                return Err(PipelineError::Validation(format!(
                    "Video exceeds the maximum upload size of {} bytes",
                    self.max_bytes
                )));
            }

            out.write_all(&chunk).await?;
        }
        out.flush().await?;

        debug!(
            path = %file.path().display(),
            size_bytes = size_bytes,
            "Upload staged"
        );
        metrics::histogram!("upload.staged.bytes").record(size_bytes as f64);

        Ok(StagedUpload { file, size_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio_test::{assert_err, assert_ok};

    fn test_config(dir: &Path, max_upload_bytes: u64) -> UploadConfig {
        UploadConfig {
            max_upload_bytes,
            accepted_content_type: "video/mp4".to_string(),
            temp_dir: Some(dir.to_path_buf()),
            ffprobe_path: "ffprobe".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }

    fn body(chunks: Vec<&'static [u8]>) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_validate_accepts_mp4_with_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let ingress = IngressBuffer::new(&test_config(dir.path(), 1024)).unwrap();

        let accepted = assert_ok!(ingress.validate(Some("video/mp4")));
        assert_eq!(accepted.content_type(), "video/mp4");
        assert_eq!(accepted.extension(), "mp4");

        let accepted = assert_ok!(ingress.validate(Some("video/mp4; codecs=\"avc1.42E01E\"")));
        assert_eq!(accepted.content_type(), "video/mp4");
    }

    #[test]
    fn test_validate_rejects_other_types() {
        let dir = tempfile::tempdir().unwrap();
        let ingress = IngressBuffer::new(&test_config(dir.path(), 1024)).unwrap();

        for declared in ["video/quicktime", "image/png", "application/octet-stream"] {
            let err = assert_err!(ingress.validate(Some(declared)));
            assert!(matches!(err, PipelineError::Validation(_)), "{declared}");
        }
        assert_err!(ingress.validate(Some("not a mime type")));
        assert_err!(ingress.validate(None));

        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_stage_writes_body_and_cleans_up_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let ingress = IngressBuffer::new(&test_config(dir.path(), 1024)).unwrap();
        let accepted = ingress.validate(Some("video/mp4")).unwrap();

        let staged = ingress
            .stage(&accepted, body(vec![b"\x00\x00\x00\x18ftyp", b"mp42"]))
            .await
            .unwrap();

        assert_eq!(staged.size_bytes(), 12);
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"\x00\x00\x00\x18ftypmp42");
        let name = staged.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(STAGING_PREFIX));
        assert!(name.ends_with(".mp4"));

        drop(staged);
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_stage_rejects_oversized_body() {
        let dir = tempfile::tempdir().unwrap();
        let ingress = IngressBuffer::new(&test_config(dir.path(), 8)).unwrap();
        let accepted = ingress.validate(Some("video/mp4")).unwrap();

        let err = ingress
            .stage(&accepted, body(vec![b"12345", b"67890"]))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_stage_body_error_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let ingress = IngressBuffer::new(&test_config(dir.path(), 1024)).unwrap();
        let accepted = ingress.validate(Some("video/mp4")).unwrap();

        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]);

        let err = ingress.stage(&accepted, failing).await.unwrap_err();
        assert!(err.to_string().contains("client went away"));
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[test]
    fn test_scratch_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4.processing");
        std::fs::write(&path, b"remuxed").unwrap();

        let scratch = ScratchFile::new(&path);
        assert!(scratch.path().exists());
        drop(scratch);
        assert!(!path.exists());

        // Already gone is fine
        drop(ScratchFile::new(dir.path().join("never-created")));
    }
}
