use crate::classifier::AspectRatio;
use crate::config::S3Config;
use crate::error::PipelineError;
use anyhow::{ensure, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Bytes of entropy in the random part of an object key
const OBJECT_ID_BYTES: usize = 32;

/// Bucket and key of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocator {
    pub bucket: String,
    pub key: String,
}

impl StorageLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Form persisted on the video record: `bucket,key`
    pub fn to_record_value(&self) -> String {
        format!("{},{}", self.bucket, self.key)
    }

    /// Parse a persisted `bucket,key` value. Anything without a comma is not
    /// a locator (e.g. an already resolved URL).
    pub fn parse(value: &str) -> Option<Self> {
        let (bucket, key) = value.split_once(',')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(bucket, key))
    }
}

impl fmt::Display for StorageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Generate an object key for an upload
/// Format: {aspect_ratio}/{random_id}.{extension}
///
/// The random id is 256 bits from the OS RNG, URL-safe base64 without padding,
/// so two uploads never land on the same key in practice.
pub fn generate_object_key(aspect_ratio: AspectRatio, extension: &str) -> String {
    format!(
        "{prefix}/{id}.{ext}",
        prefix = aspect_ratio.as_str(),
        id = random_object_id(),
        ext = extension.to_lowercase()
    )
}

fn random_object_id() -> String {
    let mut bytes = [0u8; OBJECT_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Durable object storage used by the upload pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Single-attempt write of a local file
    async fn put_file(
        &self,
        locator: &StorageLocator,
        path: &Path,
        content_type: &str,
    ) -> Result<(), PipelineError>;

    /// Time-limited GET URL for an object
    async fn presign_get(
        &self,
        locator: &StorageLocator,
        expires_in: Duration,
    ) -> Result<String, PipelineError>;
}

/// S3-backed object store
pub struct S3Uploader {
    client: S3Client,
}

impl S3Uploader {
    /// Create a new S3 uploader
    pub async fn new(config: &S3Config) -> Result<Self> {
        if let Some(ref endpoint_url) = config.endpoint_url {
            ensure!(
                endpoint_url.starts_with("http://") || endpoint_url.starts_with("https://"),
                "S3 endpoint URL must be http(s): {}",
                endpoint_url
            );
        }

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 uploader initialized"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl ObjectStore for S3Uploader {
    #[instrument(skip(self, path), fields(bucket = %locator.bucket, key = %locator.key))]
    async fn put_file(
        &self,
        locator: &StorageLocator,
        path: &Path,
        content_type: &str,
    ) -> Result<(), PipelineError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| PipelineError::storage("Failed to open fast start file", e))?;

        self.client
            .put_object()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                PipelineError::storage("Failed to store the video in s3", DisplayErrorContext(&e))
            })?;

        debug!("Video object written");
        Ok(())
    }

    async fn presign_get(
        &self,
        locator: &StorageLocator,
        expires_in: Duration,
    ) -> Result<String, PipelineError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| PipelineError::storage("Failed to get presigned s3 url", e))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&locator.bucket)
            .key(&locator.key)
            .presigned(presigning_config)
            .await
            .map_err(|e| {
                PipelineError::storage("Failed to get presigned s3 url", DisplayErrorContext(&e))
            })?;

        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_endpoint_without_scheme() {
        let config = S3Config {
            bucket: "tubely-videos".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some("localhost:9000".to_string()),
            force_path_style: true,
            presigned_url_expiry_secs: 3600,
        };

        let err = S3Uploader::new(&config).await.err().unwrap();
        assert!(err.to_string().contains("localhost:9000"));
    }

    fn assert_key_shape(key: &str, prefix: &str, ext: &str) {
        let (head, file) = key.split_once('/').expect("key has a prefix");
        assert_eq!(head, prefix);
        let (id, extension) = file.rsplit_once('.').expect("key has an extension");
        assert_eq!(extension, ext);
        // 32 bytes -> 43 unpadded base64 chars
        assert_eq!(id.len(), 43);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generate_object_key_shape() {
        assert_key_shape(
            &generate_object_key(AspectRatio::Landscape, "mp4"),
            "landscape",
            "mp4",
        );
        assert_key_shape(
            &generate_object_key(AspectRatio::Portrait, "MP4"),
            "portrait",
            "mp4",
        );
        assert_key_shape(&generate_object_key(AspectRatio::Other, "mp4"), "other", "mp4");
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let keys: std::collections::HashSet<_> = (0..1000)
            .map(|_| generate_object_key(AspectRatio::Landscape, "mp4"))
            .collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_locator_record_value() {
        let locator = StorageLocator::new("tubely-videos", "portrait/abc_-123.mp4");
        assert_eq!(locator.to_record_value(), "tubely-videos,portrait/abc_-123.mp4");
        assert_eq!(StorageLocator::parse(&locator.to_record_value()), Some(locator));
    }

    #[test]
    fn test_locator_parse_rejects_urls() {
        assert_eq!(
            StorageLocator::parse("https://tubely-videos.s3.us-east-1.amazonaws.com/other/x.mp4"),
            None
        );
        assert_eq!(StorageLocator::parse(",key"), None);
        assert_eq!(StorageLocator::parse("bucket,"), None);
    }

    #[test]
    fn test_locator_display() {
        let locator = StorageLocator::new("b", "other/k.mp4");
        assert_eq!(locator.to_string(), "s3://b/other/k.mp4");
    }
}
