use crate::error::PipelineError;
use crate::metadata_store::Video;
use crate::s3_uploader::{ObjectStore, StorageLocator};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// A time-limited read URL
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Generate a presigned GET URL for a stored object
pub async fn generate_presigned_url(
    store: &dyn ObjectStore,
    locator: &StorageLocator,
    expiry: Duration,
) -> Result<PresignedUrl, PipelineError> {
    let url = store.presign_get(locator, expiry).await?;

    let expires_at = Utc::now()
        + chrono::Duration::from_std(expiry)
            .map_err(|e| PipelineError::storage("Failed to get presigned s3 url", e))?;

    debug!(locator = %locator, expires_at = %expires_at, "Generated presigned URL");

    Ok(PresignedUrl { url, expires_at })
}

/// A record as returned to clients, with its locator resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedVideo {
    #[serde(flatten)]
    pub video: Video,
    /// When `video_url` stops working; absent when nothing was signed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url_expires_at: Option<DateTime<Utc>>,
}

/// Swap a record's permanent locator for a playback URL. The result is only
/// for responses and is never written back.
pub async fn sign_video(
    store: &dyn ObjectStore,
    mut video: Video,
    expiry: Duration,
) -> Result<SignedVideo, PipelineError> {
    let Some(locator) = video.storage_locator() else {
        return Ok(SignedVideo {
            video,
            video_url_expires_at: None,
        });
    };

    let presigned = generate_presigned_url(store, &locator, expiry).await?;
    video.video_url = Some(presigned.url);

    Ok(SignedVideo {
        video,
        video_url_expires_at: Some(presigned.expires_at),
    })
}
