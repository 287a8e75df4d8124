use crate::config::DatabaseConfig;
use crate::error::PipelineError;
use crate::s3_uploader::StorageLocator;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Video record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Video {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    /// Storage locator as `bucket,key` once a video has been uploaded.
    /// Responses carry a presigned URL here instead.
    pub video_url: Option<String>,
    pub user_id: Uuid,
}

impl Video {
    pub fn storage_locator(&self) -> Option<StorageLocator> {
        self.video_url.as_deref().and_then(StorageLocator::parse)
    }
}

/// Record store the pipeline reads from and links uploads into
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_video(&self, id: Uuid) -> Result<Option<Video>, PipelineError>;

    /// Point the record at a stored object. The write only applies while
    /// `owner` still owns the record.
    async fn update_video_locator(
        &self,
        id: Uuid,
        owner: Uuid,
        locator: &StorageLocator,
    ) -> Result<Video, PipelineError>;

    async fn health_check(&self) -> Result<(), PipelineError>;
}

/// Video metadata store in PostgreSQL
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MetadataStore {
    async fn get_video(&self, id: Uuid) -> Result<Option<Video>, PipelineError> {
        sqlx::query_as::<_, Video>(
            r#"
            SELECT id, created_at, updated_at, title, description,
                   thumbnail_url, video_url, user_id
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::storage("Couldn't get the video", e))
    }

    #[instrument(skip(self, locator), fields(video_id = %id, key = %locator.key))]
    async fn update_video_locator(
        &self,
        id: Uuid,
        owner: Uuid,
        locator: &StorageLocator,
    ) -> Result<Video, PipelineError> {
        let video = sqlx::query_as::<_, Video>(
            r#"
            UPDATE videos
            SET video_url = $3, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING id, created_at, updated_at, title, description,
                      thumbnail_url, video_url, user_id
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(locator.to_record_value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::storage("failed to update the video", e))?
        .ok_or_else(|| {
            PipelineError::storage(
                "failed to update the video",
                "no video with this id is owned by the caller",
            )
        })?;

        debug!("Video record linked to stored object");
        Ok(video)
    }

    async fn health_check(&self) -> Result<(), PipelineError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::storage("Database unavailable", e))?;
        Ok(())
    }
}
