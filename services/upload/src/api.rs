use crate::auth::{authorize_owner, bearer_token, TokenValidator};
use crate::config::ApiConfig;
use crate::error::PipelineError;
use crate::metadata_store::{RecordStore, Video};
use crate::pipeline::UploadPipeline;
use crate::presigned_urls::{sign_video, SignedVideo};
use crate::s3_uploader::ObjectStore;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Multipart framing allowance on top of the video ceiling
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

const VIDEO_FIELD: &str = "video";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub records: Arc<dyn RecordStore>,
    pub store: Arc<dyn ObjectStore>,
    pub tokens: Arc<dyn TokenValidator>,
    pub presigned_url_expiry: Duration,
    pub max_upload_bytes: u64,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let body_limit = usize::try_from(state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/video_upload/:video_id", post(upload_video))
        .route("/api/videos/:video_id", get(get_video))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "upload-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.records.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => {
            error!(error = %e, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": "disconnected"
                })),
            )
        }
    }
}

fn parse_video_id(raw: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(raw).map_err(|_| PipelineError::Validation("Invalid ID".to_string()))
}

async fn load_video(records: &dyn RecordStore, id: Uuid) -> Result<Video, PipelineError> {
    records
        .get_video(id)
        .await?
        .ok_or_else(|| PipelineError::NotFound("Couldn't find the video".to_string()))
}

/// Accept a video for an existing record and return the updated record
#[instrument(skip(state, headers, multipart))]
async fn upload_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<SignedVideo>, PipelineError> {
    let video_id = parse_video_id(&video_id)?;
    let user_id = state.tokens.validate(bearer_token(&headers)?)?;

    let video = load_video(state.records.as_ref(), video_id).await?;
    let authorized = authorize_owner(video, user_id)?;

    info!(video_id = %video_id, user_id = %user_id, "Uploading video");

    // Runs detached from the request so a dropped connection cannot stop an
    // upload halfway through
    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(async move {
        let mut multipart = multipart;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| PipelineError::Validation(format!("Couldn't read video: {}", e)))?
        {
            if field.name() != Some(VIDEO_FIELD) {
                debug!(field = ?field.name(), "Skipping multipart field");
                continue;
            }

            let content_type = field.content_type().map(str::to_string);
            return pipeline
                .run(authorized, content_type.as_deref(), field)
                .await;
        }

        Err(PipelineError::Validation("Couldn't read video".to_string()))
    });

    let outcome = task
        .await
        .map_err(|e| PipelineError::Internal(format!("upload task failed: {}", e)))??;

    Ok(Json(outcome.video))
}

/// Fetch a record with its locator resolved to a playback URL
#[instrument(skip(state, headers))]
async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SignedVideo>, PipelineError> {
    let video_id = parse_video_id(&video_id)?;
    state.tokens.validate(bearer_token(&headers)?)?;

    let video = load_video(state.records.as_ref(), video_id).await?;
    let video = sign_video(state.store.as_ref(), video, state.presigned_url_expiry).await?;

    Ok(Json(video))
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting upload API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
