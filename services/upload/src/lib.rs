//! Tubely Upload Service
//!
//! Video ingestion service for the Tubely platform. An authenticated owner
//! posts a video for an existing record; the service stages it, reads its
//! dimensions, classifies the aspect ratio, rewrites the container for
//! progressive playback, stores it in S3 under an unguessable key, and links
//! the record to the stored object.
//!
//! ## Features
//!
//! - **Strict Intake**: Only the configured container type is accepted, and
//!   nothing touches disk before that check passes
//! - **Aspect Ratio Partitioning**: Objects land under `landscape/`,
//!   `portrait/` or `other/` based on the probed dimensions
//! - **Fast Start**: The `moov` index is moved to the front of the file
//!   without re-encoding
//! - **Presigned Playback**: Records are returned with a time-limited URL in
//!   place of the permanent storage locator
//!
//! ## Architecture
//!
//! ```text
//! HTTP multipart             Local temp dir             S3 Bucket
//! ┌──────────────┐          ┌──────────────┐          ┌──────────────┐
//! │ POST         │          │ staged .mp4  │          │ landscape/   │
//! │ video_upload │─────────▶│ .processing  │─────────▶│ portrait/    │
//! └──────────────┘          └──────────────┘          │ other/       │
//!        │                     │        ▲             └──────────────┘
//!        ▼                     ▼        │                    │
//! ┌──────────────┐          ┌──────────────┐                 │
//! │ Auth +       │          │ ffprobe /    │                 │
//! │ Owner Check  │          │ ffmpeg       │                 │
//! └──────────────┘          └──────────────┘                 │
//!                                                            ▼
//!                           ┌──────────────┐          ┌──────────────┐
//!                           │ Presigned    │◀─────────│ Metadata     │
//!                           │ URL          │          │ Store        │
//!                           └──────────────┘          └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod error;
pub mod ingress;
pub mod metadata_store;
pub mod pipeline;
pub mod presigned_urls;
pub mod prober;
pub mod remuxer;
pub mod s3_uploader;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{AuthorizedVideo, JwtValidator, TokenValidator};
pub use classifier::AspectRatio;
pub use config::Config;
pub use error::PipelineError;
pub use ingress::IngressBuffer;
pub use metadata_store::{MetadataStore, RecordStore, Video};
pub use pipeline::{PipelineState, UploadOutcome, UploadPipeline};
pub use presigned_urls::{PresignedUrl, SignedVideo};
pub use prober::{FfprobeProber, MediaProber, StreamDimensions};
pub use remuxer::{FfmpegRemuxer, Remuxer};
pub use s3_uploader::{ObjectStore, S3Uploader, StorageLocator};
