//! Upload ingestion pipeline.
//!
//! One request walks the stages strictly in order:
//!
//! ```text
//! Received → Validated → Staged → Probed → Classified → Remuxed → Uploaded → Linked → Completed
//! ```
//!
//! Any stage can drop into `Failed`. Temp files are owned by the running
//! [`UploadPipeline::run`] call and are removed on every exit path. An object
//! already written to the store is not rolled back if linking fails.

use crate::auth::AuthorizedVideo;
use crate::classifier::AspectRatio;
use crate::config::Config;
use crate::error::PipelineError;
use crate::ingress::IngressBuffer;
use crate::metadata_store::RecordStore;
use crate::presigned_urls::{sign_video, SignedVideo};
use crate::prober::{MediaProber, StreamDimensions};
use crate::remuxer::Remuxer;
use crate::s3_uploader::{generate_object_key, ObjectStore, StorageLocator};
use bytes::Bytes;
use futures::Stream;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Where a request currently is in the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Validated,
    Staged,
    Probed,
    Classified,
    Remuxed,
    Uploaded,
    Linked,
    Completed,
    Failed(String),
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Staged => "staged",
            Self::Probed => "probed",
            Self::Classified => "classified",
            Self::Remuxed => "remuxed",
            Self::Uploaded => "uploaded",
            Self::Linked => "linked",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
        }
    }

    /// Step attempted after reaching this state
    fn next_step(&self) -> &'static str {
        match self {
            Self::Received => "validate",
            Self::Validated => "stage",
            Self::Staged => "probe",
            Self::Probed => "classify",
            Self::Classified => "remux",
            Self::Remuxed => "upload",
            Self::Uploaded => "link",
            Self::Linked => "sign",
            Self::Completed | Self::Failed(_) => "complete",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Per-request progress tracker
#[derive(Debug)]
struct UploadSession {
    video_id: Uuid,
    state: PipelineState,
}

impl UploadSession {
    fn new(video_id: Uuid) -> Self {
        Self {
            video_id,
            state: PipelineState::Received,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(
            video_id = %self.video_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Pipeline stage transition"
        );
        self.state = next;
    }

    /// Move to `Failed`, returning the step that failed
    fn fail(&mut self, err: &PipelineError) -> &'static str {
        let failed_step = self.state.next_step();
        self.state = PipelineState::Failed(err.to_string());
        failed_step
    }
}

/// Result of a completed upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Updated record with a presigned playback URL in place of the locator
    pub video: SignedVideo,
    pub locator: StorageLocator,
    pub dimensions: StreamDimensions,
    pub aspect_ratio: AspectRatio,
    /// Bytes received from the client before remuxing
    pub staged_bytes: u64,
}

/// Runs validated uploads from request body to linked, playable record
pub struct UploadPipeline {
    ingress: IngressBuffer,
    prober: Arc<dyn MediaProber>,
    remuxer: Arc<dyn Remuxer>,
    store: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    bucket: String,
    presigned_url_expiry: Duration,
}

impl UploadPipeline {
    pub fn new(
        config: &Config,
        prober: Arc<dyn MediaProber>,
        remuxer: Arc<dyn Remuxer>,
        store: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            ingress: IngressBuffer::new(&config.upload)?,
            prober,
            remuxer,
            store,
            records,
            bucket: config.s3.bucket.clone(),
            presigned_url_expiry: config.presigned_url_expiry(),
        })
    }

    /// Run one upload for a record whose ownership is already established.
    #[instrument(skip_all, fields(video_id = %video.id(), user_id = %video.owner()))]
    pub async fn run<S, E>(
        &self,
        video: AuthorizedVideo,
        content_type: Option<&str>,
        body: S,
    ) -> Result<UploadOutcome, PipelineError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let started = Instant::now();
        let mut session = UploadSession::new(video.id());

        match self.execute(&mut session, &video, content_type, body).await {
            Ok(outcome) => {
                let elapsed = started.elapsed();
                metrics::counter!("upload.pipeline.completed").increment(1);
                metrics::histogram!("upload.pipeline.duration_seconds")
                    .record(elapsed.as_secs_f64());

                info!(
                    key = %outcome.locator.key,
                    aspect_ratio = %outcome.aspect_ratio,
                    width = outcome.dimensions.width,
                    height = outcome.dimensions.height,
                    staged_bytes = outcome.staged_bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Video upload completed"
                );

                Ok(outcome)
            }
            Err(e) => {
                let stage = session.fail(&e);
                metrics::counter!("upload.pipeline.failed", "stage" => stage).increment(1);

                if e.is_client_error() {
                    warn!(stage = stage, error = %e, "Video upload rejected");
                } else {
                    error!(stage = stage, error = %e, "Video upload failed");
                }

                Err(e)
            }
        }
    }

    async fn execute<S, E>(
        &self,
        session: &mut UploadSession,
        video: &AuthorizedVideo,
        content_type: Option<&str>,
        body: S,
    ) -> Result<UploadOutcome, PipelineError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        // Nothing is written to disk before the declared type is accepted
        let accepted = self.ingress.validate(content_type)?;
        session.advance(PipelineState::Validated);

        let staged = self.ingress.stage(&accepted, body).await?;
        let staged_bytes = staged.size_bytes();
        session.advance(PipelineState::Staged);

        let dimensions = self.prober.probe(staged.path()).await?;
        session.advance(PipelineState::Probed);

        let aspect_ratio = dimensions.aspect_ratio();
        session.advance(PipelineState::Classified);

        let remuxed = self.remuxer.remux(staged.path()).await?;
        session.advance(PipelineState::Remuxed);

        let locator = StorageLocator::new(
            self.bucket.clone(),
            generate_object_key(aspect_ratio, accepted.extension()),
        );
        self.store
            .put_file(&locator, remuxed.path(), accepted.content_type())
            .await?;
        metrics::counter!("upload.objects.uploaded").increment(1);
        session.advance(PipelineState::Uploaded);

        // Local copies are no longer needed once the object is stored
        drop(remuxed);
        drop(staged);

        let linked = match self
            .records
            .update_video_locator(video.id(), video.owner(), &locator)
            .await
        {
            Ok(linked) => linked,
            Err(e) => {
                metrics::counter!("upload.objects.orphaned").increment(1);
                warn!(
                    bucket = %locator.bucket,
                    key = %locator.key,
                    error = %e,
                    "Stored object left unlinked"
                );
                return Err(e);
            }
        };
        session.advance(PipelineState::Linked);

        let video = sign_video(self.store.as_ref(), linked, self.presigned_url_expiry).await?;
        session.advance(PipelineState::Completed);

        Ok(UploadOutcome {
            video,
            locator,
            dimensions,
            aspect_ratio,
            staged_bytes,
        })
    }
}
