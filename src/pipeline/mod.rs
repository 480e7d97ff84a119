//! End-to-end live pipeline wiring
//!
//! ```text
//! microphone ─▶ AudioCapturePipeline ─▶ bounded channel
//!                                            │
//!                                            ▼
//!                                     UploadScheduler (FIFO)
//!                                            │ encode → transcribe → merge
//!                                            ▼
//!                                     session segments ─▶ ChunkAggregator
//!                                                              │ periodic flush
//!                                                              ▼
//!                                                       analysis boundary
//! ```
//!
//! `LivePipeline` assembles the pieces for one session and owns the
//! scheduler and flush tasks for their lifetime.

pub mod merge;
pub mod scheduler;

pub use merge::{merge_chunk_words, merge_into_session, segments_from_words, MERGE_GAP_SECS};
pub use scheduler::{apply_transcription, UploadScheduler};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::analysis::AnalysisClient;
use crate::audio::{AudioCapturePipeline, CaptureConfig, CaptureError};
use crate::session::aggregator::ChunkAggregator;
use crate::session::SharedSession;
use crate::settings::{ProviderKind, Settings};
use crate::transcription::{
    get_api_key, ChunkedClient, StreamingClient, StreamingConfig, TranscriptionError,
    TranscriptionProvider,
};

/// Errors that can prevent the pipeline from starting.
#[derive(Debug)]
pub enum PipelineError {
    Capture(CaptureError),
    Transcription(TranscriptionError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Capture(e) => write!(f, "Capture: {}", e),
            PipelineError::Transcription(e) => write!(f, "Transcription: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<CaptureError> for PipelineError {
    fn from(e: CaptureError) -> Self {
        PipelineError::Capture(e)
    }
}

impl From<TranscriptionError> for PipelineError {
    fn from(e: TranscriptionError) -> Self {
        PipelineError::Transcription(e)
    }
}

/// Build the configured transcription backend.
///
/// The choice is fixed here, at construction; the scheduler never
/// dispatches on provider kind again.
pub async fn build_provider(
    settings: &Settings,
) -> Result<TranscriptionProvider, TranscriptionError> {
    let api_key = get_api_key().ok_or(TranscriptionError::MissingApiKey)?;

    match settings.provider {
        ProviderKind::Chunked => Ok(TranscriptionProvider::Chunked(ChunkedClient::new(
            settings.transcribe_url.clone(),
            api_key,
            settings.model.clone(),
            settings.diarize,
        ))),
        ProviderKind::Streaming => {
            let config = StreamingConfig {
                ws_url: settings.streaming_ws_url.clone(),
                token_url: settings.token_url.clone(),
                api_key,
                model: settings.model.clone(),
                diarize: settings.diarize,
            };
            let client = StreamingClient::connect(&config).await?;
            Ok(TranscriptionProvider::Streaming(client))
        }
    }
}

/// A running capture-to-analysis pipeline for one session.
///
/// Holds the live cpal stream, so the handle is not `Send`; keep it on
/// the thread that started it.
pub struct LivePipeline {
    capture: AudioCapturePipeline,
    capture_errors: Option<mpsc::Receiver<CaptureError>>,
    scheduler_task: tokio::task::JoinHandle<u64>,
    flush_task: tokio::task::JoinHandle<()>,
    flush_cancel: CancellationToken,
    aggregator: Arc<ChunkAggregator>,
    session: SharedSession,
}

impl LivePipeline {
    /// Assemble and start the pipeline for one session.
    pub async fn start(
        settings: &Settings,
        session: SharedSession,
    ) -> Result<Self, PipelineError> {
        let provider = build_provider(settings).await?;

        let (tx, rx) = mpsc::channel(settings.window_channel_capacity);
        let capture_config = CaptureConfig {
            target_sample_rate: settings.target_sample_rate,
            window_secs: settings.window_secs,
        };
        let mut capture = AudioCapturePipeline::new(capture_config, tx)?;
        let capture_errors = capture.take_error_receiver();

        let analysis = AnalysisClient::new(settings.analyze_url.clone());
        let aggregator = Arc::new(ChunkAggregator::new(session.clone(), analysis));

        let scheduler = UploadScheduler::new(
            rx,
            provider,
            session.clone(),
            aggregator.clone(),
            capture.run_id(),
            settings.target_sample_rate,
        );
        let scheduler_task = tokio::spawn(scheduler.run());

        let flush_cancel = CancellationToken::new();
        let flush_task = {
            let aggregator = aggregator.clone();
            let cancel = flush_cancel.clone();
            let period = Duration::from_secs(settings.flush_period_secs);
            tokio::spawn(async move {
                aggregator.run(period, cancel).await;
            })
        };

        capture.start()?;

        Ok(Self {
            capture,
            capture_errors,
            scheduler_task,
            flush_task,
            flush_cancel,
            aggregator,
            session,
        })
    }

    /// The session this pipeline feeds.
    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// The aggregator batching this session's segments.
    pub fn aggregator(&self) -> &Arc<ChunkAggregator> {
        &self.aggregator
    }

    /// Take the receiver for fatal capture errors, if not already taken.
    pub fn take_capture_error_receiver(&mut self) -> Option<mpsc::Receiver<CaptureError>> {
        self.capture_errors.take()
    }

    /// Stop capture, drain the scheduler, and shut down the flush loop.
    ///
    /// The final partial window is flushed through transcription, and one
    /// last analysis flush runs so trailing segments are not left behind
    /// in the pending buffer. Returns the number of chunks processed.
    pub async fn stop(mut self) -> u64 {
        self.capture.stop();
        // Dropping the capture pipeline drops the window sender; the
        // scheduler drains what is queued and its loop ends.
        drop(self.capture);

        let chunks = self.scheduler_task.await.unwrap_or_else(|e| {
            log::error!("Scheduler task panicked: {}", e);
            0
        });

        if let Err(e) = self.aggregator.flush().await {
            log::warn!("Final analysis flush failed: {}", e);
        }

        self.flush_cancel.cancel();
        if let Err(e) = self.flush_task.await {
            log::error!("Flush task panicked: {}", e);
        }

        log::info!("Pipeline stopped after {} chunks", chunks);
        chunks
    }
}
