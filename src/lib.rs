//! Live audio fact-checking pipeline.
//!
//! Captures microphone audio, transcribes it in fixed-length windows,
//! merges the transcribed words into speaker-attributed segments, and
//! periodically ships new segments to an analysis backend that returns
//! fact-check claims.
//!
//! The typical entry point is [`pipeline::LivePipeline`]:
//!
//! ```no_run
//! use factline::pipeline::LivePipeline;
//! use factline::session::SessionStore;
//! use factline::settings::Settings;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(std::path::Path::new("factline.json"));
//! let store = SessionStore::new();
//! let session = store.create(None);
//!
//! let pipeline = LivePipeline::start(&settings, session).await?;
//! // ... capture runs until stopped ...
//! let chunks = pipeline.stop().await;
//! log::info!("Processed {} chunks", chunks);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod audio;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod transcription;

pub use analysis::AnalysisClient;
pub use audio::{AudioCapturePipeline, AudioWindow, CaptureConfig, EncodedChunk};
pub use pipeline::{LivePipeline, PipelineError};
pub use session::{Claim, Segment, SessionState, SessionStore, SharedSession, Verdict};
pub use settings::Settings;
pub use transcription::{TranscriptionError, TranscriptionProvider, Word, WordKind};
