//! Audio capture, resampling, windowing and encoding
//!
//! ```text
//! Microphone / replayed file
//!        │ raw samples (any rate, any channel count)
//!        ▼
//! WindowAccumulator ── collapse + downsample + accumulate
//!        │ AudioWindow (mono, target rate, fixed duration)
//!        ▼
//! bounded channel ──▶ upload scheduler (encode + transcribe)
//! ```

pub mod capture;
pub mod encoder;
pub mod resample;

pub use capture::{
    AudioCapturePipeline, AudioWindow, CaptureConfig, CaptureError, WindowAccumulator,
};
pub use encoder::{encode_wav, encode_window, EncodedChunk, EncodingError};
pub use resample::{collapse_channels, downsample};
