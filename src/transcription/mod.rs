//! Transcription provider boundary
//!
//! Two alternate backends produce the same word contract: a chunked HTTP
//! client that uploads one WAV chunk per request, and a streaming WebSocket
//! client that ships raw PCM frames over a persistent connection. The
//! backend is chosen once at construction; the scheduler and merge logic
//! are identical regardless of which one is active.

pub mod chunked;
pub mod protocol;
pub mod streaming;

pub use chunked::ChunkedClient;
pub use streaming::{StreamingClient, StreamingConfig};

use serde::Deserialize;

use crate::audio::EncodedChunk;

/// Errors that can occur at the transcription boundary.
#[derive(Debug, Clone)]
pub enum TranscriptionError {
    /// API key not configured
    MissingApiKey,
    /// Network/HTTP error reaching the provider
    NetworkError(String),
    /// Provider returned an error status
    ApiError { status: u16, message: String },
    /// Failed to parse the provider response
    ParseError(String),
    /// Failed to establish the streaming connection
    ConnectionFailed(String),
    /// Token issuance or authentication failed
    AuthenticationFailed(String),
    /// Streaming connection was closed unexpectedly
    Disconnected(String),
    /// Failed to send audio over the streaming connection
    SendFailed(String),
}

impl std::fmt::Display for TranscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptionError::MissingApiKey => {
                write!(
                    f,
                    "Transcription API key not configured. Set FACTLINE_TRANSCRIBE_KEY."
                )
            }
            TranscriptionError::NetworkError(e) => write!(f, "Network error: {}", e),
            TranscriptionError::ApiError { status, message } => {
                write!(f, "Transcription API error ({}): {}", status, message)
            }
            TranscriptionError::ParseError(e) => {
                write!(f, "Failed to parse transcription response: {}", e)
            }
            TranscriptionError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to streaming transcription: {}", e)
            }
            TranscriptionError::AuthenticationFailed(e) => {
                write!(f, "Streaming authentication failed: {}", e)
            }
            TranscriptionError::Disconnected(e) => {
                write!(f, "Streaming connection lost: {}", e)
            }
            TranscriptionError::SendFailed(e) => write!(f, "Failed to send audio: {}", e),
        }
    }
}

impl std::error::Error for TranscriptionError {}

/// Token kind in the provider's word stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordKind {
    Word,
    Spacing,
    Punctuation,
}

/// One token of transcribed output, timestamps relative to the start of the
/// chunk it came from. Read-only to the merge step.
#[derive(Debug, Clone, Deserialize)]
pub struct Word {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: WordKind,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default, rename = "speaker_id")]
    pub speaker: Option<u32>,
}

impl Word {
    /// Plain word token with full metadata (used by the streaming adapter
    /// and by tests).
    pub fn word(text: &str, start: f64, end: f64, speaker: u32) -> Self {
        Self {
            text: text.to_string(),
            kind: WordKind::Word,
            start: Some(start),
            end: Some(end),
            speaker: Some(speaker),
        }
    }

    /// Spacing token carrying no time or speaker information.
    pub fn spacing() -> Self {
        Self {
            text: " ".to_string(),
            kind: WordKind::Spacing,
            start: None,
            end: None,
            speaker: None,
        }
    }
}

/// Transcription backend, fixed at construction time.
///
/// Both variants take one encoded chunk and return its word list with
/// chunk-relative timestamps; only the submission/parsing adapter differs.
pub enum TranscriptionProvider {
    Chunked(ChunkedClient),
    Streaming(StreamingClient),
}

impl TranscriptionProvider {
    pub async fn transcribe(
        &mut self,
        chunk: &EncodedChunk,
    ) -> Result<Vec<Word>, TranscriptionError> {
        match self {
            TranscriptionProvider::Chunked(client) => client.transcribe(chunk).await,
            TranscriptionProvider::Streaming(client) => client.transcribe(chunk).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TranscriptionProvider::Chunked(_) => "chunked",
            TranscriptionProvider::Streaming(_) => "streaming",
        }
    }
}

/// Read the transcription API key from the environment.
pub fn get_api_key() -> Option<String> {
    std::env::var("FACTLINE_TRANSCRIBE_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}
