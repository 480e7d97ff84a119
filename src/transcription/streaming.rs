//! Streaming transcription WebSocket client
//!
//! Maintains a persistent connection to the streaming transcription
//! boundary, authorized by a short-lived token fetched from a token
//! endpoint. Outbound messages are raw PCM16 binary frames; inbound
//! messages are parsed by a background receiver task. After each chunk is
//! submitted the client waits a short settle window for results, so the
//! words for the last chunk of a run are collected rather than lost.
//!
//! # Retry Strategy
//!
//! Initial connection retries 3 times with exponential backoff (1s, 2s, 4s).
//! Mid-session disconnects do not reconnect; the next transcribe call
//! surfaces the failure and the scheduler isolates it to that chunk.
//!
//! # Timestamp normalization
//!
//! The streaming boundary reports word times on the absolute stream
//! timeline. The adapter converts them to chunk-relative times by
//! subtracting the submitted chunk's start offset, so both providers
//! present the same word contract. The merge step adds the offset back,
//! which makes the normalization an exact inverse: a result attributed to
//! a neighbouring chunk still lands at its true absolute time.

use std::io::Cursor;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{StreamMessage, TokenResponse};
use super::{TranscriptionError, Word};
use crate::audio::EncodedChunk;

/// Connection timeout for the initial WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the token-issuing request
const TOKEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum retry attempts for the initial connection
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Outbound binary frame size in bytes (0.25s of PCM16 at 16kHz)
const FRAME_BYTES: usize = 8000;

/// How long to wait for trailing final results after a chunk is sent
const RESULT_SETTLE: Duration = Duration::from_millis(250);

/// Configuration for the streaming transcription connection.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// WebSocket endpoint of the streaming boundary
    pub ws_url: String,
    /// HTTP endpoint that exchanges the API key for a short-lived token
    pub token_url: String,
    /// Long-lived API key presented to the token endpoint
    pub api_key: String,
    /// Provider model identifier
    pub model: String,
    /// Request speaker diarization
    pub diarize: bool,
}

/// Handle to an active streaming transcription session.
pub struct StreamingClient {
    write: futures_util::stream::SplitSink<
        WebSocketStream<MaybeTlsStream<TcpStream>>,
        Message,
    >,
    /// Parsed inbound messages, filled by the background receiver task
    incoming_rx: mpsc::Receiver<StreamMessage>,
    /// Handle to the receiver task (for cleanup on disconnect/drop)
    receiver_task: tokio::task::JoinHandle<()>,
}

impl StreamingClient {
    /// Connect to the streaming boundary, retrying with backoff.
    pub async fn connect(config: &StreamingConfig) -> Result<Self, TranscriptionError> {
        if config.api_key.is_empty() {
            return Err(TranscriptionError::MissingApiKey);
        }

        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                log::info!(
                    "Retrying streaming connection in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(delay).await;
            }

            match Self::try_connect(config).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    log::warn!("Streaming connection attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TranscriptionError::ConnectionFailed("Max retries exceeded".to_string())
        }))
    }

    /// Single connection attempt (no retries).
    async fn try_connect(config: &StreamingConfig) -> Result<Self, TranscriptionError> {
        let token = fetch_token(&config.token_url, &config.api_key).await?;

        let url = format!(
            "{}?model={}&diarize={}&encoding=linear16&sample_rate=16000",
            config.ws_url, config.model, config.diarize
        );

        let mut request = url
            .into_client_request()
            .map_err(|e| TranscriptionError::ConnectionFailed(e.to_string()))?;

        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Token {}", token.token))
                .map_err(|e| TranscriptionError::AuthenticationFailed(e.to_string()))?,
        );

        log::info!("Connecting to streaming transcription at {}", config.ws_url);

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| TranscriptionError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| TranscriptionError::ConnectionFailed(e.to_string()))?;

        let (write, mut read) = ws_stream.split();

        // Background task parses inbound frames into protocol messages
        let (incoming_tx, incoming_rx) = mpsc::channel(100);

        let receiver_task = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<StreamMessage>(&text) {
                        Ok(msg) => {
                            if incoming_tx.send(msg).await.is_err() {
                                log::debug!("Streaming receiver channel closed");
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("Failed to parse streaming message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("Streaming connection closed by server");
                        break;
                    }
                    Err(e) => {
                        log::warn!("Streaming connection error: {}", e);
                        break;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            log::debug!("Streaming receiver task exiting");
        });

        log::info!("Streaming transcription connected");

        Ok(Self {
            write,
            incoming_rx,
            receiver_task,
        })
    }

    /// Submit one encoded chunk and collect its final results.
    ///
    /// The chunk's PCM payload is extracted from the WAV container and sent
    /// as binary frames, then inbound results are collected for a short
    /// settle window. Results for audio sent earlier may arrive during a
    /// later call; timestamp normalization keeps them correct regardless.
    pub async fn transcribe(
        &mut self,
        chunk: &EncodedChunk,
    ) -> Result<Vec<Word>, TranscriptionError> {
        let pcm = pcm_bytes_from_wav(&chunk.data)?;

        for frame in pcm.chunks(FRAME_BYTES) {
            self.write
                .send(Message::Binary(frame.to_vec()))
                .await
                .map_err(|e| TranscriptionError::SendFailed(e.to_string()))?;
        }

        log::debug!(
            "Streamed chunk {} ({} PCM bytes) to transcription",
            chunk.sequence,
            pcm.len()
        );

        collect_results(&mut self.incoming_rx, chunk.start_offset, RESULT_SETTLE).await
    }

    /// Gracefully disconnect from the streaming boundary.
    pub async fn disconnect(mut self) {
        log::info!("Disconnecting streaming transcription");

        self.receiver_task.abort();

        if let Err(e) = self.write.close().await {
            log::warn!("Error closing streaming connection: {}", e);
        }
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        // Ensure the receiver task dies if the client is dropped without
        // disconnect()
        self.receiver_task.abort();
    }
}

/// Collect inbound messages into a word list with timestamps relative to
/// `chunk_offset`, waiting up to `settle` for stragglers.
///
/// Streaming results trail the audio that produced them, so a purely
/// non-blocking drain would silently discard the words for the final chunk
/// of a run. The deadline bounds the wait; anything arriving later is
/// picked up by the next call and re-anchored by the timestamp
/// normalization.
async fn collect_results(
    rx: &mut mpsc::Receiver<StreamMessage>,
    chunk_offset: f64,
    settle: Duration,
) -> Result<Vec<Word>, TranscriptionError> {
    let deadline = tokio::time::Instant::now() + settle;
    let mut words = Vec::new();

    loop {
        let msg = match timeout_at(deadline, rx.recv()).await {
            // Settle window elapsed
            Err(_) => break,
            // Receiver task gone; the next send surfaces the disconnect
            Ok(None) => break,
            Ok(Some(msg)) => msg,
        };

        match msg {
            StreamMessage::Results { .. } => {
                for alt in msg.final_alternatives() {
                    for sw in &alt.words {
                        if !words.is_empty() {
                            words.push(Word::spacing());
                        }
                        words.push(Word::word(
                            &sw.word,
                            sw.start - chunk_offset,
                            sw.end - chunk_offset,
                            sw.speaker.unwrap_or(0),
                        ));
                    }
                }
            }
            StreamMessage::Error { description } => {
                log::warn!("Streaming transcription error: {}", description);
            }
            StreamMessage::FatalError { description } => {
                return Err(TranscriptionError::Disconnected(description));
            }
            StreamMessage::Unknown => {}
        }
    }

    Ok(words)
}

/// Exchange the API key for a short-lived connection token.
async fn fetch_token(token_url: &str, api_key: &str) -> Result<TokenResponse, TranscriptionError> {
    let client = reqwest::Client::new();

    let response = timeout(
        TOKEN_TIMEOUT,
        client
            .post(token_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .send(),
    )
    .await
    .map_err(|_| TranscriptionError::AuthenticationFailed("Token request timeout".to_string()))?
    .map_err(|e| TranscriptionError::NetworkError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(TranscriptionError::AuthenticationFailed(format!(
            "Token endpoint returned {}",
            response.status()
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| TranscriptionError::ParseError(e.to_string()))
}

/// Extract little-endian PCM16 payload bytes from a WAV container.
fn pcm_bytes_from_wav(wav: &[u8]) -> Result<Vec<u8>, TranscriptionError> {
    let mut reader = hound::WavReader::new(Cursor::new(wav))
        .map_err(|e| TranscriptionError::SendFailed(format!("Invalid WAV chunk: {}", e)))?;

    let mut bytes = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        let sample = sample
            .map_err(|e| TranscriptionError::SendFailed(format!("Invalid WAV sample: {}", e)))?;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    Ok(bytes)
}
