//! Chunked transcription client
//!
//! Uploads one encoded WAV chunk per request and returns the provider's
//! word-level output (text, timestamps relative to chunk start, speaker
//! tags from diarization).

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use super::{TranscriptionError, Word};
use crate::audio::EncodedChunk;

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Provider response: word-level transcription of one chunk.
#[derive(Debug, Deserialize)]
struct WordsResponse {
    #[serde(default)]
    words: Vec<Word>,
}

/// Provider error response body.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for the chunk-upload transcription boundary.
#[derive(Debug, Clone)]
pub struct ChunkedClient {
    endpoint: String,
    api_key: String,
    model: String,
    diarize: bool,
}

impl ChunkedClient {
    pub fn new(endpoint: String, api_key: String, model: String, diarize: bool) -> Self {
        Self {
            endpoint,
            api_key,
            model,
            diarize,
        }
    }

    /// Transcribe one encoded chunk.
    ///
    /// Word timestamps in the response are relative to the chunk start;
    /// the merge step turns them absolute using the chunk's start offset.
    pub async fn transcribe(
        &self,
        chunk: &EncodedChunk,
    ) -> Result<Vec<Word>, TranscriptionError> {
        if self.api_key.is_empty() {
            return Err(TranscriptionError::MissingApiKey);
        }

        log::info!(
            "Transcribing chunk {} ({} bytes, offset {:.2}s)",
            chunk.sequence,
            chunk.data.len(),
            chunk.start_offset
        );

        let file_part = Part::bytes(chunk.data.clone())
            .file_name(format!("chunk_{}.wav", chunk.sequence))
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::ParseError(e.to_string()))?;

        let form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("diarize", if self.diarize { "true" } else { "false" });

        let response = get_http_client()
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::NetworkError(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            let words_response: WordsResponse = response
                .json()
                .await
                .map_err(|e| TranscriptionError::ParseError(e.to_string()))?;

            log::info!(
                "Chunk {} transcribed: {} tokens",
                chunk.sequence,
                words_response.words.len()
            );

            Ok(words_response.words)
        } else {
            let error_text = response.text().await.unwrap_or_default();

            let message =
                if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                    error_response.error.message
                } else {
                    error_text
                };

            log::error!(
                "Transcription API error for chunk {} ({}): {}",
                chunk.sequence,
                status.as_u16(),
                message
            );

            Err(TranscriptionError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::WordKind;

    #[test]
    fn test_words_response_deserialization() {
        let json = r#"{
            "words": [
                { "text": "Hello", "type": "word", "start": 0.0, "end": 0.5, "speaker_id": 0 },
                { "text": " ", "type": "spacing" },
                { "text": "there", "type": "word", "start": 0.6, "end": 1.0, "speaker_id": 0 }
            ]
        }"#;

        let response: WordsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.words.len(), 3);
        assert_eq!(response.words[0].text, "Hello");
        assert_eq!(response.words[1].kind, WordKind::Spacing);
        assert_eq!(response.words[2].speaker, Some(0));
    }

    #[test]
    fn test_empty_words_response() {
        let response: WordsResponse = serde_json::from_str("{}").unwrap();
        assert!(response.words.is_empty());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = ChunkedClient::new(
            "https://example.invalid/transcribe".to_string(),
            String::new(),
            "general".to_string(),
            true,
        );
        let chunk = EncodedChunk {
            data: vec![0; 44],
            sequence: 0,
            start_offset: 0.0,
            run_id: 1,
        };

        let result = client.transcribe(&chunk).await;
        assert!(matches!(result, Err(TranscriptionError::MissingApiKey)));
    }
}
