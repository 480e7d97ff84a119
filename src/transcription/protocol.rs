//! Streaming transcription wire protocol
//!
//! JSON message types for the persistent WebSocket transcription boundary.
//!
//! # Protocol Overview
//!
//! 1. POST the API key to the token endpoint, receive a short-lived token
//! 2. Connect the WebSocket with `Authorization: Token <token>`
//! 3. Stream raw PCM16 audio as binary frames
//! 4. Receive `Results` messages; only `is_final` alternatives are used
//! 5. `Error` is transient; `FatalError` ends the connection

use serde::Deserialize;

/// Response from the token-issuing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// One word in a streaming result, timestamps absolute on the stream
/// timeline (seconds since the connection started receiving audio).
#[derive(Debug, Clone, Deserialize)]
pub struct StreamWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub speaker: Option<u32>,
}

/// One transcription hypothesis for a span of audio.
#[derive(Debug, Clone, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub words: Vec<StreamWord>,
    #[serde(default)]
    pub is_final: bool,
}

/// Channel payload of a `Results` message.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsChannel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

/// Messages received from the streaming transcription boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamMessage {
    /// Transcription results for a span of audio
    Results { channel: ResultsChannel },

    /// Transient error; the connection stays usable
    Error {
        #[serde(default)]
        description: String,
    },

    /// Unrecoverable error; the connection is dead
    FatalError {
        #[serde(default)]
        description: String,
    },

    /// Catch-all for message types we don't handle.
    /// Prevents deserialization failures for unknown types.
    #[serde(other)]
    Unknown,
}

impl StreamMessage {
    /// Final alternatives of a `Results` message, if any.
    pub fn final_alternatives(&self) -> Vec<&Alternative> {
        match self {
            StreamMessage::Results { channel } => channel
                .alternatives
                .iter()
                .filter(|alt| alt.is_final)
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_deserialization() {
        let json = r#"{
            "type": "Results",
            "channel": {
                "alternatives": [{
                    "transcript": "hello there",
                    "is_final": true,
                    "words": [
                        { "word": "hello", "start": 10.1, "end": 10.5, "speaker": 0 },
                        { "word": "there", "start": 10.6, "end": 11.0, "speaker": 0 }
                    ]
                }]
            }
        }"#;

        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        let finals = msg.final_alternatives();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].words.len(), 2);
        assert_eq!(finals[0].words[0].word, "hello");
        assert_eq!(finals[0].words[1].speaker, Some(0));
    }

    #[test]
    fn test_interim_results_filtered() {
        let json = r#"{
            "type": "Results",
            "channel": {
                "alternatives": [{ "transcript": "partial", "is_final": false, "words": [] }]
            }
        }"#;

        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        assert!(msg.final_alternatives().is_empty());
    }

    #[test]
    fn test_error_messages() {
        let msg: StreamMessage =
            serde_json::from_str(r#"{ "type": "Error", "description": "hiccup" }"#).unwrap();
        assert!(matches!(msg, StreamMessage::Error { ref description } if description == "hiccup"));

        let msg: StreamMessage =
            serde_json::from_str(r#"{ "type": "FatalError", "description": "gone" }"#).unwrap();
        assert!(matches!(msg, StreamMessage::FatalError { .. }));
    }

    #[test]
    fn test_unknown_message_type() {
        let json = r#"{ "type": "Metadata", "duration": 12.5 }"#;
        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, StreamMessage::Unknown));
    }

    #[test]
    fn test_token_response() {
        let json = r#"{ "token": "abc123", "expires_in": 30 }"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.token, "abc123");
        assert_eq!(token.expires_in, Some(30));
    }
}
