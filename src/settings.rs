//! Pipeline configuration
//!
//! Settings load from a JSON file and fall back to defaults on any
//! problem; a missing or corrupt file never prevents startup. The
//! transcription API key is deliberately not part of the file — it comes
//! from the environment (`FACTLINE_TRANSCRIBE_KEY`).

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Which transcription backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// One WAV chunk per HTTP request
    Chunked,
    /// Persistent WebSocket with raw PCM frames
    Streaming,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Sample rate audio is delivered to the provider at.
    pub target_sample_rate: u32,

    /// Nominal capture window duration in seconds. Windowed batching
    /// trades latency for throughput and provider compatibility.
    pub window_secs: f64,

    /// Capacity of the window channel between capture and upload. When
    /// full, newly finished windows are dropped rather than stalling the
    /// audio thread.
    pub window_channel_capacity: usize,

    /// Seconds between analysis flushes.
    pub flush_period_secs: u64,

    /// Transcription backend selection.
    pub provider: ProviderKind,

    /// Chunked transcription endpoint.
    pub transcribe_url: String,

    /// Streaming transcription WebSocket endpoint.
    pub streaming_ws_url: String,

    /// Token-issuing endpoint for the streaming backend.
    pub token_url: String,

    /// Claim-extraction / fact-checking endpoint.
    pub analyze_url: String,

    /// Provider model identifier.
    pub model: String,

    /// Request speaker diarization from the provider.
    pub diarize: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            window_secs: 6.0,
            window_channel_capacity: 8,
            flush_period_secs: 10,
            provider: ProviderKind::Chunked,
            transcribe_url: "https://api.transcription.example/v1/listen".to_string(),
            streaming_ws_url: "wss://api.transcription.example/v1/listen".to_string(),
            token_url: "https://api.transcription.example/v1/token".to_string(),
            analyze_url: "http://127.0.0.1:8000/api/analyze-batch".to_string(),
            model: "general".to_string(),
            diarize: true,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults on any
    /// problem.
    pub fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Settings: failed to parse {:?}: {}", path, e);
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                log::warn!("Settings: failed to read {:?}: {}", path, e);
                Settings::default()
            }
        }
    }

    /// Save settings atomically: write a temp file in the same directory,
    /// then rename. Prevents a partial settings file if the process dies
    /// mid-write.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
        }

        let contents =
            serde_json::to_string_pretty(self).map_err(|e| format!("Serialize settings: {}", e))?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &contents)
            .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

        std::fs::rename(&tmp_path, path)
            .map_err(|e| format!("Rename settings into place {:?}: {}", path, e))?;

        Ok(())
    }
}
