//! WAV encoding for transcription uploads
//!
//! Serializes a float sample window into a self-contained mono 16-bit WAV
//! container using hound, writing into an in-memory cursor. The resulting
//! bytes are the wire contract with the chunked transcription boundary and
//! must be decodable by any standard WAV reader.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::AudioWindow;

/// Errors produced while encoding an audio window.
#[derive(Debug, Clone)]
pub enum EncodingError {
    EmptyWindow,
    InvalidSampleRate(u32),
    WriteFailed(String),
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::EmptyWindow => write!(f, "Cannot encode an empty audio window"),
            EncodingError::InvalidSampleRate(rate) => {
                write!(f, "Invalid sample rate for encoding: {}", rate)
            }
            EncodingError::WriteFailed(e) => write!(f, "Failed to write WAV data: {}", e),
        }
    }
}

impl std::error::Error for EncodingError {}

/// An encoded, upload-ready audio chunk.
///
/// Immutable once created; the sequence number and start offset let the
/// merge step place the provider's chunk-relative word timestamps on the
/// session's absolute timeline.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Complete WAV container (header + 16-bit PCM payload)
    pub data: Vec<u8>,
    /// Monotonic chunk sequence number within the capture run
    pub sequence: u64,
    /// Seconds since capture start at which this chunk begins
    pub start_offset: f64,
    /// Capture run this chunk belongs to (stale-result detection)
    pub run_id: u64,
}

/// Convert a float sample in [-1, 1] to a signed 16-bit integer.
///
/// Positive values scale by 32767 and negative by 32768 so that both ends
/// of the float range map onto the full i16 range; out-of-range input is
/// clamped first.
fn sample_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped >= 0.0 {
        (clamped * 32767.0).round() as i16
    } else {
        (clamped * 32768.0).round().max(i16::MIN as f32) as i16
    }
}

/// Encode a float sample buffer as a mono 16-bit WAV container.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, EncodingError> {
    if samples.is_empty() {
        return Err(EncodingError::EmptyWindow);
    }
    if sample_rate == 0 {
        return Err(EncodingError::InvalidSampleRate(sample_rate));
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec)
        .map_err(|e| EncodingError::WriteFailed(e.to_string()))?;

    for &sample in samples {
        writer
            .write_sample(sample_to_i16(sample))
            .map_err(|e| EncodingError::WriteFailed(e.to_string()))?;
    }

    writer
        .finalize()
        .map_err(|e| EncodingError::WriteFailed(e.to_string()))?;

    Ok(cursor.into_inner())
}

/// Encode a captured window into an upload-ready chunk, carrying its
/// sequence number, start offset and run id forward.
pub fn encode_window(window: &AudioWindow, sample_rate: u32) -> Result<EncodedChunk, EncodingError> {
    let data = encode_wav(&window.samples, sample_rate)?;
    Ok(EncodedChunk {
        data,
        sequence: window.sequence,
        start_offset: window.start_offset,
        run_id: window.run_id,
    })
}
