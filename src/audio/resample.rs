//! Averaging-based downsampler for captured audio
//!
//! Transcription providers expect mono 16kHz input while capture devices
//! typically run at 44.1kHz or 48kHz stereo. This module collapses channels
//! and downsamples by averaging, which is cheap enough to run inside the
//! audio callback.
//!
//! Upsampling is not supported: if the target rate exceeds the input rate
//! the input is returned unchanged. This is a documented limitation, not a
//! silent misbehavior — every supported provider accepts 16kHz.

/// Collapse interleaved multi-channel samples to mono by averaging frames.
///
/// A trailing partial frame (malformed input) is averaged over however many
/// samples it has rather than dropped.
pub fn collapse_channels(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Downsample mono audio from `input_rate` to `target_rate` by averaging.
///
/// Output length is `round(n * target_rate / input_rate)`. Each output sample
/// is the arithmetic mean of a window of input samples; window boundaries are
/// computed with an integer walking scheme so the windows exactly tile the
/// input with no gaps and no overlap.
///
/// Returns the input unchanged when the rates match or when `target_rate`
/// exceeds `input_rate` (upsampling unsupported). Empty input yields an
/// empty buffer, as does input short enough that the rounded output length
/// is zero (less than half of one output sample period).
pub fn downsample(samples: &[f32], input_rate: u32, target_rate: u32) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    if input_rate == 0 || target_rate == 0 {
        log::warn!(
            "Invalid sample rate (input: {}, target: {}), returning original",
            input_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if target_rate >= input_rate {
        return samples.to_vec();
    }

    let n = samples.len() as u64;
    // round(n * target / input) without going through floats
    let out_len = ((n * target_rate as u64 + input_rate as u64 / 2) / input_rate as u64) as usize;
    if out_len == 0 {
        // Rounds to nothing; fabricating a sample would break the length
        // contract
        return Vec::new();
    }

    let mut output = Vec::with_capacity(out_len);
    let mut start = 0usize;

    for i in 0..out_len {
        // Walking boundary: window i covers [start, end) where
        // end = floor((i + 1) * n / out_len). The final window always ends
        // exactly at n, so no input sample is dropped.
        let end = (((i as u64 + 1) * n) / out_len as u64) as usize;
        let window = &samples[start..end.max(start + 1)];
        output.push(window.iter().sum::<f32>() / window.len() as f32);
        start = end.max(start + 1).min(samples.len());
    }

    output
}
