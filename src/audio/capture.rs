//! Audio capture pipeline using CPAL
//!
//! Captures from the default input device, collapses to mono, downsamples to
//! the provider's target rate inside the audio callback, and accumulates
//! samples into fixed-duration windows. Finished windows are pushed into a
//! bounded channel consumed by the upload scheduler, so the audio thread
//! never blocks on the network.
//!
//! # Windowing policy
//!
//! Window boundaries are on buffer size, not wall-clock time: when the
//! accumulator reaches `target_rate * window_secs` samples it is swapped out
//! synchronously and the removed buffer becomes one window. No sample is ever
//! dropped at a window edge ("tile, don't drop"). `stop()` force-flushes the
//! partial accumulator as a final short window so no trailing audio is lost.
//!
//! # Backpressure
//!
//! If the window channel is full the finished window is dropped with a
//! warning. Live capture prioritizes a current feed over completeness, and
//! stalling the audio callback is never acceptable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::resample::{collapse_channels, downsample};

/// Convert device samples of any supported format to f32.
fn samples_to_f32<T>(data: &[T]) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    data.iter().map(|&s| f32::from_sample(s)).collect()
}

/// Mark the stream dead and report the failure without blocking the audio
/// thread.
fn report_stream_failure(
    failed: &AtomicBool,
    error_tx: &mpsc::Sender<CaptureError>,
    message: String,
) {
    failed.store(true, Ordering::SeqCst);
    // If the channel is full the error is already visible from an earlier
    // report.
    let _ = error_tx.try_send(CaptureError::StreamFailed(message));
}

/// Errors that can occur while capturing audio.
#[derive(Debug, Clone)]
pub enum CaptureError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    /// The audio subsystem reported a fatal disconnect mid-capture.
    StreamFailed(String),
    AlreadyCapturing,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            CaptureError::StreamFailed(e) => write!(f, "Audio stream failed: {}", e),
            CaptureError::AlreadyCapturing => write!(f, "Capture is already running"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// A finished window of mono samples at the target rate.
///
/// Owned exclusively by the capture side until pushed into the channel;
/// the scheduler treats it as immutable from then on.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    /// Mono samples at the target sample rate
    pub samples: Vec<f32>,
    /// Seconds since capture start at which this window begins
    pub start_offset: f64,
    /// Monotonic window sequence number within the run
    pub sequence: u64,
    /// Capture run that produced this window
    pub run_id: u64,
}

impl AudioWindow {
    /// Duration of this window in seconds at the given rate.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / sample_rate as f64
    }
}

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate windows are delivered at (provider requirement)
    pub target_sample_rate: u32,
    /// Nominal window duration in seconds
    pub window_secs: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            window_secs: 6.0,
        }
    }
}

impl CaptureConfig {
    /// Samples per full window at the target rate.
    pub fn samples_per_window(&self) -> usize {
        (self.target_sample_rate as f64 * self.window_secs) as usize
    }
}

/// Accumulates resampled audio into fixed-size windows.
///
/// Used behind a mutex by the live capture callback, or driven directly when
/// replaying a pre-recorded file's decoded audio through the same path.
#[derive(Debug)]
pub struct WindowAccumulator {
    buffer: Vec<f32>,
    samples_per_window: usize,
    target_rate: u32,
    sequence: u64,
    start_offset: f64,
    run_id: u64,
    tx: mpsc::Sender<AudioWindow>,
    dropped_windows: u64,
}

impl WindowAccumulator {
    pub fn new(config: &CaptureConfig, run_id: u64, tx: mpsc::Sender<AudioWindow>) -> Self {
        let samples_per_window = config.samples_per_window();
        Self {
            buffer: Vec::with_capacity(samples_per_window),
            samples_per_window,
            target_rate: config.target_sample_rate,
            sequence: 0,
            start_offset: 0.0,
            run_id,
            tx,
            dropped_windows: 0,
        }
    }

    /// Feed raw interleaved samples at an arbitrary input rate.
    ///
    /// Collapses channels, downsamples to the target rate, and appends to
    /// the accumulator, emitting any full windows that result.
    pub fn push_raw(&mut self, samples: &[f32], input_rate: u32, channels: u16) {
        let mono = collapse_channels(samples, channels);
        let resampled = downsample(&mono, input_rate, self.target_rate);
        self.push_resampled(&resampled);
    }

    /// Append samples already at the target rate, emitting full windows.
    pub fn push_resampled(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);

        while self.buffer.len() >= self.samples_per_window {
            let rest = self.buffer.split_off(self.samples_per_window);
            let full = std::mem::replace(&mut self.buffer, rest);
            self.emit(full);
        }
    }

    /// Force-flush the partial accumulator as a final short window.
    pub fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let partial = std::mem::take(&mut self.buffer);
            self.emit(partial);
        }
    }

    fn emit(&mut self, samples: Vec<f32>) {
        let duration = samples.len() as f64 / self.target_rate as f64;
        let window = AudioWindow {
            samples,
            start_offset: self.start_offset,
            sequence: self.sequence,
            run_id: self.run_id,
        };
        self.start_offset += duration;
        self.sequence += 1;

        match self.tx.try_send(window) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_windows += 1;
                log::warn!(
                    "Window channel full, dropping window (total dropped: {})",
                    self.dropped_windows
                );
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Window channel closed, discarding window");
            }
        }
    }

    /// Number of windows emitted so far (full or flushed).
    pub fn windows_emitted(&self) -> u64 {
        self.sequence
    }

    /// Number of windows dropped because the channel was full.
    pub fn windows_dropped(&self) -> u64 {
        self.dropped_windows
    }

    /// Samples currently sitting in the partial accumulator.
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }
}

/// Live audio capture pipeline.
///
/// Re-entrant per `start()`/`stop()` cycle. Every `start()` increments a
/// monotonic run id shared with the upload scheduler, so async work still in
/// flight from a previous run can detect that it is stale and discard its
/// result instead of contaminating the new run.
pub struct AudioCapturePipeline {
    device: Device,
    device_config: StreamConfig,
    sample_format: SampleFormat,
    config: CaptureConfig,
    tx: mpsc::Sender<AudioWindow>,
    run_id: Arc<AtomicU64>,
    accumulator: Arc<Mutex<Option<WindowAccumulator>>>,
    error_tx: mpsc::Sender<CaptureError>,
    error_rx: Option<mpsc::Receiver<CaptureError>>,
    stream: Option<Stream>,
    stream_failed: Arc<AtomicBool>,
}

impl AudioCapturePipeline {
    /// Create a pipeline bound to the default input device.
    ///
    /// Fails with `CaptureError` if no input device or supported stream
    /// configuration is available in this environment.
    pub fn new(
        config: CaptureConfig,
        tx: mpsc::Sender<AudioWindow>,
    ) -> Result<Self, CaptureError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;

        log::info!("Using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|_| CaptureError::NoSupportedConfig)?;

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            supported_config.sample_rate().0,
            supported_config.channels(),
            supported_config.sample_format()
        );

        let sample_format = supported_config.sample_format();
        let device_config: StreamConfig = supported_config.into();

        let (error_tx, error_rx) = mpsc::channel(8);

        Ok(Self {
            device,
            device_config,
            sample_format,
            config,
            tx,
            run_id: Arc::new(AtomicU64::new(0)),
            accumulator: Arc::new(Mutex::new(None)),
            error_tx,
            error_rx: Some(error_rx),
            stream: None,
            stream_failed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared run id counter, advanced on every `start()`.
    pub fn run_id(&self) -> Arc<AtomicU64> {
        self.run_id.clone()
    }

    /// Take ownership of the capture error receiver.
    ///
    /// Fatal stream errors reported by the audio subsystem arrive here;
    /// after taking it, subsequent calls return `None`. A fatal error also
    /// marks the stream dead: `is_capturing()` turns false immediately, and
    /// the next `start()` tears the dead stream down instead of failing
    /// with `AlreadyCapturing`.
    pub fn take_error_receiver(&mut self) -> Option<mpsc::Receiver<CaptureError>> {
        self.error_rx.take()
    }

    /// Start capturing. Transitions Idle -> Capturing.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            if self.stream_failed.load(Ordering::SeqCst) {
                log::warn!("Previous audio stream died, tearing it down before restart");
                self.stop();
            } else {
                return Err(CaptureError::AlreadyCapturing);
            }
        }

        let run_id = self.run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let accumulator = WindowAccumulator::new(&self.config, run_id, self.tx.clone());
        *self.accumulator.lock().unwrap() = Some(accumulator);

        let stream = self.build_stream()?;
        stream.play().map_err(|e| {
            CaptureError::StreamCreationFailed(format!("Failed to start stream: {}", e))
        })?;

        log::info!(
            "Capture started (run {}, {} Hz windows of {}s)",
            run_id,
            self.config.target_sample_rate,
            self.config.window_secs
        );

        self.stream = Some(stream);
        Ok(())
    }

    /// Stop capturing. Transitions Capturing -> Idle.
    ///
    /// Flushes any partial accumulator as a final short window before
    /// disconnecting, so no trailing audio is lost.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        self.stream_failed.store(false, Ordering::SeqCst);

        let mut guard = self.accumulator.lock().unwrap();
        if let Some(accumulator) = guard.as_mut() {
            accumulator.flush();
            log::info!(
                "Capture stopped ({} windows emitted, {} dropped)",
                accumulator.windows_emitted(),
                accumulator.windows_dropped()
            );
        }
        *guard = None;
    }

    /// Whether a capture run is active. False once the stream has reported
    /// a fatal error, even before the caller reacts to it.
    pub fn is_capturing(&self) -> bool {
        self.stream.is_some() && !self.stream_failed.load(Ordering::SeqCst)
    }

    fn build_stream(&self) -> Result<Stream, CaptureError> {
        match self.sample_format {
            SampleFormat::I16 => self.build_stream_typed::<i16>(),
            SampleFormat::U16 => self.build_stream_typed::<u16>(),
            SampleFormat::F32 => self.build_stream_typed::<f32>(),
            _ => Err(CaptureError::NoSupportedConfig),
        }
    }

    fn build_stream_typed<T>(&self) -> Result<Stream, CaptureError>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let device_config = self.device_config.clone();
        let input_rate = device_config.sample_rate.0;
        let channels = device_config.channels;
        let accumulator = self.accumulator.clone();

        let error_tx = self.error_tx.clone();
        let stream_failed = self.stream_failed.clone();
        let err_fn = move |err: cpal::StreamError| {
            log::error!("Audio stream error: {}", err);
            report_stream_failure(&stream_failed, &error_tx, err.to_string());
        };

        let stream = self
            .device
            .build_input_stream(
                &device_config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let samples = samples_to_f32(data);

                    let mut guard = accumulator.lock().unwrap();
                    if let Some(acc) = guard.as_mut() {
                        acc.push_raw(&samples, input_rate, channels);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

        Ok(stream)
    }
}
