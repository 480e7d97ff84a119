//! FIFO upload scheduler
//!
//! A single task owns the window channel receiver and fully processes one
//! window — encode, transcribe, merge — before receiving the next. That
//! serialization is what guarantees chunk N's words are merged before
//! chunk N+1's, and that no two transcription responses ever race for the
//! same session's segment list: exclusivity comes from the queue, not from
//! holding a lock across the network call.
//!
//! Every window carries the run id that was active when it was captured.
//! The id is checked before the upload and again after the response, so a
//! result that lands after a stop/restart is discarded instead of
//! contaminating the new run's session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::merge::merge_chunk_words;
use crate::audio::{encode_window, AudioWindow};
use crate::session::aggregator::ChunkAggregator;
use crate::session::SharedSession;
use crate::transcription::{TranscriptionProvider, Word};

/// Merge one chunk's transcription into the session, unless the run has
/// moved on since the chunk was captured.
///
/// Returns whether the words were applied. Segments created or extended by
/// the merge are handed to the aggregator.
pub fn apply_transcription(
    session: &SharedSession,
    aggregator: &ChunkAggregator,
    current_run: u64,
    window_run: u64,
    words: &[Word],
    chunk_offset: f64,
) -> bool {
    if window_run != current_run {
        log::info!(
            "Discarding stale transcription result (run {} != current {})",
            window_run,
            current_run
        );
        return false;
    }

    let touched = {
        let mut state = session.lock().unwrap();
        merge_chunk_words(&mut state, words, chunk_offset)
    };

    for segment in &touched {
        aggregator.observe(segment);
    }

    true
}

/// Serializes chunk uploads into strict FIFO order.
pub struct UploadScheduler {
    rx: mpsc::Receiver<AudioWindow>,
    provider: TranscriptionProvider,
    session: SharedSession,
    aggregator: Arc<ChunkAggregator>,
    run_id: Arc<AtomicU64>,
    sample_rate: u32,
    chunks_processed: u64,
}

impl UploadScheduler {
    pub fn new(
        rx: mpsc::Receiver<AudioWindow>,
        provider: TranscriptionProvider,
        session: SharedSession,
        aggregator: Arc<ChunkAggregator>,
        run_id: Arc<AtomicU64>,
        sample_rate: u32,
    ) -> Self {
        Self {
            rx,
            provider,
            session,
            aggregator,
            run_id,
            sample_rate,
            chunks_processed: 0,
        }
    }

    /// Run until the window channel closes (capture stopped and the final
    /// flushed window has been drained). Returns the number of chunks
    /// processed to completion.
    pub async fn run(mut self) -> u64 {
        log::info!(
            "Upload scheduler started ({} provider)",
            self.provider.name()
        );

        while let Some(window) = self.rx.recv().await {
            self.process(window).await;
        }

        log::info!(
            "Upload scheduler finished, {} chunks processed",
            self.chunks_processed
        );
        self.chunks_processed
    }

    async fn process(&mut self, window: AudioWindow) {
        let current = self.run_id.load(Ordering::SeqCst);
        if window.run_id != current {
            log::debug!(
                "Skipping window {} from stale run {} (current {})",
                window.sequence,
                window.run_id,
                current
            );
            return;
        }

        // One bad window does not tear down the pipeline
        let chunk = match encode_window(&window, self.sample_rate) {
            Ok(chunk) => chunk,
            Err(e) => {
                log::error!("Dropping window {}: {}", window.sequence, e);
                return;
            }
        };

        match self.provider.transcribe(&chunk).await {
            Ok(words) => {
                let current = self.run_id.load(Ordering::SeqCst);
                if apply_transcription(
                    &self.session,
                    &self.aggregator,
                    current,
                    chunk.run_id,
                    &words,
                    chunk.start_offset,
                ) {
                    self.chunks_processed += 1;
                }
            }
            Err(e) => {
                // Transient and chunk-scoped: FIFO isolation means prior
                // and subsequent chunks are unaffected
                log::error!("Transcription failed for chunk {}: {}", chunk.sequence, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisClient;
    use crate::session::SessionStore;

    fn harness() -> (SharedSession, Arc<ChunkAggregator>) {
        let store = SessionStore::new();
        let session = store.create_with_id("s1".to_string(), None);
        let client = AnalysisClient::new("https://example.invalid/analyze".to_string());
        let aggregator = Arc::new(ChunkAggregator::new(session.clone(), client));
        (session, aggregator)
    }

    #[test]
    fn test_apply_transcription_merges_and_observes() {
        let (session, aggregator) = harness();
        let words = vec![Word::word("hello", 0.0, 1.0, 0)];

        let applied = apply_transcription(&session, &aggregator, 1, 1, &words, 0.0);

        assert!(applied);
        assert_eq!(session.lock().unwrap().segments.len(), 1);
        assert_eq!(aggregator.pending_len(), 1);
    }

    #[test]
    fn test_stale_run_result_discarded() {
        let (session, aggregator) = harness();
        let words = vec![Word::word("stale", 0.0, 1.0, 0)];

        // Chunk was enqueued under run 1; a stop()/start() advanced the
        // counter to 2 before the result arrived
        let applied = apply_transcription(&session, &aggregator, 2, 1, &words, 0.0);

        assert!(!applied);
        assert!(session.lock().unwrap().segments.is_empty());
        assert_eq!(aggregator.pending_len(), 0);
    }

    #[test]
    fn test_extended_segment_not_requeued() {
        let (session, aggregator) = harness();

        apply_transcription(
            &session,
            &aggregator,
            1,
            1,
            &[Word::word("first", 5.0, 5.9, 0)],
            0.0,
        );
        assert_eq!(aggregator.pending_len(), 1);

        // Same speaker continues across the chunk boundary; the tail is
        // extended in place and keeps its id, so nothing new is queued
        apply_transcription(
            &session,
            &aggregator,
            1,
            1,
            &[Word::word("second", 0.1, 1.0, 0)],
            6.0,
        );

        let state = session.lock().unwrap();
        assert_eq!(state.segments.len(), 1);
        assert_eq!(state.segments[0].text, "first second");
        assert_eq!(aggregator.pending_len(), 1);
    }
}
