//! Integration tests for the capture-to-analysis pipeline
//!
//! These tests exercise the offline path end to end: window
//! accumulation, WAV encoding, word-to-segment merging, aggregation,
//! and the stale-run discard rule. Nothing here needs a microphone,
//! an API key, or network access; tests that would touch the network
//! use an unreachable endpoint and assert the failure behavior.
//!
//! ## Running Tests
//! ```bash
//! cargo test --test pipeline_integration
//! ```

use std::sync::Arc;

use factline::analysis::AnalysisClient;
use factline::audio::{encode_window, CaptureConfig, WindowAccumulator};
use factline::pipeline::{apply_transcription, merge_chunk_words, MERGE_GAP_SECS};
use factline::session::aggregator::ChunkAggregator;
use factline::session::{SessionStore, Verdict};
use factline::transcription::Word;
use tokio::sync::mpsc;

/// An analysis client bound to an endpoint that can never resolve.
fn unreachable_analysis() -> AnalysisClient {
    AnalysisClient::new("http://analysis.example.invalid/api/analyze-batch".to_string())
}

/// Words for one chunk: a short two-speaker exchange with spacing tokens
/// the way a diarizing transcription API returns them.
fn exchange_words() -> Vec<Word> {
    vec![
        Word::word("the", 0.0, 0.2, 0),
        Word::spacing(),
        Word::word("budget", 0.3, 0.7, 0),
        Word::spacing(),
        Word::word("doubled", 0.8, 1.2, 0),
        Word::spacing(),
        Word::word("no", 2.0, 2.2, 1),
        Word::spacing(),
        Word::word("it", 2.3, 2.4, 1),
        Word::spacing(),
        Word::word("didn't", 2.5, 2.9, 1),
    ]
}

// ============================================================================
// Audio path: accumulate -> encode -> decode
// ============================================================================

mod audio_path {
    use super::*;

    #[tokio::test]
    async fn accumulated_window_survives_wav_round_trip() {
        let config = CaptureConfig {
            target_sample_rate: 16_000,
            window_secs: 0.5,
        };
        let (tx, mut rx) = mpsc::channel(4);
        let mut acc = WindowAccumulator::new(&config, 1, tx);

        // 48 kHz stereo input, one full window's worth after resampling
        let frames = 24_000;
        let mut interleaved = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = (i as f32 / frames as f32) * 0.5;
            interleaved.push(s);
            interleaved.push(s);
        }
        acc.push_raw(&interleaved, 48_000, 2);

        let window = rx.try_recv().expect("one full window should be emitted");
        assert_eq!(window.samples.len(), 8_000);
        assert_eq!(window.sequence, 0);
        assert_eq!(window.run_id, 1);
        assert_eq!(window.start_offset, 0.0);

        let chunk = encode_window(&window, 16_000).expect("encoding should succeed");
        assert_eq!(chunk.sequence, window.sequence);
        assert_eq!(chunk.run_id, window.run_id);

        let reader = hound::WavReader::new(std::io::Cursor::new(&chunk.data))
            .expect("encoder output should be valid WAV");
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len() as usize, window.samples.len());
    }

    #[tokio::test]
    async fn consecutive_windows_carry_advancing_offsets() {
        let config = CaptureConfig {
            target_sample_rate: 16_000,
            window_secs: 0.25,
        };
        let (tx, mut rx) = mpsc::channel(8);
        let mut acc = WindowAccumulator::new(&config, 3, tx);

        // Two and a half windows of already-resampled mono audio
        acc.push_resampled(&vec![0.1; 10_000]);
        acc.flush();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        let partial = rx.try_recv().unwrap();

        assert_eq!(first.start_offset, 0.0);
        assert_eq!(second.start_offset, 0.25);
        assert_eq!(partial.start_offset, 0.5);
        assert_eq!(partial.samples.len(), 2_000);
        assert_eq!(
            (first.sequence, second.sequence, partial.sequence),
            (0, 1, 2)
        );
    }
}

// ============================================================================
// Transcript path: words -> segments across chunk boundaries
// ============================================================================

mod transcript_path {
    use super::*;

    #[test]
    fn words_merge_into_speaker_segments() {
        let store = SessionStore::new();
        let session = store.create(None);
        let mut state = session.lock().unwrap();

        let touched = merge_chunk_words(&mut state, &exchange_words(), 0.0);

        assert_eq!(touched.len(), 2);
        assert_eq!(state.segments.len(), 2);
        assert_eq!(state.segments[0].text, "the budget doubled");
        assert_eq!(state.segments[0].speaker, "spk_0");
        assert_eq!(state.segments[1].text, "no it didn't");
        assert_eq!(state.segments[1].speaker, "spk_1");

        // Diarized speakers get display labels in the session
        assert_eq!(state.speakers.get("spk_0").map(String::as_str), Some("Speaker A"));
        assert_eq!(state.speakers.get("spk_1").map(String::as_str), Some("Speaker B"));
    }

    #[test]
    fn same_speaker_continues_across_chunk_boundary() {
        let store = SessionStore::new();
        let session = store.create(None);
        let mut state = session.lock().unwrap();

        let first = vec![
            Word::word("carbon", 4.0, 4.5, 0),
            Word::spacing(),
            Word::word("emissions", 4.6, 5.3, 0),
        ];
        merge_chunk_words(&mut state, &first, 0.0);
        let tail_id = state.segments[0].id.clone();

        // Next chunk starts at offset 6.0; first word lands within the
        // merge gap of the open tail, so it extends rather than splits.
        let second = vec![Word::word("dropped", 0.2, 0.8, 0)];
        let touched = merge_chunk_words(&mut state, &second, 6.0);

        assert_eq!(state.segments.len(), 1);
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].id, tail_id);
        assert_eq!(state.segments[0].text, "carbon emissions dropped");
        assert!((state.segments[0].end - 6.8).abs() < 1e-9);
    }

    #[test]
    fn gap_beyond_threshold_starts_a_new_segment() {
        let store = SessionStore::new();
        let session = store.create(None);
        let mut state = session.lock().unwrap();

        merge_chunk_words(&mut state, &[Word::word("first", 0.0, 1.0, 0)], 0.0);
        let next_start = 1.0 + MERGE_GAP_SECS + 0.01;
        merge_chunk_words(
            &mut state,
            &[Word::word("second", next_start, next_start + 0.5, 0)],
            0.0,
        );

        assert_eq!(state.segments.len(), 2);
        assert!(state.segments[1].start >= state.segments[0].start);
    }
}

// ============================================================================
// Aggregation path: observe -> flush (unreachable backend)
// ============================================================================

mod aggregation_path {
    use super::*;

    #[tokio::test]
    async fn transcription_result_flows_into_pending_batch() {
        let store = SessionStore::new();
        let session = store.create(None);
        let aggregator = ChunkAggregator::new(session.clone(), unreachable_analysis());

        let applied = apply_transcription(&session, &aggregator, 1, 1, &exchange_words(), 0.0);

        assert!(applied);
        assert_eq!(aggregator.pending_len(), 2);
        for segment in &session.lock().unwrap().segments {
            assert!(aggregator.is_processed(&segment.id));
        }
    }

    #[tokio::test]
    async fn stale_run_results_are_discarded() {
        let store = SessionStore::new();
        let session = store.create(None);
        let aggregator = ChunkAggregator::new(session.clone(), unreachable_analysis());

        // Window captured under run 1, but run 2 started meanwhile
        let applied = apply_transcription(&session, &aggregator, 2, 1, &exchange_words(), 0.0);

        assert!(!applied);
        assert!(session.lock().unwrap().segments.is_empty());
        assert_eq!(aggregator.pending_len(), 0);
    }

    #[tokio::test]
    async fn extended_tail_is_not_dispatched_twice() {
        let store = SessionStore::new();
        let session = store.create(None);
        let aggregator = ChunkAggregator::new(session.clone(), unreachable_analysis());

        apply_transcription(
            &session,
            &aggregator,
            1,
            1,
            &[Word::word("carbon", 4.0, 4.5, 0)],
            0.0,
        );
        assert_eq!(aggregator.pending_len(), 1);

        // Extending the same segment in the next chunk must not enqueue
        // it a second time
        apply_transcription(
            &session,
            &aggregator,
            1,
            1,
            &[Word::word("emissions", 0.2, 0.9, 0)],
            6.0,
        );

        assert_eq!(session.lock().unwrap().segments.len(), 1);
        assert_eq!(aggregator.pending_len(), 1);
    }

    #[tokio::test]
    async fn failed_flush_drops_the_batch() {
        let store = SessionStore::new();
        let session = store.create(None);
        let aggregator = ChunkAggregator::new(session.clone(), unreachable_analysis());

        apply_transcription(&session, &aggregator, 1, 1, &exchange_words(), 0.0);
        assert_eq!(aggregator.pending_len(), 2);

        let result = aggregator.flush().await;
        assert!(result.is_err(), "flush to unreachable endpoint must fail");

        // At-most-once: the failed batch is not re-enqueued
        assert_eq!(aggregator.pending_len(), 0);
        assert!(session.lock().unwrap().claims.is_empty());
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_skips_the_network() {
        let store = SessionStore::new();
        let session = store.create(None);
        let aggregator = ChunkAggregator::new(session, unreachable_analysis());

        // Would fail if it tried the unreachable endpoint
        let merged = aggregator.flush().await.expect("empty flush is a no-op");
        assert_eq!(merged, 0);
    }
}

// ============================================================================
// Wire format: JSON shape shared with the analysis backend
// ============================================================================

mod wire_format {
    use super::*;
    use factline::session::{Claim, Segment};

    #[test]
    fn segment_serializes_with_camel_case_keys() {
        let segment = Segment {
            id: "seg_0a1b2c3d".to_string(),
            session_id: "live_1724900000000".to_string(),
            speaker: "spk_0".to_string(),
            start: 0.0,
            end: 1.2,
            text: "the budget doubled".to_string(),
        };

        let json = serde_json::to_value(&segment).unwrap();
        assert_eq!(json["sessionId"], "live_1724900000000");
        assert_eq!(json["speaker"], "spk_0");
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn claim_deserializes_from_backend_shape() {
        let json = r#"{
            "id": "clm_1",
            "sessionId": "live_1724900000000",
            "segmentId": "seg_0a1b2c3d",
            "speaker": "spk_0",
            "start": 0.0,
            "end": 1.2,
            "text": "the budget doubled",
            "fallacy": "none",
            "needsFactCheck": true,
            "verdict": "likely_false",
            "confidence": 0.82,
            "reasoning": "Budget figures show a 12% increase.",
            "sources": [
                {"title": "Budget report", "url": "https://example.org/b", "snippet": "..."}
            ]
        }"#;

        let claim: Claim = serde_json::from_str(json).unwrap();
        assert_eq!(claim.verdict, Verdict::LikelyFalse);
        assert!(claim.needs_fact_check);
        assert_eq!(claim.confidence, Some(0.82));
        assert_eq!(claim.sources.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn optional_claim_fields_are_omitted_when_absent() {
        let json = r#"{
            "id": "clm_2",
            "sessionId": "live_1",
            "segmentId": "seg_1",
            "speaker": "spk_1",
            "start": 2.0,
            "end": 2.9,
            "text": "no it didn't",
            "fallacy": "none",
            "needsFactCheck": false,
            "verdict": "not_checked"
        }"#;

        let claim: Claim = serde_json::from_str(json).unwrap();
        let out = serde_json::to_value(&claim).unwrap();
        assert!(out.get("confidence").is_none());
        assert!(out.get("reasoning").is_none());
        assert!(out.get("sources").is_none());
    }
}

// ============================================================================
// Shared state: the session store and aggregator stay Send + Sync
// ============================================================================

mod concurrency {
    use super::*;

    #[test]
    fn shared_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<ChunkAggregator>();
        assert_send_sync::<SessionStore>();
        assert_send_sync::<factline::session::SharedSession>();
    }

    #[tokio::test]
    async fn two_tasks_can_feed_one_aggregator() {
        let store = SessionStore::new();
        let session = store.create(None);
        let aggregator = Arc::new(ChunkAggregator::new(session.clone(), unreachable_analysis()));

        let mut handles = Vec::new();
        for chunk in 0..4u64 {
            let session = session.clone();
            let aggregator = aggregator.clone();
            handles.push(tokio::spawn(async move {
                let offset = chunk as f64 * 60.0;
                let words = [Word::word("isolated", 0.0, 0.5, chunk as u32)];
                apply_transcription(&session, &aggregator, 1, 1, &words, offset);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Chunks are a minute apart with distinct speakers, so nothing
        // merges. Arrival order is the scheduler's concern, not tested here.
        let state = session.lock().unwrap();
        assert_eq!(state.segments.len(), 4);
        assert_eq!(aggregator.pending_len(), 4);
        for segment in &state.segments {
            assert!(aggregator.is_processed(&segment.id));
        }
    }
}
