//! Word-to-segment merge
//!
//! Converts one chunk's word list into speaker-homogeneous candidate
//! segments, then folds the candidates into the tail of the session's
//! segment list, bridging same-speaker utterances that straddle a chunk
//! boundary.
//!
//! Providers transcribe chunks independently, so a single uninterrupted
//! utterance can be split across two chunks. Merging across chunks (not
//! just within one) is required to avoid spurious fragmentation. The gap
//! threshold is a deliberate heuristic: large enough to bridge a chunk
//! boundary, small enough not to fuse separate turns by the same speaker
//! after a real pause.

use crate::session::{generate_segment_id, speaker_tag, Segment, SessionState};
use crate::transcription::{Word, WordKind};

/// Maximum silence, in seconds, across which two same-speaker segments are
/// still considered one continuous turn. Inclusive: a gap of exactly this
/// value merges.
pub const MERGE_GAP_SECS: f64 = 1.25;

/// Join two texts with a single space, collapsing repeated whitespace.
fn join_normalized(a: &str, b: &str) -> String {
    format!("{} {}", a, b)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Walk one chunk's words into speaker-homogeneous candidate segments.
///
/// Word timestamps are relative to the chunk start and become absolute by
/// adding `chunk_offset`. A word with no timestamp inherits the previous
/// word's end; timestamps never move backwards past the previous word.
pub fn segments_from_words(
    words: &[Word],
    chunk_offset: f64,
    session_id: &str,
) -> Vec<Segment> {
    let mut candidates = Vec::new();

    let mut current_speaker: Option<u32> = None;
    let mut current_text = String::new();
    let mut segment_start = chunk_offset;
    let mut segment_end = chunk_offset;
    let mut last_word_end = chunk_offset;

    let mut close_current =
        |speaker: u32, text: &str, start: f64, end: f64, candidates: &mut Vec<Segment>| {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                candidates.push(Segment {
                    id: generate_segment_id(),
                    session_id: session_id.to_string(),
                    speaker: speaker_tag(speaker),
                    start,
                    end,
                    text: trimmed.to_string(),
                });
            }
        };

    for word in words {
        match word.kind {
            WordKind::Word => {
                let abs_start = word
                    .start
                    .map(|s| chunk_offset + s)
                    .unwrap_or(last_word_end)
                    .max(last_word_end);
                let abs_end = word
                    .end
                    .map(|e| chunk_offset + e)
                    .unwrap_or(abs_start)
                    .max(abs_start);
                let speaker = word.speaker.or(current_speaker).unwrap_or(0);

                match current_speaker {
                    None => {
                        current_speaker = Some(speaker);
                        current_text = word.text.clone();
                        segment_start = abs_start;
                    }
                    Some(active) if active != speaker => {
                        close_current(
                            active,
                            &current_text,
                            segment_start,
                            segment_end,
                            &mut candidates,
                        );
                        current_speaker = Some(speaker);
                        current_text = word.text.clone();
                        segment_start = abs_start;
                    }
                    Some(_) => {
                        current_text.push_str(&word.text);
                    }
                }

                segment_end = abs_end;
                last_word_end = abs_end;
            }
            WordKind::Spacing => {
                if current_speaker.is_some() {
                    current_text.push(' ');
                }
            }
            WordKind::Punctuation => {
                if current_speaker.is_some() {
                    current_text.push_str(&word.text);
                    if let Some(e) = word.end {
                        let abs_end = (chunk_offset + e).max(last_word_end);
                        segment_end = abs_end;
                        last_word_end = abs_end;
                    }
                }
            }
        }
    }

    if let Some(speaker) = current_speaker {
        close_current(
            speaker,
            &current_text,
            segment_start,
            segment_end,
            &mut candidates,
        );
    }

    candidates
}

/// Fold candidate segments into the session's ordered segment list.
///
/// A candidate merges into the current tail segment when the session and
/// speaker match and the silence gap is at most [`MERGE_GAP_SECS`];
/// merging extends the tail's end and concatenates text with whitespace
/// collapsed. Otherwise the candidate is appended.
///
/// Returns clones of every segment that was created or extended, for the
/// aggregator to observe. An extended tail keeps its id, so a segment
/// already dispatched downstream is never dispatched again.
pub fn merge_into_session(state: &mut SessionState, candidates: Vec<Segment>) -> Vec<Segment> {
    let mut touched = Vec::new();

    for candidate in candidates {
        state.ensure_speaker(&candidate.speaker);

        if let Some(last) = state.segments.last_mut() {
            let gap = candidate.start - last.end;
            if last.session_id == candidate.session_id
                && last.speaker == candidate.speaker
                && gap <= MERGE_GAP_SECS
            {
                last.end = last.end.max(candidate.end);
                last.text = join_normalized(&last.text, &candidate.text);
                touched.push(last.clone());
                continue;
            }
        }

        touched.push(candidate.clone());
        state.segments.push(candidate);
    }

    touched
}

/// Convenience: walk one chunk's words and merge the result into the
/// session in a single step.
pub fn merge_chunk_words(
    state: &mut SessionState,
    words: &[Word],
    chunk_offset: f64,
) -> Vec<Segment> {
    let session_id = state.session_id.clone();
    let candidates = segments_from_words(words, chunk_offset, &session_id);
    merge_into_session(state, candidates)
}
