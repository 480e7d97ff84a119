//! Session state: segments, claims, and the in-memory session store
//!
//! One `SessionState` exists per active session, holding the ordered
//! segment list produced by the merge step and the claim list returned by
//! the analysis boundary. The store replaces ambient global state with an
//! explicit object that can be created and torn down per test or per
//! process.
//!
//! All wire types serialize camelCase to match the analysis boundary's
//! JSON contract.

pub mod aggregator;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A contiguous, single-speaker span of transcript text with absolute
/// start/end timestamps (seconds since capture start).
///
/// Invariants: `start <= end`; within a session's list, starts are
/// non-decreasing; adjacent same-speaker segments are at least the merge
/// gap apart (closer pairs would have been merged).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub session_id: String,
    pub speaker: String,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Fact-check verdict for a claim, as returned by the analysis boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    NotChecked,
    Supported,
    Disputed,
    LikelyFalse,
    Uncertain,
}

/// A source cited by the fact-checking boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactSource {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A claim extracted from a segment, enriched with fallacy detection and a
/// fact-check verdict.
///
/// Opaque to the pipeline beyond its identity (`id`) and ordering key
/// (`start`). The fallacy label is an open set decided by the analysis
/// boundary ("none", "strawman", "ad_hominem", ...), so it stays a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: String,
    pub session_id: String,
    pub segment_id: String,
    pub speaker: String,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub fallacy: String,
    pub needs_fact_check: bool,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<FactSource>>,
}

/// State for one live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    /// Epoch seconds at session start
    pub started_at: f64,
    /// speaker tag ("spk_0") -> display label ("Speaker A")
    pub speakers: HashMap<String, String>,
    pub segments: Vec<Segment>,
    pub claims: Vec<Claim>,
}

impl SessionState {
    pub fn new(session_id: String, speakers: HashMap<String, String>) -> Self {
        Self {
            session_id,
            started_at: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            speakers,
            segments: Vec::new(),
            claims: Vec::new(),
        }
    }

    /// Ensure a speaker tag has a display label, generating "Speaker N" for
    /// tags the session was not started with.
    pub fn ensure_speaker(&mut self, tag: &str) {
        if !self.speakers.contains_key(tag) {
            let label = format!("Speaker {}", self.speakers.len() + 1);
            log::debug!("New speaker tag {} -> {}", tag, label);
            self.speakers.insert(tag.to_string(), label);
        }
    }
}

/// Speaker tag for a numeric diarization id ("spk_0", "spk_1", ...).
pub fn speaker_tag(speaker_id: u32) -> String {
    format!("spk_{}", speaker_id)
}

/// Generate a segment id ("seg_" + 8 hex chars).
pub fn generate_segment_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("seg_{}", &uuid[..8])
}

/// Shared handle to one session's state.
pub type SharedSession = Arc<Mutex<SessionState>>;

/// In-memory map of active sessions with an explicit lifecycle.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default speaker labels used when the caller supplies none.
    fn default_speakers() -> HashMap<String, String> {
        let mut speakers = HashMap::new();
        speakers.insert("spk_0".to_string(), "Speaker A".to_string());
        speakers.insert("spk_1".to_string(), "Speaker B".to_string());
        speakers
    }

    /// Create a new session, generating a `live_<epoch-millis>` id.
    pub fn create(&self, speakers: Option<HashMap<String, String>>) -> SharedSession {
        let session_id = format!("live_{}", chrono::Utc::now().timestamp_millis());
        self.create_with_id(session_id, speakers)
    }

    /// Create a session with an explicit id (useful for tests and replay).
    pub fn create_with_id(
        &self,
        session_id: String,
        speakers: Option<HashMap<String, String>>,
    ) -> SharedSession {
        let speakers = speakers.unwrap_or_else(Self::default_speakers);
        let state = SessionState::new(session_id.clone(), speakers);
        let shared = Arc::new(Mutex::new(state));

        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session_id.clone(), shared.clone());
        log::info!("Session created: {}", session_id);
        shared
    }

    /// Look up an active session.
    pub fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Tear down a session, dropping its state.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().unwrap().remove(session_id).is_some();
        if removed {
            log::info!("Session removed: {}", session_id);
        }
        removed
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}
