//! Periodic batching of new segments for downstream analysis
//!
//! Tracks which segments have already been dispatched to the analysis
//! boundary, buffers the undispatched tail, and flushes it as one batch on
//! a fixed cadence. Returned claims are merged into the session's claim
//! list in start-time order with duplicates suppressed.
//!
//! # Delivery semantics
//!
//! Each batch is sent exactly once. A failed flush is logged and the batch
//! is dropped, not re-enqueued: the design accepts silent gaps in analysis
//! coverage to keep the live feed backlog-free. A segment id, once
//! observed, is never dispatched again even if the merge step touches that
//! segment later.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::analysis::{AnalysisClient, AnalysisError};
use crate::session::{Claim, Segment, SessionState, SharedSession};

/// Default flush cadence.
pub const FLUSH_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct AggregatorInner {
    /// Session the processed/pending state belongs to
    session_id: String,
    /// Segment ids ever handed to the analysis boundary; grows monotonically
    processed: HashSet<String>,
    /// Not-yet-dispatched segments
    pending: Vec<Segment>,
}

impl AggregatorInner {
    fn reset_for(&mut self, session_id: &str) {
        self.session_id = session_id.to_string();
        self.processed.clear();
        self.pending.clear();
    }
}

/// Session-scoped batching scheduler for the analysis boundary.
pub struct ChunkAggregator {
    session: SharedSession,
    client: AnalysisClient,
    inner: Mutex<AggregatorInner>,
}

impl ChunkAggregator {
    pub fn new(session: SharedSession, client: AnalysisClient) -> Self {
        let session_id = session.lock().unwrap().session_id.clone();

        Self {
            session,
            client,
            inner: Mutex::new(AggregatorInner {
                session_id,
                ..AggregatorInner::default()
            }),
        }
    }

    /// Observe a segment the merge step created or extended.
    ///
    /// Adds it to the pending batch unless its id was already dispatched.
    /// A session id change resets all aggregator state unconditionally; no
    /// cross-session leakage is permitted.
    pub fn observe(&self, segment: &Segment) {
        let mut inner = self.inner.lock().unwrap();

        if segment.session_id != inner.session_id {
            log::info!(
                "Session changed ({} -> {}), resetting aggregator state",
                inner.session_id,
                segment.session_id
            );
            inner.reset_for(&segment.session_id);
        }

        if inner.processed.insert(segment.id.clone()) {
            inner.pending.push(segment.clone());
        }
    }

    /// Number of segments waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Whether a segment id has ever been dispatched (or queued).
    pub fn is_processed(&self, segment_id: &str) -> bool {
        self.inner.lock().unwrap().processed.contains(segment_id)
    }

    /// Flush the pending batch to the analysis boundary.
    ///
    /// The batch is drained synchronously before any await, so a slow
    /// analysis round trip can never observe or race a half-drained
    /// buffer. Returns the number of claims merged.
    pub async fn flush(&self) -> Result<usize, AnalysisError> {
        let (session_id, batch) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.pending.is_empty() {
                return Ok(0);
            }
            (inner.session_id.clone(), std::mem::take(&mut inner.pending))
        };

        log::debug!("Flushing {} segments for analysis", batch.len());

        match self.client.analyze(&session_id, &batch).await {
            Ok(claims) => {
                let merged = {
                    let mut state = self.session.lock().unwrap();
                    merge_claims(&mut state, claims)
                };
                Ok(merged)
            }
            Err(e) => {
                // The batch is intentionally not re-enqueued; see module docs.
                log::error!(
                    "Analysis flush failed for {} segments: {}",
                    batch.len(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Run the periodic flush loop until cancelled.
    ///
    /// Ticks never overlap: each flush completes (including its network
    /// round trip) before the next tick is polled. Cancellation lets an
    /// in-flight flush finish rather than discarding already-spent
    /// analysis work.
    pub async fn run(&self, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of tokio's interval fires immediately; skip it so
        // the first flush happens one full period after start.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Aggregator flush loop stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.flush().await {
                        log::warn!("Flush tick failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Merge returned claims into the session, keeping the claim list sorted
/// by start (stable for ties) and deduplicated by id.
pub fn merge_claims(state: &mut SessionState, claims: Vec<Claim>) -> usize {
    let mut merged = 0;

    for claim in claims {
        if state.claims.iter().any(|c| c.id == claim.id) {
            log::debug!("Skipping duplicate claim {}", claim.id);
            continue;
        }
        state.claims.push(claim);
        merged += 1;
    }

    // Vec::sort_by is stable, so equal starts keep arrival order
    state
        .claims
        .sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    merged
}
