//! Claim extraction / fact-checking boundary client
//!
//! Posts a batch of newly produced segments to the analysis service and
//! returns the enriched claims (fallacy labels, fact-check verdicts,
//! sources). The service itself is an external collaborator; this module
//! is only the wire adapter.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::session::{Claim, Segment};

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Errors from the analysis boundary. Always recoverable and
/// session-scoped: a failed batch is discarded, never retried, and the
/// next flush proceeds with newly accumulated segments.
#[derive(Debug, Clone)]
pub enum AnalysisError {
    NetworkError(String),
    ApiError { status: u16, message: String },
    ParseError(String),
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::NetworkError(e) => write!(f, "Analysis network error: {}", e),
            AnalysisError::ApiError { status, message } => {
                write!(f, "Analysis API error ({}): {}", status, message)
            }
            AnalysisError::ParseError(e) => {
                write!(f, "Failed to parse analysis response: {}", e)
            }
        }
    }
}

impl std::error::Error for AnalysisError {}

/// Request body for the analysis boundary.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    session_id: &'a str,
    segments: &'a [Segment],
}

/// Client for the claim-extraction / fact-checking service.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    endpoint: String,
}

impl AnalysisClient {
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }

    /// Analyze one batch of segments. Called exactly once per batch.
    pub async fn analyze(
        &self,
        session_id: &str,
        segments: &[Segment],
    ) -> Result<Vec<Claim>, AnalysisError> {
        log::info!(
            "Analyzing batch of {} segments for session {}",
            segments.len(),
            session_id
        );

        let request = AnalyzeRequest {
            session_id,
            segments,
        };

        let response = get_http_client()
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::NetworkError(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            let claims: Vec<Claim> = response
                .json()
                .await
                .map_err(|e| AnalysisError::ParseError(e.to_string()))?;

            log::info!(
                "Analysis returned {} claims for session {}",
                claims.len(),
                session_id
            );

            Ok(claims)
        } else {
            let message = response.text().await.unwrap_or_default();
            log::error!("Analysis API error ({}): {}", status.as_u16(), message);

            Err(AnalysisError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }
}
