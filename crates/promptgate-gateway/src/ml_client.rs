//! Client for the external ML classification service.
//!
//! The fallback tier for content the fast pattern path cannot resolve.
//! Every call is bounded by a timeout, and every failure mode — timeout,
//! connection error, non-success status, malformed body — **fails open**:
//! the content is admitted with a lowered confidence and an explicit
//! `ml_backend_error` flag, so downstream consumers can distinguish
//! "classified safe" from "infrastructure degraded, assumed safe". A
//! classifier outage never turns into a 5xx for a well-formed request.

use promptgate_core::{Decision, Engine, GatewayError, MlFallbackConfig, Result, TenantId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Confidence reported when the classifier could not be consulted.
const FAIL_OPEN_CONFIDENCE: f64 = 0.5;

/// Request body sent to the classifier's `/inspect` endpoint.
#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    prompt: &'a str,
    tenant_id: String,
    sensitivity: &'a str,
}

/// Verdict returned by the classifier.
#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    blocked: bool,
    confidence: f64,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Outcome of one fallback classification.
#[derive(Debug, Clone)]
pub struct MlOutcome {
    /// Admit/deny verdict.
    pub decision: Decision,
    /// Confidence in the verdict.
    pub confidence: f64,
    /// Threat category, or `ml_backend_error` when the service could
    /// not be consulted.
    pub category: Option<String>,
    /// Human-readable reason.
    pub reason: Option<String>,
    /// `MlEnsemble` for real verdicts, `FailOpen` otherwise.
    pub engine: Engine,
}

impl MlOutcome {
    /// The fail-open outcome: admitted, flagged, lowered confidence.
    fn fail_open() -> Self {
        Self {
            decision: Decision::Allowed,
            confidence: FAIL_OPEN_CONFIDENCE,
            category: Some("ml_backend_error".to_string()),
            reason: Some("Classification service unavailable".to_string()),
            engine: Engine::FailOpen,
        }
    }
}

/// HTTP client for the external classification endpoint.
pub struct MlFallbackClient {
    client: reqwest::Client,
    config: MlFallbackConfig,
}

impl MlFallbackClient {
    /// Create a client with the configured timeout bound.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &MlFallbackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to build ML client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Classify text, failing open on any transport or status failure.
    ///
    /// This method is infallible by construction: infrastructure problems
    /// degrade detection quality, they never surface as errors.
    pub async fn classify(&self, text: &str, tenant_id: TenantId) -> MlOutcome {
        let url = format!(
            "{}/inspect",
            self.config.endpoint_url.trim_end_matches('/')
        );
        let body = ClassifyRequest {
            prompt: text,
            tenant_id: tenant_id.to_string(),
            sensitivity: &self.config.sensitivity,
        };

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(%tenant_id, "ML classifier unreachable: {e}");
                return MlOutcome::fail_open();
            }
        };

        if !response.status().is_success() {
            warn!(
                %tenant_id,
                status = %response.status(),
                "ML classifier returned non-success status"
            );
            return MlOutcome::fail_open();
        }

        match response.json::<ClassifyResponse>().await {
            Ok(verdict) => MlOutcome {
                decision: if verdict.blocked {
                    Decision::Blocked
                } else {
                    Decision::Allowed
                },
                confidence: verdict.confidence,
                category: verdict.category,
                reason: verdict.reason,
                engine: Engine::MlEnsemble,
            },
            Err(e) => {
                warn!(%tenant_id, "ML classifier returned malformed body: {e}");
                MlOutcome::fail_open()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
