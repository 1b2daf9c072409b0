//! Core inspection pipeline.
//!
//! Receives inspection requests and walks them through the sequential,
//! short-circuiting state machine: rate check → blocklist check → body
//! validation → pattern matching → (optional) ML fallback → response.
//! Any terminal verdict skips all later states. Audit and analytics
//! emission happens after the decision, off the response path.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use promptgate_core::{
    AnalyticsPoint, AuditEvent, AuthContext, Decision, Engine, GatewayConfig, GatewayError,
    InspectionResult, Result, Severity, Stores, Tenant,
};
use promptgate_security::{PatternEngine, PatternVerdict};
use promptgate_storage::StorageProfile;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::blocklist::BlocklistGate;
use crate::events::{hash_content, EventEmitter};
use crate::ml_client::MlFallbackClient;
use crate::rate_limit::{RateDecision, RateLimiter};

/// Confidence reported for content with no signature match on the
/// no-fallback path.
const CLEAN_CONFIDENCE: f64 = 0.99;

/// Maximum characters in a single prompt.
const MAX_PROMPT_CHARS: usize = 1_000_000;

/// Maximum messages in a message-list body.
const MAX_MESSAGES: usize = 500;

/// Maximum prompts per batch request.
const MAX_BATCH_PROMPTS: usize = 100;

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state threaded through axum handlers via [`State`].
pub struct AppState {
    /// Gateway configuration.
    pub config: GatewayConfig,
    /// External collaborators (tenant store, KV store, audit, analytics).
    pub stores: Stores,
    /// Fast-path pattern engine.
    pub engine: PatternEngine,
    /// Per-tenant fixed-window rate limiter.
    pub limiter: RateLimiter,
    /// Global IP blocklist gate.
    pub blocklist: BlocklistGate,
    /// ML fallback client (`None` when the fallback tier is disabled).
    pub ml: Option<MlFallbackClient>,
    /// Fire-and-forget audit/analytics emitter.
    pub emitter: EventEmitter,
}

impl AppState {
    /// Build the full application state from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage profile cannot be built, a
    /// signature fails to compile, or the ML client cannot be
    /// constructed.
    pub async fn from_config(config: GatewayConfig) -> Result<Arc<Self>> {
        let stores = StorageProfile::from_config(&config.storage)?.build().await?;
        Self::with_stores(config, stores)
    }

    /// Build the application state over pre-built stores.
    ///
    /// # Errors
    ///
    /// Returns an error if a signature fails to compile or the ML client
    /// cannot be constructed.
    pub fn with_stores(config: GatewayConfig, stores: Stores) -> Result<Arc<Self>> {
        let engine = PatternEngine::with_builtin_rules()?;
        let limiter = RateLimiter::new(&config.rate_limiting, stores.kv.clone());
        let blocklist = BlocklistGate::new(stores.kv.clone());
        let ml = if config.ml_fallback.enabled {
            Some(MlFallbackClient::new(&config.ml_fallback)?)
        } else {
            None
        };
        let emitter = EventEmitter::new(stores.audit.clone(), stores.analytics.clone());

        Ok(Arc::new(Self {
            config,
            stores,
            engine,
            limiter,
            blocklist,
            ml,
            emitter,
        }))
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A single chat message in a message-list body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role (`user`, `assistant`, `system`, …).
    pub role: String,
    /// Message content.
    pub content: String,
}

/// Request body for `POST /v1/inspect`.
///
/// Exactly one of `prompt` or `messages` must be present.
#[derive(Debug, Clone, Deserialize)]
pub struct InspectRequest {
    /// A single prompt to inspect.
    #[serde(default)]
    pub prompt: Option<String>,
    /// An ordered list of role-tagged messages.
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    /// Declared model name the content is bound for.
    #[serde(default)]
    pub model: Option<String>,
}

impl InspectRequest {
    /// Extract the text to analyze: the prompt, or the contents of all
    /// `user`-role messages in original order, newline-joined.
    ///
    /// # Errors
    ///
    /// Returns a validation error when neither or both input modes are
    /// present, or when the content exceeds size limits.
    pub fn analyzed_text(&self) -> Result<String> {
        match (&self.prompt, &self.messages) {
            (Some(_), Some(_)) => Err(GatewayError::Validation(
                "Provide exactly one of `prompt` or `messages`".to_string(),
            )),
            (None, None) => Err(GatewayError::Validation(
                "Either `prompt` or `messages` must be provided".to_string(),
            )),
            (Some(prompt), None) => {
                if prompt.chars().count() > MAX_PROMPT_CHARS {
                    return Err(GatewayError::Validation(format!(
                        "`prompt` exceeds {MAX_PROMPT_CHARS} characters"
                    )));
                }
                Ok(prompt.clone())
            }
            (None, Some(messages)) => {
                if messages.len() > MAX_MESSAGES {
                    return Err(GatewayError::Validation(format!(
                        "`messages` exceeds {MAX_MESSAGES} entries"
                    )));
                }
                Ok(messages
                    .iter()
                    .filter(|m| m.role == "user")
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        }
    }
}

/// One detected signal in an inspect response.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// Threat category.
    pub category: String,
    /// Severity of the signal.
    pub severity: Severity,
    /// Confidence of the signal.
    pub confidence: f64,
}

impl Detection {
    fn from_verdict(verdict: &PatternVerdict) -> Option<Self> {
        match (verdict.category, verdict.severity) {
            (Some(category), Some(severity)) => Some(Self {
                category: category.to_string(),
                severity,
                confidence: verdict.confidence,
            }),
            _ => None,
        }
    }
}

/// Response body for `POST /v1/inspect`.
#[derive(Debug, Serialize)]
pub struct InspectResponse {
    /// Whether the content may proceed to the model.
    pub safe: bool,
    /// Confidence in the verdict.
    pub confidence: f64,
    /// Detected signals, blocking or flagged.
    pub detections: Vec<Detection>,
    /// Wall-clock inspection time in milliseconds.
    pub scan_time_ms: u64,
    /// Detection tier that produced the verdict.
    pub engine: Engine,
}

/// Request body for `POST /v1/inspect/batch`.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    /// Prompts to inspect, 1–100 entries.
    pub prompts: Vec<String>,
}

/// One entry in a batch response.
#[derive(Debug, Serialize)]
pub struct BatchEntry {
    /// Whether the prompt was blocked.
    pub blocked: bool,
    /// Confidence of the verdict (0 when nothing matched).
    pub confidence: f64,
    /// Threat category when a signature matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Detection tier; the batch path is fast-path only.
    pub engine: Engine,
}

/// Response body for `POST /v1/inspect/batch`.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    /// Per-prompt verdicts, in input order.
    pub results: Vec<BatchEntry>,
    /// Number of prompts inspected.
    pub total: usize,
    /// Number of blocked prompts.
    pub blocked: usize,
    /// Wall-clock inspection time in milliseconds.
    pub scan_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the client IP from `X-Forwarded-For` (first hop), falling back
/// to `"unknown"`.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Build a JSON error response for a [`GatewayError`].
///
/// Internal detail from dependency and internal failures is logged where
/// the error is raised, never returned to the caller.
pub(crate) fn error_response(err: &GatewayError) -> Response {
    let (status, error_type, message) = match err {
        GatewayError::Unauthenticated | GatewayError::InvalidCredential => {
            (StatusCode::UNAUTHORIZED, "auth_error", err.to_string())
        }
        GatewayError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
        }
        GatewayError::RateLimited { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limit_exceeded",
            "Rate limit exceeded".to_string(),
        ),
        GatewayError::IpBlocked => (StatusCode::FORBIDDEN, "ip_blocked", "IP blocked".to_string()),
        GatewayError::Dependency(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "dependency_unavailable",
            "Service dependency unavailable".to_string(),
        ),
        GatewayError::Internal(_)
        | GatewayError::Config(_)
        | GatewayError::Serialization(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error".to_string(),
        ),
    };

    let body = serde_json::json!({
        "error": { "message": message, "type": error_type }
    });
    (status, Json(body)).into_response()
}

/// Attach the always-set rate-limit headers to a `/v1/inspect` response.
fn with_rate_headers(mut resp: Response, rate: &RateDecision) -> Response {
    let headers = resp.headers_mut();
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from_str(&rate.remaining.to_string()).unwrap(),
    );
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from_str(&rate.reset_epoch.to_string()).unwrap(),
    );
    resp
}

/// Emit the audit event and analytics point for a content decision.
fn emit_decision(
    state: &AppState,
    tenant: &Tenant,
    source_ip: &str,
    severity: Severity,
    result: &InspectionResult,
    text: &str,
    model: &str,
) {
    state.emitter.emit(
        AuditEvent::from_result(tenant.id, severity, result)
            .with_source_ip(source_ip)
            .with_content_hash(hash_content(text))
            .with_preview(text),
    );

    state.emitter.record(AnalyticsPoint {
        tenant_id: tenant.id,
        category: result
            .category
            .clone()
            .unwrap_or_else(|| "clean".to_string()),
        model: model.to_string(),
        latency_ms: result.elapsed_ms,
        confidence: result.confidence,
        blocked: result.decision.is_blocked(),
        timestamp: Utc::now(),
    });
}

/// Render the 200 response carried by an inspection result.
fn verdict_response(result: &InspectionResult, detections: Vec<Detection>) -> Response {
    Json(InspectResponse {
        safe: !result.decision.is_blocked(),
        confidence: result.confidence,
        detections,
        scan_time_ms: result.elapsed_ms,
        engine: result.engine,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Inspect handler
// ---------------------------------------------------------------------------

/// `POST /v1/inspect` — inspect a single prompt or message list.
///
/// A blocked prompt is a normal 200 carrying `safe:false`; only IP-level
/// blocks (403) and rate-limit exhaustion (429) are transport-level.
pub async fn inspect_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    req: Request,
) -> Response {
    let start = Instant::now();
    let tenant = ctx.tenant;
    let headers = req.headers().clone();
    let source_ip = client_ip(&headers);

    // -- RateChecking -------------------------------------------------------
    let rate = match state.limiter.check(&tenant).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(%tenant.id, "Rate limit store unreachable: {e}");
            return error_response(&e);
        }
    };
    if !rate.allowed {
        let err = GatewayError::RateLimited {
            reset_epoch: rate.reset_epoch,
        };
        return with_rate_headers(error_response(&err), &rate);
    }

    // -- BlocklistChecking --------------------------------------------------
    match state.blocklist.is_blocked(&source_ip).await {
        Ok(false) => {}
        Ok(true) => {
            debug!(%tenant.id, %source_ip, "Rejected request from blocked IP");
            // Deterministic, maximum-confidence block issued before any
            // content is inspected.
            let result = InspectionResult {
                decision: Decision::Blocked,
                confidence: 1.0,
                category: Some("blocked_ip".to_string()),
                reason: Some("IP globally blocked".to_string()),
                engine: Engine::FailOpen,
                elapsed_ms: start.elapsed().as_millis() as u64,
            };
            state.emitter.emit(
                AuditEvent::from_result(tenant.id, Severity::High, &result)
                    .with_source_ip(&source_ip)
                    .with_preview("IP in blocklist"),
            );
            return with_rate_headers(error_response(&GatewayError::IpBlocked), &rate);
        }
        Err(e) => {
            tracing::error!(%tenant.id, "Blocklist store unreachable: {e}");
            return with_rate_headers(error_response(&e), &rate);
        }
    }

    // -- Body validation ----------------------------------------------------
    let body_bytes = match axum::body::to_bytes(req.into_body(), state.config.max_body_bytes).await
    {
        Ok(b) => b,
        Err(_) => {
            let err = GatewayError::Validation("Failed to read request body".to_string());
            return with_rate_headers(error_response(&err), &rate);
        }
    };
    let body: InspectRequest = match serde_json::from_slice(&body_bytes) {
        Ok(b) => b,
        Err(e) => {
            let err = GatewayError::Validation(format!("Invalid JSON body: {e}"));
            return with_rate_headers(error_response(&err), &rate);
        }
    };
    let text = match body.analyzed_text() {
        Ok(t) => t,
        Err(e) => return with_rate_headers(error_response(&e), &rate),
    };
    let model = body.model.as_deref().unwrap_or("unknown");

    // -- PatternMatching ----------------------------------------------------
    let verdict = state.engine.evaluate(&text);
    if verdict.blocked {
        let category = verdict.category.unwrap_or("unknown");
        let severity = verdict.severity.unwrap_or(Severity::High);
        let result = InspectionResult {
            decision: Decision::Blocked,
            confidence: verdict.confidence,
            category: Some(category.to_string()),
            reason: Some(format!("Pattern match: {category}")),
            engine: Engine::EdgePattern,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        emit_decision(&state, &tenant, &source_ip, severity, &result, &text, model);
        let resp = verdict_response(&result, Detection::from_verdict(&verdict).into_iter().collect());
        return with_rate_headers(resp, &rate);
    }

    // Non-blocking match travels with the response as a flagged detection.
    let flagged = Detection::from_verdict(&verdict);

    // -- MLFallback / Responding --------------------------------------------
    let resp = match &state.ml {
        Some(ml) => {
            let outcome = ml.classify(&text, tenant.id).await;

            let mut detections: Vec<Detection> = flagged.into_iter().collect();
            let (severity, category) = match (outcome.decision, outcome.engine) {
                (Decision::Blocked, _) => {
                    let category = outcome
                        .category
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string());
                    detections.push(Detection {
                        category: category.clone(),
                        severity: Severity::High,
                        confidence: outcome.confidence,
                    });
                    (Severity::High, category)
                }
                (Decision::Allowed, Engine::FailOpen) => {
                    let category = "ml_backend_error".to_string();
                    detections.push(Detection {
                        category: category.clone(),
                        severity: Severity::Medium,
                        confidence: outcome.confidence,
                    });
                    (Severity::Medium, category)
                }
                (Decision::Allowed, _) => (
                    Severity::Low,
                    outcome
                        .category
                        .clone()
                        .unwrap_or_else(|| "clean".to_string()),
                ),
            };

            let result = InspectionResult {
                decision: outcome.decision,
                confidence: outcome.confidence,
                category: Some(category),
                reason: outcome.reason.clone(),
                engine: outcome.engine,
                elapsed_ms: start.elapsed().as_millis() as u64,
            };

            emit_decision(&state, &tenant, &source_ip, severity, &result, &text, model);
            verdict_response(&result, detections)
        }
        // No fallback tier: absence of a blocking match is conclusive.
        None => {
            let (severity, result) = match &flagged {
                Some(d) => (
                    d.severity,
                    InspectionResult {
                        decision: Decision::Allowed,
                        confidence: d.confidence,
                        category: Some(d.category.clone()),
                        reason: Some(format!("Pattern match: {}", d.category)),
                        engine: Engine::EdgePattern,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    },
                ),
                None => (
                    Severity::Low,
                    InspectionResult {
                        decision: Decision::Allowed,
                        confidence: CLEAN_CONFIDENCE,
                        category: None,
                        reason: None,
                        engine: Engine::EdgePattern,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    },
                ),
            };

            emit_decision(&state, &tenant, &source_ip, severity, &result, &text, model);
            verdict_response(&result, flagged.into_iter().collect())
        }
    };

    with_rate_headers(resp, &rate)
}

// ---------------------------------------------------------------------------
// Batch handler
// ---------------------------------------------------------------------------

/// `POST /v1/inspect/batch` — inspect up to 100 prompts.
///
/// Fast path only: the batch endpoint never consults the ML fallback,
/// and one rate-limit check covers the whole batch.
pub async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    req: Request,
) -> Response {
    let start = Instant::now();
    let tenant = ctx.tenant;

    let rate = match state.limiter.check(&tenant).await {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(%tenant.id, "Rate limit store unreachable: {e}");
            return error_response(&e);
        }
    };
    if !rate.allowed {
        let err = GatewayError::RateLimited {
            reset_epoch: rate.reset_epoch,
        };
        return with_rate_headers(error_response(&err), &rate);
    }

    let body_bytes = match axum::body::to_bytes(req.into_body(), state.config.max_body_bytes).await
    {
        Ok(b) => b,
        Err(_) => {
            let err = GatewayError::Validation("Failed to read request body".to_string());
            return error_response(&err);
        }
    };
    let body: BatchRequest = match serde_json::from_slice(&body_bytes) {
        Ok(b) => b,
        Err(e) => {
            let err = GatewayError::Validation(format!("Invalid JSON body: {e}"));
            return error_response(&err);
        }
    };

    if body.prompts.is_empty() || body.prompts.len() > MAX_BATCH_PROMPTS {
        let err = GatewayError::Validation(format!(
            "`prompts` must contain between 1 and {MAX_BATCH_PROMPTS} entries"
        ));
        return error_response(&err);
    }

    let results: Vec<BatchEntry> = body
        .prompts
        .iter()
        .map(|prompt| {
            let verdict = state.engine.evaluate(prompt);
            BatchEntry {
                blocked: verdict.blocked,
                confidence: verdict.confidence,
                category: verdict.category.map(|c| c.to_string()),
                engine: Engine::EdgePattern,
            }
        })
        .collect();

    let blocked = results.iter().filter(|r| r.blocked).count();
    let total = results.len();

    Json(BatchResponse {
        results,
        total,
        blocked,
        scan_time_ms: start.elapsed().as_millis() as u64,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_analyzed_text_from_prompt() {
        let req = InspectRequest {
            prompt: Some("hello".to_string()),
            messages: None,
            model: None,
        };
        assert_eq!(req.analyzed_text().unwrap(), "hello");
    }

    #[test]
    fn test_analyzed_text_joins_user_messages_in_order() {
        let req = InspectRequest {
            prompt: None,
            messages: Some(vec![
                msg("system", "You are helpful"),
                msg("user", "first"),
                msg("assistant", "reply"),
                msg("user", "second"),
            ]),
            model: None,
        };
        assert_eq!(req.analyzed_text().unwrap(), "first\nsecond");
    }

    #[test]
    fn test_analyzed_text_rejects_neither() {
        let req = InspectRequest {
            prompt: None,
            messages: None,
            model: Some("gpt-4".to_string()),
        };
        assert!(matches!(
            req.analyzed_text(),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn test_analyzed_text_rejects_both() {
        let req = InspectRequest {
            prompt: Some("hello".to_string()),
            messages: Some(vec![msg("user", "hi")]),
            model: None,
        };
        assert!(matches!(
            req.analyzed_text(),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn test_analyzed_text_rejects_oversized_prompt() {
        let req = InspectRequest {
            prompt: Some("x".repeat(MAX_PROMPT_CHARS + 1)),
            messages: None,
            model: None,
        };
        assert!(matches!(
            req.analyzed_text(),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn test_analyzed_text_rejects_too_many_messages() {
        let req = InspectRequest {
            prompt: None,
            messages: Some(vec![msg("user", "hi"); MAX_MESSAGES + 1]),
            model: None,
        };
        assert!(matches!(
            req.analyzed_text(),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn test_analyzed_text_no_user_messages_is_empty() {
        let req = InspectRequest {
            prompt: None,
            messages: Some(vec![msg("system", "setup"), msg("assistant", "reply")]),
            model: None,
        };
        assert_eq!(req.analyzed_text().unwrap(), "");
    }

    #[test]
    fn test_client_ip_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_missing_header() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }
}
