//! Read API handlers: health, stats rollups, and recent audit events.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{Duration as ChronoDuration, Utc};
use promptgate_core::{AuditLog, AuthContext, Result, TenantId, UsageSummary};
use serde::Deserialize;
use std::sync::Arc;

use crate::inspect::AppState;

/// Default number of events returned by `GET /v1/events`.
const DEFAULT_EVENTS_LIMIT: u32 = 10;

/// Maximum number of events returnable by `GET /v1/events`.
const MAX_EVENTS_LIMIT: u32 = 100;

/// Build a JSON error response.
fn api_error(status: StatusCode, error_type: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "error": { "message": message, "type": error_type }
    });
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// `GET /health` — liveness plus dependency checks.
///
/// Any failing dependency degrades the status and the response becomes a
/// 503.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let tenants_ok = state.stores.tenants.health_check().await.is_ok();
    let kv_ok = state.stores.kv.health_check().await.is_ok();
    let audit_ok = state.stores.audit.health_check().await.is_ok();

    let all_healthy = tenants_ok && kv_ok && audit_ok;

    let body = serde_json::json!({
        "status": if all_healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "tenant_store": tenants_ok,
            "rate_limit_store": kv_ok,
            "audit_log": audit_ok,
        },
    });

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Read-only rollups over the audit log for a tenant.
pub struct StatsAggregator {
    audit: Arc<dyn AuditLog>,
}

impl StatsAggregator {
    /// Create an aggregator over the given audit log.
    pub fn new(audit: Arc<dyn AuditLog>) -> Self {
        Self { audit }
    }

    /// Summarize a tenant's decisions over the trailing `window_days`.
    ///
    /// # Errors
    ///
    /// Returns an error when the audit log cannot be queried; a storage
    /// failure surfaces to the caller, never a silent zero.
    pub async fn summarize(&self, tenant_id: TenantId, window_days: i64) -> Result<UsageSummary> {
        let since = Utc::now() - ChronoDuration::days(window_days);
        self.audit.summarize(tenant_id, since).await
    }
}

/// `GET /v1/stats` — 24-hour rollup for the caller's tenant.
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    let aggregator = StatsAggregator::new(state.stores.audit.clone());
    match aggregator.summarize(ctx.tenant.id, 1).await {
        Ok(summary) => Json(serde_json::json!({
            "user_id": ctx.tenant.id,
            "tier": ctx.tenant.tier,
            "last_24h": {
                "total": summary.total,
                "blocked": summary.blocked,
                "avg_latency": summary.avg_latency_ms,
            },
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(tenant_id = %ctx.tenant.id, "Stats rollup failed: {e}");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Failed to compute stats",
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Query parameters for `GET /v1/events`.
#[derive(Debug, Deserialize)]
pub struct EventsParams {
    /// Maximum number of events to return, 1–100 (default 10).
    pub limit: Option<u32>,
}

/// `GET /v1/events?limit=` — recent audit events for the caller's tenant.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(params): Query<EventsParams>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_EVENTS_LIMIT);
    if limit < 1 || limit > MAX_EVENTS_LIMIT {
        return api_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            &format!("`limit` must be between 1 and {MAX_EVENTS_LIMIT}"),
        );
    }

    match state.stores.audit.recent(ctx.tenant.id, limit).await {
        Ok(events) => Json(serde_json::json!({ "events": events })).into_response(),
        Err(e) => {
            tracing::error!(tenant_id = %ctx.tenant.id, "Event query failed: {e}");
            api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "dependency_unavailable",
                "Service dependency unavailable",
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
