//! Asynchronous audit and analytics emission.
//!
//! Both sinks are fire-and-forget: dispatch happens on a spawned task
//! after the decision is computed, and a sink failure is logged and
//! swallowed — it never alters or delays the HTTP response. No retries;
//! a dropped record is acceptable data loss.

use promptgate_core::{AnalyticsPoint, AnalyticsSink, AuditEvent, AuditLog};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

/// Compute the SHA-256 hex digest of analyzed content.
#[must_use]
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Dispatches audit events and analytics points off the response path.
#[derive(Clone)]
pub struct EventEmitter {
    audit: Arc<dyn AuditLog>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl EventEmitter {
    /// Create an emitter over the given sinks.
    pub fn new(audit: Arc<dyn AuditLog>, analytics: Arc<dyn AnalyticsSink>) -> Self {
        Self { audit, analytics }
    }

    /// Dispatch an audit event asynchronously.
    pub fn emit(&self, event: AuditEvent) {
        let audit = Arc::clone(&self.audit);
        tokio::spawn(async move {
            if let Err(e) = audit.append(&event).await {
                warn!(event_id = %event.id, "Failed to append audit event: {e}");
            }
        });
    }

    /// Dispatch an analytics point asynchronously.
    pub fn record(&self, point: AnalyticsPoint) {
        let analytics = Arc::clone(&self.analytics);
        tokio::spawn(async move {
            if let Err(e) = analytics.record(&point).await {
                warn!(tenant_id = %point.tenant_id, "Failed to record analytics point: {e}");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
