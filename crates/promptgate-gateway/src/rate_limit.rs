//! Per-tenant rate limiting using fixed-window counting.
//!
//! Each tenant has one live window record in the shared [`KeyValueStore`].
//! In production that store is a shared networked service, so the counter
//! is enforced across horizontally-scaled gateway instances; in
//! development the in-memory store gives single-instance limiting.
//!
//! Cache key format: `ratelimit:{tenant_id}`
//!
//! The get/set pair against the store is not atomic: two concurrent
//! requests from the same tenant near the limit boundary may both read
//! `count < limit` and both be admitted. That transient over-admission is
//! bounded and tolerated; the limiter enforces the quota in aggregate
//! over time, not per-interleaving.

use chrono::Utc;
use promptgate_core::{KeyValueStore, RateLimitConfig, Result, Tenant, TenantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One tenant's live window record, stored as JSON in the key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RateWindow {
    /// Requests admitted in the current window.
    count: u32,
    /// Epoch second at which the window resets.
    reset_epoch: i64,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests remaining in the current window.
    pub remaining: u32,
    /// Epoch second at which the window resets.
    pub reset_epoch: i64,
    /// Effective limit for the tenant's tier.
    pub limit: u32,
}

/// Per-tenant fixed-window rate limiter backed by [`KeyValueStore`].
pub struct RateLimiter {
    config: RateLimitConfig,
    kv: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config and store backend.
    pub fn new(config: &RateLimitConfig, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            config: config.clone(),
            kv,
        }
    }

    /// Resolve the effective request limit for a tenant. Tiers absent
    /// from the configured table fall back to the default limit.
    fn limit_for(&self, tenant: &Tenant) -> u32 {
        self.config
            .tier_limits
            .get(&tenant.tier.to_string())
            .copied()
            .unwrap_or(self.config.default_limit)
    }

    /// Cache key for a tenant's window record.
    fn cache_key(tenant_id: TenantId) -> String {
        format!("ratelimit:{}", tenant_id.0)
    }

    /// Check (and count) one request against the tenant's quota.
    ///
    /// # Errors
    ///
    /// Returns an error if the window record cannot be read from the
    /// store; a failed write after the decision is logged and ignored.
    pub async fn check(&self, tenant: &Tenant) -> Result<RateDecision> {
        let limit = self.limit_for(tenant);
        let window_seconds = i64::from(self.config.window_seconds);
        let now = Utc::now().timestamp();

        if !self.config.enabled {
            return Ok(RateDecision {
                allowed: true,
                remaining: limit,
                reset_epoch: now + window_seconds,
                limit,
            });
        }

        let key = Self::cache_key(tenant.id);
        let stored: Option<RateWindow> = self
            .kv
            .get(&key)
            .await?
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        let decision = match stored {
            // First request of a window, or the stored window has elapsed.
            None => {
                let window = RateWindow {
                    count: 1,
                    reset_epoch: now + window_seconds,
                };
                self.put_window(&key, &window, window_seconds).await;
                RateDecision {
                    allowed: true,
                    remaining: limit.saturating_sub(1),
                    reset_epoch: window.reset_epoch,
                    limit,
                }
            }
            Some(w) if w.reset_epoch < now => {
                let window = RateWindow {
                    count: 1,
                    reset_epoch: now + window_seconds,
                };
                self.put_window(&key, &window, window_seconds).await;
                RateDecision {
                    allowed: true,
                    remaining: limit.saturating_sub(1),
                    reset_epoch: window.reset_epoch,
                    limit,
                }
            }
            // Quota exhausted for this window.
            Some(w) if w.count >= limit => RateDecision {
                allowed: false,
                remaining: 0,
                reset_epoch: w.reset_epoch,
                limit,
            },
            // Within the window and under the limit: count the request.
            Some(w) => {
                let window = RateWindow {
                    count: w.count + 1,
                    reset_epoch: w.reset_epoch,
                };
                self.put_window(&key, &window, (w.reset_epoch - now).max(1))
                    .await;
                RateDecision {
                    allowed: true,
                    remaining: limit.saturating_sub(window.count),
                    reset_epoch: w.reset_epoch,
                    limit,
                }
            }
        };

        debug!(
            tenant_id = %tenant.id,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Rate limit check"
        );
        Ok(decision)
    }

    /// Persist a window record. Write failures are logged and ignored —
    /// the decision for this request is already made.
    async fn put_window(&self, key: &str, window: &RateWindow, ttl_seconds: i64) {
        if let Ok(bytes) = serde_json::to_vec(window) {
            let ttl = Duration::from_secs(ttl_seconds.max(1) as u64);
            if let Err(e) = self.kv.set(key, &bytes, ttl).await {
                debug!("Failed to persist rate window: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
