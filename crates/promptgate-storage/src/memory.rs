//! In-memory storage backends.
//!
//! Stores all data in process memory. Dev and test profile; not intended
//! for production use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use promptgate_core::{
    AnalyticsPoint, AnalyticsSink, AuditEvent, AuditLog, GatewayError, KeyValueStore, Result,
    Tenant, TenantId, TenantStore, UsageSummary,
};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

// ===========================================================================
// InMemoryTenantStore
// ===========================================================================

/// In-memory tenant store for testing and single-node development.
///
/// Lookups are `O(n)` linear scans over the tenant list.
pub struct InMemoryTenantStore {
    tenants: RwLock<Vec<Tenant>>,
}

impl InMemoryTenantStore {
    /// Create a new, empty in-memory tenant store.
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryTenantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>> {
        let tenants = self.tenants.read().await;
        Ok(tenants.iter().find(|t| t.api_key == api_key).cloned())
    }

    async fn create(&self, tenant: &Tenant) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        if tenants
            .iter()
            .any(|t| t.id == tenant.id || t.api_key == tenant.api_key)
        {
            return Err(GatewayError::Internal(format!(
                "tenant {} already exists",
                tenant.id
            )));
        }
        tenants.push(tenant.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ===========================================================================
// InMemoryKeyValueStore
// ===========================================================================

/// A stored value with its expiry instant.
struct KvEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

/// In-memory key-value store backed by [`DashMap`] with TTL expiry.
///
/// Expired entries are lazily evicted on access. Backs the rate limiter
/// and the IP blocklist in the memory and lite profiles; production
/// deployments would use a shared networked store.
pub struct InMemoryKeyValueStore {
    map: DashMap<String, KvEntry>,
}

impl InMemoryKeyValueStore {
    /// Create a new, empty in-memory key-value store.
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.map.get(key) {
            if Instant::now() < entry.expires_at {
                return Ok(Some(entry.data.clone()));
            }
            // Entry expired — drop the ref before removing
            drop(entry);
            self.map.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.map.insert(
            key.to_string(),
            KvEntry {
                data: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ===========================================================================
// InMemoryAuditLog
// ===========================================================================

/// In-memory audit log for testing.
pub struct InMemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    /// Create a new, empty in-memory audit log.
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut events = self.events.write().await;
        events.push(event.clone());
        Ok(())
    }

    async fn recent(&self, tenant_id: TenantId, limit: u32) -> Result<Vec<AuditEvent>> {
        let events = self.events.read().await;
        let mut results: Vec<AuditEvent> = events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results.truncate(limit as usize);
        Ok(results)
    }

    async fn summarize(&self, tenant_id: TenantId, since: DateTime<Utc>) -> Result<UsageSummary> {
        let events = self.events.read().await;
        let window: Vec<&AuditEvent> = events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.timestamp >= since)
            .collect();

        let total = window.len() as u64;
        let blocked = window.iter().filter(|e| e.decision.is_blocked()).count() as u64;
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            window.iter().map(|e| e.latency_ms as f64).sum::<f64>() / total as f64
        };

        Ok(UsageSummary {
            total,
            blocked,
            avg_latency_ms,
        })
    }

    async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut events = self.events.write().await;
        let initial = events.len();
        events.retain(|e| e.timestamp >= before);
        Ok((initial - events.len()) as u64)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ===========================================================================
// InMemoryAnalyticsSink
// ===========================================================================

/// In-memory analytics sink for testing.
///
/// The gateway never reads analytics back; [`recorded`](Self::recorded)
/// exists so tests can assert on emission.
pub struct InMemoryAnalyticsSink {
    points: RwLock<Vec<AnalyticsPoint>>,
}

impl InMemoryAnalyticsSink {
    /// Create a new, empty in-memory analytics sink.
    pub fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of all recorded points, in insertion order.
    pub async fn recorded(&self) -> Vec<AnalyticsPoint> {
        self.points.read().await.clone()
    }
}

impl Default for InMemoryAnalyticsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalyticsSink for InMemoryAnalyticsSink {
    async fn record(&self, point: &AnalyticsPoint) -> Result<()> {
        let mut points = self.points.write().await;
        points.push(point.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
