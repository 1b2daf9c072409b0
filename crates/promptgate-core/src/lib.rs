//! Core types, traits, and errors for PromptGate
//!
//! This crate contains the foundational types shared across all PromptGate
//! components: tenant identity, inspection verdicts, audit/analytics records,
//! the gateway error taxonomy, configuration, and the traits through which
//! the gateway talks to its external collaborators (tenant store, key-value
//! store, audit log, analytics sink).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Unique identifier for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TenantId {
    /// Create a new random tenant ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

/// Service class of a tenant, determining its request quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Pro => write!(f, "pro"),
            Self::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(format!("unknown tier: {s}")),
        }
    }
}

/// A tenant record as read from the external tenant store.
///
/// Immutable within the lifetime of a request; the gateway only ever reads
/// tenants, it never creates or mutates them at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant identifier.
    pub id: TenantId,
    /// Human-readable identity label (e.g. an account email).
    pub identity: String,
    /// Service tier determining the rate-limit quota.
    pub tier: Tier,
    /// API credential presented in the `X-API-Key` header.
    pub api_key: String,
    /// When the tenant was created.
    pub created_at: DateTime<Utc>,
}

/// Authenticated context injected by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Tenant the caller is authenticated as.
    pub tenant: Tenant,
}

// ---------------------------------------------------------------------------
// Detection types
// ---------------------------------------------------------------------------

/// Severity level of a detection signature.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity — informational flag only.
    Low,
    /// Medium severity — flagged, not blocked.
    Medium,
    /// High severity — blocked.
    High,
    /// Most severe — blocked.
    Critical,
}

impl Severity {
    /// Fixed severity → confidence mapping. Not configurable.
    #[must_use]
    pub fn confidence(self) -> f64 {
        match self {
            Self::Critical => 0.95,
            Self::High => 0.85,
            Self::Medium => 0.70,
            Self::Low => 0.50,
        }
    }

    /// Whether a match at this severity blocks the request outright.
    /// Medium and low matches are flagged but always admitted.
    #[must_use]
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Final admit/deny verdict for an inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allowed,
    Blocked,
}

impl Decision {
    /// `true` if this decision denies the content.
    #[must_use]
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Blocked)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "allowed" => Ok(Self::Allowed),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!("unknown decision: {s}")),
        }
    }
}

/// Which detection tier produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Literal/regex signature evaluation, no network call.
    EdgePattern,
    /// The external ML classification service.
    MlEnsemble,
    /// Deterministic verdict issued without content classification:
    /// either an IP-level block or a fail-open default after a
    /// classifier outage.
    FailOpen,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EdgePattern => write!(f, "edge_pattern"),
            Self::MlEnsemble => write!(f, "ml_ensemble"),
            Self::FailOpen => write!(f, "fail_open"),
        }
    }
}

impl std::str::FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "edge_pattern" => Ok(Self::EdgePattern),
            "ml_ensemble" => Ok(Self::MlEnsemble),
            "fail_open" => Ok(Self::FailOpen),
            _ => Err(format!("unknown engine: {s}")),
        }
    }
}

/// The outcome of one inspection request.
///
/// Produced exactly once per request and never revised after emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionResult {
    /// Admit/deny verdict.
    pub decision: Decision,
    /// Confidence in the verdict, in `[0, 1]`.
    pub confidence: f64,
    /// Threat category of the triggering signal, if any
    /// (e.g. `prompt_injection`, `jailbreak`, `ml_backend_error`).
    pub category: Option<String>,
    /// Human-readable reason for the verdict.
    pub reason: Option<String>,
    /// Which detection tier produced the verdict.
    pub engine: Engine,
    /// Wall-clock time spent producing the verdict.
    pub elapsed_ms: u64,
}

// ---------------------------------------------------------------------------
// Audit & analytics records
// ---------------------------------------------------------------------------

/// Maximum number of characters of raw content stored in an audit preview.
pub const PREVIEW_MAX_CHARS: usize = 200;

/// Durable, write-once record of one inspection decision.
///
/// Retained for 90 days; an external scheduled job purges older events
/// through [`AuditLog::purge_before`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// Tenant the inspected request belonged to.
    pub tenant_id: TenantId,
    /// Threat category (or `blocked_ip` / `ml_backend_error` / `clean`).
    pub category: String,
    /// Severity assigned to the event.
    pub severity: Severity,
    /// Source IP of the inspected request.
    pub source_ip: String,
    /// Admit/deny verdict.
    pub decision: Decision,
    /// Confidence in the verdict.
    pub confidence: f64,
    /// Detection tier that produced the verdict.
    pub engine: Engine,
    /// End-to-end inspection latency in milliseconds.
    pub latency_ms: u64,
    /// SHA-256 hex digest of the analyzed content.
    pub content_hash: String,
    /// Truncated preview of the analyzed content
    /// (at most [`PREVIEW_MAX_CHARS`] characters).
    pub content_preview: String,
    /// Human-readable reason, if any.
    pub reason: Option<String>,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Create an audit event carrying the fields of an inspection
    /// result. Request metadata (source IP, content hash, preview) is
    /// attached with the `with_*` builders.
    pub fn from_result(tenant_id: TenantId, severity: Severity, result: &InspectionResult) -> Self {
        let mut event = Self::new(
            tenant_id,
            result
                .category
                .clone()
                .unwrap_or_else(|| "clean".to_string()),
            severity,
            result.decision,
            result.confidence,
            result.engine,
        )
        .with_latency_ms(result.elapsed_ms);
        if let Some(ref reason) = result.reason {
            event = event.with_reason(reason.clone());
        }
        event
    }

    /// Create a new audit event for a decision.
    pub fn new(
        tenant_id: TenantId,
        category: impl Into<String>,
        severity: Severity,
        decision: Decision,
        confidence: f64,
        engine: Engine,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            category: category.into(),
            severity,
            source_ip: "unknown".to_string(),
            decision,
            confidence,
            engine,
            latency_ms: 0,
            content_hash: String::new(),
            content_preview: String::new(),
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Set the source IP of the inspected request.
    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = ip.into();
        self
    }

    /// Set the inspection latency.
    pub fn with_latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    /// Set the content hash.
    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = hash.into();
        self
    }

    /// Set the content preview, truncated to [`PREVIEW_MAX_CHARS`]
    /// characters. Truncation respects character boundaries.
    pub fn with_preview(mut self, content: &str) -> Self {
        self.content_preview = truncate_chars(content, PREVIEW_MAX_CHARS);
        self
    }

    /// Set the human-readable reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Truncate a string to at most `max` characters, on a character boundary.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// A single data point written to the analytics sink.
///
/// Feeds aggregate dashboards; the gateway itself never reads these back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsPoint {
    /// Tenant the point belongs to.
    pub tenant_id: TenantId,
    /// Threat category (or `clean`).
    pub category: String,
    /// Declared model name of the inspected request, or `unknown`.
    pub model: String,
    /// Inspection latency in milliseconds.
    pub latency_ms: u64,
    /// Confidence in the verdict.
    pub confidence: f64,
    /// Whether the content was blocked.
    pub blocked: bool,
    /// When the point was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Rollup of a tenant's audit events over a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Total inspection decisions in the window.
    pub total: u64,
    /// Decisions with `decision = blocked`.
    pub blocked: u64,
    /// Mean inspection latency in milliseconds (0 when `total` is 0).
    pub avg_latency_ms: f64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Gateway error taxonomy.
///
/// Each variant maps to exactly one HTTP status at the boundary; internal
/// detail in `Dependency` and `Internal` is logged, never returned to the
/// caller.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    /// No credential was presented. → 401
    #[error("Missing API key")]
    Unauthenticated,

    /// A credential was presented but matches no tenant. → 401
    #[error("Invalid API key")]
    InvalidCredential,

    /// Malformed or oversized request body. → 400
    #[error("Validation error: {0}")]
    Validation(String),

    /// The tenant exhausted its request quota. → 429
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Epoch second at which the window resets.
        reset_epoch: i64,
    },

    /// The source IP is on the global blocklist. → 403
    #[error("IP blocked")]
    IpBlocked,

    /// An external store was unreachable. → 503
    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    /// Unexpected internal failure. → 500
    #[error("Internal error: {0}")]
    Internal(String),

    /// Startup-time configuration failure.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization / deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias for `std::result::Result<T, GatewayError>`.
pub type Result<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Configuration types
// ---------------------------------------------------------------------------

/// Top-level gateway configuration, loaded from YAML at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address and port to bind the HTTP server to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limiting: RateLimitConfig,
    /// ML fallback classifier configuration.
    #[serde(default)]
    pub ml_fallback: MlFallbackConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024 // 2 MB
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_body_bytes: default_max_body_bytes(),
            rate_limiting: RateLimitConfig::default(),
            ml_fallback: MlFallbackConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Rate limiting configuration.
///
/// Limits are requests per fixed window, looked up by tier name; a tier
/// absent from `tier_limits` falls back to `default_limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Limit applied when the tenant's tier has no entry in `tier_limits`.
    #[serde(default = "default_rate_limit")]
    pub default_limit: u32,
    /// Fixed window length in seconds.
    #[serde(default = "default_rate_window_seconds")]
    pub window_seconds: u32,
    /// Per-tier request limits (tier name → requests per window).
    #[serde(default = "default_tier_limits")]
    pub tier_limits: HashMap<String, u32>,
}

fn default_true() -> bool {
    true
}

fn default_rate_limit() -> u32 {
    100
}

fn default_rate_window_seconds() -> u32 {
    60
}

fn default_tier_limits() -> HashMap<String, u32> {
    HashMap::from([
        ("free".to_string(), 100),
        ("pro".to_string(), 1_000),
        ("enterprise".to_string(), 10_000),
    ])
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            default_limit: default_rate_limit(),
            window_seconds: default_rate_window_seconds(),
            tier_limits: default_tier_limits(),
        }
    }
}

/// ML fallback classifier configuration.
///
/// When `enabled` is `false` (the default), content with no blocking
/// pattern match is declared safe immediately with no network call. When
/// `true`, every non-blocking single-inspect outcome is delegated to the
/// classifier at `endpoint_url`. The two behaviors never mix within one
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlFallbackConfig {
    /// Enable delegation to the external classifier.
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the classification service.
    #[serde(default = "default_ml_endpoint")]
    pub endpoint_url: String,
    /// Bound on the classifier call, in milliseconds.
    #[serde(default = "default_ml_timeout_ms")]
    pub timeout_ms: u64,
    /// Sensitivity hint forwarded to the classifier.
    #[serde(default = "default_ml_sensitivity")]
    pub sensitivity: String,
}

fn default_ml_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_ml_timeout_ms() -> u64 {
    2_000
}

fn default_ml_sensitivity() -> String {
    "medium".to_string()
}

impl Default for MlFallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint_url: default_ml_endpoint(),
            timeout_ms: default_ml_timeout_ms(),
            sensitivity: default_ml_sensitivity(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage profile: `"memory"` (in-memory) or `"lite"` (SQLite).
    #[serde(default = "default_storage_profile")]
    pub profile: String,
    /// Database file path (used by the `"lite"` profile).
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_storage_profile() -> String {
    "memory".to_string()
}

fn default_database_path() -> String {
    "promptgate.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            profile: default_storage_profile(),
            database_path: default_database_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: `text` (human-readable) or `json` (structured).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits (external stores & sinks)
// ---------------------------------------------------------------------------

/// Read access to the external tenant store, keyed by API credential.
///
/// The gateway issues a pure read per request; `create` exists for seeding
/// and tests, not for the request path.
#[async_trait::async_trait]
pub trait TenantStore: Send + Sync {
    /// Look up the tenant owning an API key. `Ok(None)` means the
    /// credential matches no tenant.
    async fn get_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>>;

    /// Insert a tenant record.
    async fn create(&self, tenant: &Tenant) -> Result<()>;

    /// Health check for the tenant store.
    async fn health_check(&self) -> Result<()>;
}

/// Shared key-value store backing the rate limiter and the IP blocklist.
///
/// The contract is plain get/set with TTL. There is no atomic
/// read-modify-write, so counters layered on top tolerate a bounded
/// read-then-write race under concurrent access.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set a value with a TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Remove a key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Health check for the key-value store.
    async fn health_check(&self) -> Result<()>;
}

/// Durable, append-only audit log of inspection decisions.
#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one event. Write-once; events are never updated.
    async fn append(&self, event: &AuditEvent) -> Result<()>;

    /// The most recent events for a tenant, newest first.
    async fn recent(&self, tenant_id: TenantId, limit: u32) -> Result<Vec<AuditEvent>>;

    /// Rollup of a tenant's events since `since`.
    async fn summarize(&self, tenant_id: TenantId, since: DateTime<Utc>) -> Result<UsageSummary>;

    /// Delete all events older than `before`, returning the number
    /// removed. Called by the external retention job, not by the
    /// request path.
    async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Health check for the audit log.
    async fn health_check(&self) -> Result<()>;
}

/// Time-series sink for per-decision analytics points.
#[async_trait::async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Record one analytics point. Best-effort; callers may drop errors.
    async fn record(&self, point: &AnalyticsPoint) -> Result<()>;

    /// Health check for the analytics sink.
    async fn health_check(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Composite Stores struct
// ---------------------------------------------------------------------------

/// Composite handle bundling the gateway's external collaborators.
///
/// Consumers receive a single `Stores` value instead of managing four
/// separate `Arc<dyn …>` handles.
#[derive(Clone)]
pub struct Stores {
    /// Tenant store (credential → tenant).
    pub tenants: Arc<dyn TenantStore>,
    /// Key-value store (rate-limit counters, IP blocklist).
    pub kv: Arc<dyn KeyValueStore>,
    /// Durable audit log.
    pub audit: Arc<dyn AuditLog>,
    /// Analytics time-series sink.
    pub analytics: Arc<dyn AnalyticsSink>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
