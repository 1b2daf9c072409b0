//! SQLite storage backends via `sqlx`.
//!
//! The `lite` profile: tenants and audit events in a single SQLite file.
//! Tables are created on construction if they do not exist. Audit events
//! are stored column-per-field so rollups run as SQL aggregates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promptgate_core::{
    AuditEvent, AuditLog, GatewayError, Result, Tenant, TenantId, TenantStore, UsageSummary,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Open a SQLite connection pool for the given database URL.
///
/// An in-memory database exists per connection, so `:memory:` URLs are
/// pinned to a single pooled connection.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = if database_url.contains(":memory:") {
        SqlitePoolOptions::new().max_connections(1)
    } else {
        SqlitePoolOptions::new()
    };
    options
        .connect(database_url)
        .await
        .map_err(|e| GatewayError::Dependency(format!("Failed to open SQLite database: {e}")))
}

fn db_err(context: &str, e: sqlx::Error) -> GatewayError {
    GatewayError::Dependency(format!("{context}: {e}"))
}

fn decode_err(context: &str, detail: impl std::fmt::Display) -> GatewayError {
    GatewayError::Internal(format!("{context}: {detail}"))
}

// ===========================================================================
// SqliteTenantStore
// ===========================================================================

/// SQLite-backed tenant store.
pub struct SqliteTenantStore {
    pool: SqlitePool,
}

impl SqliteTenantStore {
    /// Create the store, bootstrapping its table if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be created.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id TEXT PRIMARY KEY,
                identity TEXT NOT NULL,
                tier TEXT NOT NULL,
                api_key TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| db_err("Failed to create tenants table", e))?;

        Ok(Self { pool })
    }

    fn row_to_tenant(row: &sqlx::sqlite::SqliteRow) -> Result<Tenant> {
        let id: String = row.get("id");
        let tier: String = row.get("tier");
        let created_at: String = row.get("created_at");

        Ok(Tenant {
            id: TenantId(
                Uuid::parse_str(&id).map_err(|e| decode_err("Invalid tenant id", e))?,
            ),
            identity: row.get("identity"),
            tier: tier
                .parse()
                .map_err(|e| decode_err("Invalid tenant tier", e))?,
            api_key: row.get("api_key"),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| decode_err("Invalid tenant created_at", e))?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl TenantStore for SqliteTenantStore {
    async fn get_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT id, identity, tier, api_key, created_at FROM tenants WHERE api_key = ?1",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to look up tenant", e))?;

        row.as_ref().map(Self::row_to_tenant).transpose()
    }

    async fn create(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenants (id, identity, tier, api_key, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(tenant.id.0.to_string())
        .bind(&tenant.identity)
        .bind(tenant.tier.to_string())
        .bind(&tenant.api_key)
        .bind(tenant.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert tenant", e))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("Tenant store health check failed", e))?;
        Ok(())
    }
}

// ===========================================================================
// SqliteAuditLog
// ===========================================================================

/// SQLite-backed audit log.
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    /// Create the log, bootstrapping its table and index if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the table or index cannot be created.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                category TEXT NOT NULL,
                severity TEXT NOT NULL,
                source_ip TEXT NOT NULL,
                decision TEXT NOT NULL,
                confidence REAL NOT NULL,
                engine TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                content_preview TEXT NOT NULL,
                reason TEXT,
                timestamp_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| db_err("Failed to create audit_events table", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_tenant_time \
             ON audit_events (tenant_id, timestamp_ms)",
        )
        .execute(&pool)
        .await
        .map_err(|e| db_err("Failed to create audit index", e))?;

        Ok(Self { pool })
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent> {
        let id: String = row.get("id");
        let tenant_id: String = row.get("tenant_id");
        let severity: String = row.get("severity");
        let decision: String = row.get("decision");
        let engine: String = row.get("engine");
        let latency_ms: i64 = row.get("latency_ms");
        let timestamp_ms: i64 = row.get("timestamp_ms");

        Ok(AuditEvent {
            id: Uuid::parse_str(&id).map_err(|e| decode_err("Invalid event id", e))?,
            tenant_id: TenantId(
                Uuid::parse_str(&tenant_id).map_err(|e| decode_err("Invalid tenant id", e))?,
            ),
            category: row.get("category"),
            severity: severity
                .parse()
                .map_err(|e| decode_err("Invalid severity", e))?,
            source_ip: row.get("source_ip"),
            decision: decision
                .parse()
                .map_err(|e| decode_err("Invalid decision", e))?,
            confidence: row.get("confidence"),
            engine: engine.parse().map_err(|e| decode_err("Invalid engine", e))?,
            latency_ms: latency_ms as u64,
            content_hash: row.get("content_hash"),
            content_preview: row.get("content_preview"),
            reason: row.get("reason"),
            timestamp: DateTime::from_timestamp_millis(timestamp_ms)
                .ok_or_else(|| decode_err("Invalid timestamp", timestamp_ms))?,
        })
    }
}

#[async_trait]
impl AuditLog for SqliteAuditLog {
    async fn append(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_events \
             (id, tenant_id, category, severity, source_ip, decision, confidence, engine, \
              latency_ms, content_hash, content_preview, reason, timestamp_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(event.id.to_string())
        .bind(event.tenant_id.0.to_string())
        .bind(&event.category)
        .bind(event.severity.to_string())
        .bind(&event.source_ip)
        .bind(event.decision.to_string())
        .bind(event.confidence)
        .bind(event.engine.to_string())
        .bind(event.latency_ms as i64)
        .bind(&event.content_hash)
        .bind(&event.content_preview)
        .bind(&event.reason)
        .bind(event.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert audit event", e))?;

        Ok(())
    }

    async fn recent(&self, tenant_id: TenantId, limit: u32) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_events WHERE tenant_id = ?1 \
             ORDER BY timestamp_ms DESC LIMIT ?2",
        )
        .bind(tenant_id.0.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to query audit events", e))?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn summarize(&self, tenant_id: TenantId, since: DateTime<Utc>) -> Result<UsageSummary> {
        let row = sqlx::query(
            "SELECT \
               COUNT(*) AS total, \
               SUM(CASE WHEN decision = 'blocked' THEN 1 ELSE 0 END) AS blocked, \
               AVG(latency_ms) AS avg_latency \
             FROM audit_events \
             WHERE tenant_id = ?1 AND timestamp_ms >= ?2",
        )
        .bind(tenant_id.0.to_string())
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to summarize audit events", e))?;

        let total: i64 = row.get("total");
        let blocked: Option<i64> = row.get("blocked");
        let avg_latency: Option<f64> = row.get("avg_latency");

        Ok(UsageSummary {
            total: total as u64,
            blocked: blocked.unwrap_or(0) as u64,
            avg_latency_ms: avg_latency.unwrap_or(0.0),
        })
    }

    async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_events WHERE timestamp_ms < ?1")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("Failed to purge audit events", e))?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("Audit log health check failed", e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
