//! Storage backends for PromptGate
//!
//! Implements the collaborator traits from `promptgate-core` against two
//! profiles:
//!
//! - **memory** — everything in-process (`DashMap` / `RwLock`). Dev and
//!   test profile; data is lost on restart.
//! - **lite** — tenants and audit events in SQLite via `sqlx`; the
//!   key-value store and analytics sink stay in-memory. Single-node
//!   deployments.
//!
//! Production deployments substitute shared services (a managed tenant
//! database, a distributed key-value store, a durable log queue) behind
//! the same traits; the gateway only ever issues the calls defined there.

pub mod memory;
pub mod sqlite;

pub use memory::{
    InMemoryAnalyticsSink, InMemoryAuditLog, InMemoryKeyValueStore, InMemoryTenantStore,
};
pub use sqlite::{SqliteAuditLog, SqliteTenantStore};

use promptgate_core::{GatewayError, Result, StorageConfig, Stores};
use std::sync::Arc;

/// Storage profile selecting which backends a [`Stores`] bundle uses.
pub enum StorageProfile {
    /// Everything in-memory.
    Memory,
    /// SQLite-backed tenants and audit log.
    Lite {
        /// SQLx database URL (e.g. `sqlite:promptgate.db?mode=rwc`).
        database_url: String,
    },
}

impl StorageProfile {
    /// Resolve a profile from the gateway's storage configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown profile name.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.profile.as_str() {
            "memory" => Ok(Self::Memory),
            "lite" => Ok(Self::Lite {
                database_url: format!("sqlite:{}?mode=rwc", config.database_path),
            }),
            other => Err(GatewayError::Config(format!(
                "unknown storage profile: {other}"
            ))),
        }
    }

    /// Build the [`Stores`] bundle for this profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQLite database cannot be opened or its
    /// tables cannot be created.
    pub async fn build(&self) -> Result<Stores> {
        match self {
            Self::Memory => Ok(Stores {
                tenants: Arc::new(InMemoryTenantStore::new()),
                kv: Arc::new(InMemoryKeyValueStore::new()),
                audit: Arc::new(InMemoryAuditLog::new()),
                analytics: Arc::new(InMemoryAnalyticsSink::new()),
            }),
            Self::Lite { database_url } => {
                let pool = sqlite::connect(database_url).await?;
                Ok(Stores {
                    tenants: Arc::new(SqliteTenantStore::new(pool.clone()).await?),
                    kv: Arc::new(InMemoryKeyValueStore::new()),
                    audit: Arc::new(SqliteAuditLog::new(pool).await?),
                    analytics: Arc::new(InMemoryAnalyticsSink::new()),
                })
            }
        }
    }
}
