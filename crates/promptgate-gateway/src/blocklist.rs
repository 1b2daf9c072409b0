//! Global IP blocklist gate.
//!
//! Checks a source IP against a shared deny-set in the [`KeyValueStore`],
//! keyed `block:ip:{ip}`. A positive match short-circuits the whole
//! inspection pipeline before any content is looked at.
//!
//! Entries are written by external tooling (abuse response, seeding
//! scripts); the gateway itself only reads them at request time. The
//! `block`/`unblock` helpers exist for that tooling and for tests.

use promptgate_core::{KeyValueStore, Result};
use std::sync::Arc;
use std::time::Duration;

/// Marker value stored for a blocked IP.
const BLOCK_MARKER: &[u8] = b"1";

/// Read gate over the shared IP deny-set.
pub struct BlocklistGate {
    kv: Arc<dyn KeyValueStore>,
}

impl BlocklistGate {
    /// Create a gate over the given store backend.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Deny-set key for an IP literal.
    fn block_key(ip: &str) -> String {
        format!("block:ip:{ip}")
    }

    /// Whether the source IP is on the deny-set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn is_blocked(&self, ip: &str) -> Result<bool> {
        Ok(self.kv.get(&Self::block_key(ip)).await?.is_some())
    }

    /// Add an IP to the deny-set for `ttl`.
    pub async fn block(&self, ip: &str, ttl: Duration) -> Result<()> {
        self.kv.set(&Self::block_key(ip), BLOCK_MARKER, ttl).await
    }

    /// Remove an IP from the deny-set.
    pub async fn unblock(&self, ip: &str) -> Result<()> {
        self.kv.delete(&Self::block_key(ip)).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
