//! Credential cache interface used by the credential deriver.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::services::credentials::DerivedCredentials;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-layer errors.
///
/// Note:
/// - Kept independent from `CredentialError` so the deriver decides how to fail
///   (a broken cache degrades to a fresh exchange, it never blocks a request).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Credentials cache keyed by role identifier.
///
/// Every entry carries its own `valid_until`, which callers set no later than
/// the credential's expiry. Implementations must be safe for concurrent use.
#[async_trait]
pub trait CredentialCache: Send + Sync + 'static {
    // Returns the cache backend name (for logging/status).
    fn backend_name(&self) -> &'static str;

    // Returns the entry for `key` if it is still valid at `now`.
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> CacheResult<Option<Arc<DerivedCredentials>>>;

    // Stores `value` under `key` until `valid_until`, replacing any previous entry.
    async fn insert(
        &self,
        key: &str,
        value: Arc<DerivedCredentials>,
        valid_until: DateTime<Utc>,
    ) -> CacheResult<()>;

    // Drops every entry that is no longer valid at `now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<usize>;

    // Keys of entries still valid at `now`.
    async fn live_keys(&self, now: DateTime<Utc>) -> CacheResult<Vec<String>>;
}
