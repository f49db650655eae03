use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::services::cache::client::{CacheResult, CredentialCache};
use crate::services::credentials::DerivedCredentials;

struct Entry {
    value: Arc<DerivedCredentials>,
    valid_until: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until && !self.value.is_expired(now)
    }
}

/// In-process credential cache.
///
/// Reads share the lock; inserts and evictions take it exclusively. Expired
/// entries are dropped lazily on lookup or by `purge_expired`.
#[derive(Default)]
pub struct MemoryCredentialCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialCache for MemoryCredentialCache {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> CacheResult<Option<Arc<DerivedCredentials>>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Stale: evict unless someone refreshed it in between.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn insert(
        &self,
        key: &str,
        value: Arc<DerivedCredentials>,
        valid_until: DateTime<Utc>,
    ) -> CacheResult<()> {
        let valid_until = valid_until.min(value.expires_at());
        self.entries
            .write()
            .await
            .insert(key.to_owned(), Entry { value, valid_until });
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }

    async fn live_keys(&self, now: DateTime<Utc>) -> CacheResult<Vec<String>> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::services::credentials::test_support::assumed_credentials;

    #[tokio::test]
    async fn returns_live_entries_only() {
        let cache = MemoryCredentialCache::new();
        let now = Utc::now();
        let creds = Arc::new(assumed_credentials("roleA", now + Duration::hours(1)));

        cache
            .insert("roleA", creds, now + Duration::minutes(30))
            .await
            .unwrap();

        assert!(cache.get("roleA", now).await.unwrap().is_some());
        assert!(
            cache
                .get("roleA", now + Duration::minutes(31))
                .await
                .unwrap()
                .is_none()
        );
        // Lazily evicted on the stale lookup above.
        assert!(cache.live_keys(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entry_never_outlives_the_credential() {
        let cache = MemoryCredentialCache::new();
        let now = Utc::now();
        let creds = Arc::new(assumed_credentials("roleA", now + Duration::minutes(5)));

        cache
            .insert("roleA", creds, now + Duration::hours(2))
            .await
            .unwrap();

        assert!(
            cache
                .get("roleA", now + Duration::minutes(6))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn purge_drops_only_stale_entries() {
        let cache = MemoryCredentialCache::new();
        let now = Utc::now();

        for (role, minutes) in [("a", 1), ("b", 10), ("c", 20)] {
            let creds = Arc::new(assumed_credentials(role, now + Duration::hours(1)));
            cache
                .insert(role, creds, now + Duration::minutes(minutes))
                .await
                .unwrap();
        }

        let removed = cache.purge_expired(now + Duration::minutes(5)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.live_keys(now).await.unwrap(), vec!["b", "c"]);
    }
}
