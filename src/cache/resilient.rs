use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{CacheClient, CacheError, CacheSerializable, CacheTier, CircuitBreaker, Identifiable};
use crate::observability::{
    CACHE_ERRORS_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_SHORT_CIRCUITS_TOTAL,
};

/// Wraps a [`CacheClient`] in a circuit breaker. Every failure degrades to a
/// miss or a no-op; nothing here returns an error.
pub struct ResilientCache {
    client: Arc<dyn CacheClient>,
    breaker: CircuitBreaker,
}

impl ResilientCache {
    pub fn new(client: Arc<dyn CacheClient>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            client,
            breaker: CircuitBreaker::new(failure_threshold, cooldown),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn admit(&self, op: &'static str) -> bool {
        if self.breaker.try_acquire() {
            return true;
        }
        metrics::counter!(CACHE_SHORT_CIRCUITS_TOTAL, "op" => op).increment(1);
        debug!("cache {op} skipped: {}", CacheError::CircuitOpen);
        false
    }

    fn observe<T>(&self, op: &'static str, key: &str, result: Result<T, CacheError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.breaker.record_success();
                Some(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                metrics::counter!(CACHE_ERRORS_TOTAL, "op" => op).increment(1);
                warn!("cache {op} {key} failed: {e}");
                None
            }
        }
    }

    pub async fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        if !self.admit("get") {
            return None;
        }
        let result = self.client.get(key).await;
        let hit = self.observe("get", key, result).flatten();
        if hit.is_some() {
            metrics::counter!(CACHE_HITS_TOTAL).increment(1);
            debug!("cache hit {key}");
        } else {
            metrics::counter!(CACHE_MISSES_TOTAL).increment(1);
            debug!("cache miss {key}");
        }
        hit
    }

    /// Typed read. An undecodable payload counts as a miss.
    pub async fn get<T: CacheSerializable>(&self, key: &str) -> Option<T> {
        let bytes = self.get_bytes(key).await?;
        match T::from_cache_bytes(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("discarding cached {key}: {e}");
                None
            }
        }
    }

    /// Returns whether the value was stored.
    pub async fn set<T: CacheSerializable>(&self, key: &str, value: &T, tier: CacheTier) -> bool {
        let bytes = match value.to_cache_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("cannot encode {key} for cache: {e}");
                return false;
            }
        };
        if !self.admit("set") {
            return false;
        }
        let result = self.client.set(key, bytes, tier).await;
        let stored = self.observe("set", key, result).is_some();
        if stored {
            debug!("cached {key} ({})", tier.label());
        }
        stored
    }

    pub async fn put<T: Identifiable + CacheSerializable>(&self, value: &T, tier: CacheTier) -> bool {
        self.set(&value.cache_key(), value, tier).await
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.admit("delete") {
            return false;
        }
        let result = self.client.delete(key).await;
        self.observe("delete", key, result).unwrap_or(false)
    }

    /// Returns how many keys were removed; 0 when the cache is unreachable.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        if !self.admit("delete_pattern") {
            return 0;
        }
        let result = self.client.delete_pattern(pattern).await;
        self.observe("delete_pattern", pattern, result).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BreakerState, InMemoryCache};
    use crate::model::WeekView;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn week() -> WeekView {
        WeekView::empty(Ulid::new(), NaiveDate::from_ymd_opt(2025, 7, 14).unwrap())
    }

    #[tokio::test]
    async fn typed_round_trip() {
        let inner = Arc::new(InMemoryCache::new());
        let cache = ResilientCache::new(inner.clone(), 5, Duration::from_secs(60));
        let w = week();

        assert!(cache.put(&w, CacheTier::Hot).await);
        assert_eq!(cache.get::<WeekView>(&w.cache_key()).await, Some(w.clone()));
        assert!(cache.delete(&w.cache_key()).await);
        assert_eq!(cache.get::<WeekView>(&w.cache_key()).await, None);
    }

    #[tokio::test]
    async fn garbage_payload_is_a_miss() {
        let inner = Arc::new(InMemoryCache::new());
        inner.set("k", b"{".to_vec(), CacheTier::Hot).await.unwrap();
        let cache = ResilientCache::new(inner, 5, Duration::from_secs(60));
        assert_eq!(cache.get::<WeekView>("k").await, None);
        assert_eq!(cache.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn outage_degrades_then_opens_breaker() {
        let inner = Arc::new(InMemoryCache::new());
        let cache = ResilientCache::new(inner.clone(), 2, Duration::from_secs(60));
        inner.set_available(false);

        let w = week();
        assert!(!cache.put(&w, CacheTier::Hot).await);
        assert_eq!(cache.get::<WeekView>(&w.cache_key()).await, None);
        assert_eq!(cache.breaker().state(), BreakerState::Open);

        // Recovered backend is not consulted until the cooldown passes
        inner.set_available(true);
        assert!(!cache.put(&w, CacheTier::Hot).await);
        assert_eq!(cache.invalidate("avail:*").await, 0);
        assert!(inner.is_empty());
    }
}
