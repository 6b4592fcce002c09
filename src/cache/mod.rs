//! Cache contract, TTL tiers and the wrappers that keep cache trouble away
//! from correctness. Storage is always the system of record.

mod breaker;
mod memory;
mod resilient;

pub use breaker::{BreakerState, CircuitBreaker};
pub use memory::InMemoryCache;
pub use resilient::ResilientCache;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::limits::{TTL_COLD_SECS, TTL_HOT_SECS, TTL_STATIC_SECS, TTL_WARM_SECS};
use crate::model::WeekView;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache payload error: {0}")]
    Serialization(String),

    #[error("circuit breaker open")]
    CircuitOpen,
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Named expiration class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    Hot,
    Warm,
    Cold,
    Static,
}

impl CacheTier {
    pub fn ttl(self) -> Duration {
        Duration::from_secs(match self {
            CacheTier::Hot => TTL_HOT_SECS,
            CacheTier::Warm => TTL_WARM_SECS,
            CacheTier::Cold => TTL_COLD_SECS,
            CacheTier::Static => TTL_STATIC_SECS,
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            CacheTier::Hot => "hot",
            CacheTier::Warm => "warm",
            CacheTier::Cold => "cold",
            CacheTier::Static => "static",
        }
    }
}

#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, tier: CacheTier) -> Result<(), CacheError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete every key matching `pattern`; a trailing `*` matches any suffix.
    /// Returns how many keys were removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError>;
}

// ── Keys ──────────────────────────────────────────────────────────

pub fn week_key(instructor_id: Ulid, week_start: NaiveDate) -> String {
    format!("avail:{instructor_id}:week:{week_start}")
}

/// Pattern covering every key cached for one instructor.
pub fn instructor_namespace(instructor_id: Ulid) -> String {
    format!("avail:{instructor_id}:*")
}

// ── Capabilities ──────────────────────────────────────────────────

/// A value that knows its own cache key.
pub trait Identifiable {
    fn cache_key(&self) -> String;
}

/// A value with an explicit cache wire form.
pub trait CacheSerializable: Sized {
    fn to_cache_bytes(&self) -> Result<Vec<u8>, CacheError>;
    fn from_cache_bytes(bytes: &[u8]) -> Result<Self, CacheError>;
}

impl Identifiable for WeekView {
    fn cache_key(&self) -> String {
        week_key(self.instructor_id, self.week_start)
    }
}

impl CacheSerializable for WeekView {
    fn to_cache_bytes(&self) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_cache_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
