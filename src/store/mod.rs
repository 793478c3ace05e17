//! Key-value store port used for throttling counters and cached payloads.
//!
//! Nothing in here is authoritative business state: callers decide whether
//! a store error means "allow" (rate limiter) or "skip" (cache).

pub mod memory;
pub mod redis_store;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Returns the number of keys removed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Glob-style match; only `*` is interpreted.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn incr(&self, key: &str, delta: i64) -> Result<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Removes members with `min <= score <= max`.
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    async fn zcard(&self, key: &str) -> Result<u64>;

    async fn ping(&self) -> Result<()>;

    fn backend_name(&self) -> &str;
}

/// A store whose every call fails, for exercising degraded-backend branches.
#[cfg(test)]
pub(crate) struct UnavailableStore;

#[cfg(test)]
#[async_trait]
impl KvStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(unavailable())
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Err(unavailable())
    }

    async fn del(&self, _keys: &[String]) -> Result<u64> {
        Err(unavailable())
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>> {
        Err(unavailable())
    }

    async fn incr(&self, _key: &str, _delta: i64) -> Result<i64> {
        Err(unavailable())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<()> {
        Err(unavailable())
    }

    async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> Result<()> {
        Err(unavailable())
    }

    async fn zrem_range_by_score(&self, _key: &str, _min: f64, _max: f64) -> Result<u64> {
        Err(unavailable())
    }

    async fn zcard(&self, _key: &str) -> Result<u64> {
        Err(unavailable())
    }

    async fn ping(&self) -> Result<()> {
        Err(unavailable())
    }

    fn backend_name(&self) -> &str {
        "unavailable"
    }
}

#[cfg(test)]
fn unavailable() -> crate::error::AppError {
    crate::error::AppError::Store("connection refused".to_string())
}
