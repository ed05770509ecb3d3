//! Key-value backing store shared by sessions, rate limiting, the response
//! cache and the character catalog.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Namespaces owned by the components that write into the store.
pub mod keys {
    pub const SESSION: &str = "session";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const AI_RESPONSE: &str = "ai_response";
    pub const CHARACTER: &str = "character";
}

/// Errors raised by a key-value backend.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Result of an atomic increment: the post-increment count and the time left
/// until the counter expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    pub ttl: Duration,
}

/// Opaque string store with expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Deletes every key matching a glob pattern (`*` and `?`), returning how many went away.
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Increments `key` and, when this call created it, sets its expiry to `window`.
    ///
    /// Must be a single atomic operation: a counter can never exist without an expiry.
    async fn increment(&self, key: &str, window: Duration) -> CacheResult<Counter>;
}
