use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;

use super::{CacheResult, Counter, KvStore};

/// INCR and PEXPIRE in one round trip. Also repairs a counter that somehow
/// lost its TTL, so no key can become permanent.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if current == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

/// Keys examined per SCAN round trip in `delete_pattern`.
const SCAN_BATCH: u64 = 500;

/// `KvStore` backed by a pooled Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    increment: Script,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `url` - A `redis://` URL.
    ///
    /// # Returns
    ///
    /// A `CacheResult` containing the `RedisStore`.
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_manager(conn))
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            increment: Script::new(INCREMENT_SCRIPT),
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!("🧹 Deleted {} keys matching {}", deleted, pattern);
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn increment(&self, key: &str, window: Duration) -> CacheResult<Counter> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis().max(1) as u64;
        let (count, ttl_ms): (i64, i64) = self
            .increment
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(Counter {
            count: count.max(0) as u64,
            ttl: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }
}
