//! Redis-backed key-value store for the result cache and build locks.
//!
//! Uses a `ConnectionManager` so clones share one multiplexed connection
//! and reconnects are handled transparently.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{KvError, KvResult, KvStore};

/// Redis store; cheap to clone.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at the given URL (e.g. "redis://localhost:6379").
    pub async fn connect(redis_url: &str) -> KvResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| KvError::Connection(format!("redis client error: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Connection(format!("redis connection error: {e}")))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<bool> {
        let mut conn = self.conn.clone();
        // SET key value NX EX ttl -- nil reply means the key already existed
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))
    }

    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Operation(e.to_string()))
    }
}
