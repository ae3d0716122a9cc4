//! In-memory key-value store with expiry.
//!
//! Single-process stand-in for Redis: used in tests and when no cache
//! service is configured. Expiry is checked lazily on access.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{KvResult, KvStore};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// HashMap-backed store guarded by a mutex.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ttl_deadline(ttl_secs: u64) -> Option<Instant> {
        (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        if let Some(entry) = entries.get(key) {
            if entry.is_expired() {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<()> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Self::ttl_deadline(ttl_secs),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<bool> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        let occupied = entries.get(key).is_some_and(|e| !e.is_expired());
        if occupied {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Self::ttl_deadline(ttl_secs),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut entries = self.entries.lock().expect("memory store poisoned");
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>> {
        let entries = self.entries.lock().expect("memory store poisoned");
        // Only trailing-star globs are needed by callers
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
