//! Result cache and build locks for chapter translations.
//!
//! Both sit on the same key-value store but are logically independent: the
//! cache holds serialized chapter results under `scanlate:result:` for 30
//! days, while locks live under `scanlate:lock:` and guarantee at most one
//! in-flight build per fingerprint (when callers honor them). The store is
//! abstracted behind [`KvStore`] with Redis and in-memory implementations,
//! so tests and single-process runs need no external service.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::sync::Arc;

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::translator::TranslationBackend;

/// Key prefix for cached chapter results.
const RESULT_PREFIX: &str = "scanlate:result:";
/// Key prefix for build locks.
const LOCK_PREFIX: &str = "scanlate:lock:";

/// Errors from the backing key-value store.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv connection error: {0}")]
    Connection(String),
    #[error("kv operation error: {0}")]
    Operation(String),
}

pub type KvResult<T> = std::result::Result<T, KvError>;

/// Minimal key-value contract the cache and lock need:
/// `GET`, `SETEX`, `SET NX EX`, `DEL`, and `KEYS` for invalidation sweeps.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<()>;
    /// Conditional set: succeeds only if the key is absent. Returns whether
    /// the value was written.
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> KvResult<bool>;
    async fn del(&self, key: &str) -> KvResult<()>;
    async fn keys(&self, pattern: &str) -> KvResult<Vec<String>>;
}

/// Identifies one build of a chapter translation. Used as both cache key
/// and lock key (under separate prefixes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub chapter_url: String,
    pub target_lang: String,
    pub backend: TranslationBackend,
    pub mode: String,
}

impl Fingerprint {
    pub fn new(
        chapter_url: &str,
        target_lang: &str,
        backend: TranslationBackend,
        mode: &str,
    ) -> Self {
        Self {
            chapter_url: chapter_url.to_string(),
            target_lang: target_lang.to_string(),
            backend,
            mode: mode.to_string(),
        }
    }

    /// Stable digest of the fingerprint tuple.
    fn digest(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!(
            "{}|{}|{}|{}",
            self.chapter_url,
            self.target_lang,
            self.backend as u8,
            self.mode
        ));
        hex::encode(hasher.finalize())
    }

    fn result_key(&self) -> String {
        format!("{RESULT_PREFIX}{}", self.digest())
    }

    fn lock_key(&self) -> String {
        format!("{LOCK_PREFIX}{}", self.digest())
    }
}

/// Cache of finished chapter results. Reads are non-blocking and store
/// errors degrade to misses; writes are last-writer-wins.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Fetch a cached result, treating any store failure as a miss.
    pub async fn get<T: DeserializeOwned>(&self, fingerprint: &Fingerprint) -> Option<T> {
        let key = fingerprint.result_key();
        match self.store.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    info!("cache hit for {}", fingerprint.chapter_url);
                    Some(value)
                }
                Err(e) => {
                    warn!("discarding undecodable cache entry {key}: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("cache read failed, treating as miss: {e}");
                None
            }
        }
    }

    /// Store a finished result. Failures are logged, never surfaced: the
    /// result is already in hand and the job must not fail over caching.
    pub async fn put<T: Serialize>(&self, fingerprint: &Fingerprint, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to serialize result for cache: {e}");
                return;
            }
        };
        let key = fingerprint.result_key();
        if let Err(e) = self.store.set_ex(&key, &bytes, self.ttl_secs).await {
            warn!("cache write failed for {}: {e}", fingerprint.chapter_url);
        } else {
            info!("cached result for {}", fingerprint.chapter_url);
        }
    }

    /// Drop the cached result for one fingerprint.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        if let Err(e) = self.store.del(&fingerprint.result_key()).await {
            warn!("cache invalidation failed: {e}");
        }
    }

    /// Drop every variant (backend x mode) of a chapter/language pair.
    /// Used by the publisher after replacing a translation.
    pub async fn invalidate_variants(&self, chapter_url: &str, target_lang: &str) {
        for backend in [TranslationBackend::Llm, TranslationBackend::Mt] {
            for mode in ["clean", "overlay"] {
                let fp = Fingerprint::new(chapter_url, target_lang, backend, mode);
                self.invalidate(&fp).await;
            }
        }
        debug!("invalidated cache variants for {chapter_url} -> {target_lang}");
    }
}

/// Mutex per fingerprint, implemented as a conditional set with TTL.
/// The TTL is the liveness guarantee: a crashed worker's lock expires and
/// another build can take over.
#[derive(Clone)]
pub struct BuildLock {
    store: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl BuildLock {
    pub fn new(store: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Try to take the lock. Returns `true` when this caller won it.
    /// Store errors fail open: a broken lock service must not halt builds.
    pub async fn acquire(&self, fingerprint: &Fingerprint) -> bool {
        let key = fingerprint.lock_key();
        match self.store.set_nx_ex(&key, b"locked", self.ttl_secs).await {
            Ok(true) => {
                info!("acquired build lock for {}", fingerprint.chapter_url);
                true
            }
            Ok(false) => {
                warn!(
                    "build already in progress for {}",
                    fingerprint.chapter_url
                );
                false
            }
            Err(e) => {
                warn!("lock acquire failed, proceeding unlocked: {e}");
                true
            }
        }
    }

    /// Check whether a build currently holds the lock.
    pub async fn is_held(&self, fingerprint: &Fingerprint) -> bool {
        matches!(self.store.get(&fingerprint.lock_key()).await, Ok(Some(_)))
    }

    /// Release unconditionally. Called on both success and failure paths.
    pub async fn release(&self, fingerprint: &Fingerprint) {
        if let Err(e) = self.store.del(&fingerprint.lock_key()).await {
            warn!("lock release failed for {}: {e}", fingerprint.chapter_url);
        } else {
            debug!("released build lock for {}", fingerprint.chapter_url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(url: &str) -> Fingerprint {
        Fingerprint::new(url, "tr", TranslationBackend::Llm, "clean")
    }

    #[test]
    fn test_fingerprint_digest_stable() {
        let a = fp("https://example.com/chapter-1");
        let b = fp("https://example.com/chapter-1");
        assert_eq!(a.result_key(), b.result_key());
        assert_eq!(a.lock_key(), b.lock_key());
        assert_ne!(a.result_key(), a.lock_key());
    }

    #[test]
    fn test_fingerprint_distinguishes_backend_and_mode() {
        let base = fp("https://example.com/chapter-1");
        let other_backend =
            Fingerprint::new("https://example.com/chapter-1", "tr", TranslationBackend::Mt, "clean");
        let other_mode =
            Fingerprint::new("https://example.com/chapter-1", "tr", TranslationBackend::Llm, "overlay");
        assert_ne!(base.result_key(), other_backend.result_key());
        assert_ne!(base.result_key(), other_mode.result_key());
    }

    #[tokio::test]
    async fn test_cache_roundtrip_and_miss() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResultCache::new(store, 60);
        let key = fp("https://example.com/chapter-2");

        let miss: Option<Vec<String>> = cache.get(&key).await;
        assert!(miss.is_none());

        let value = vec!["a".to_string(), "b".to_string()];
        cache.put(&key, &value).await;
        let hit: Option<Vec<String>> = cache.get(&key).await;
        assert_eq!(hit, Some(value));

        cache.invalidate(&key).await;
        let gone: Option<Vec<String>> = cache.get(&key).await;
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_lock_mutual_exclusion() {
        let store = Arc::new(MemoryStore::new());
        let lock = BuildLock::new(store, 60);
        let key = fp("https://example.com/chapter-3");

        assert!(lock.acquire(&key).await);
        assert!(lock.is_held(&key).await);
        // Second acquire on the same fingerprint loses
        assert!(!lock.acquire(&key).await);

        lock.release(&key).await;
        assert!(!lock.is_held(&key).await);
        assert!(lock.acquire(&key).await);
    }
}
