//! Key-value cache with per-key TTL.
//!
//! Holds the latest vendor payload per sensor (`sensor:{id}`) and generated
//! summaries (`summary:{id}`). Values are opaque strings; callers store JSON.
//! Writes are last-writer-wins per key. Absence means "unavailable".
//!
//! Two backends:
//! - [`RedisCache`] for shared deployments (`SET key value EX ttl`).
//! - [`MemoryCache`] for single-process runs and tests. Expiry is lazy: an
//!   expired entry is dropped the next time its key is read or written.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{sync::RwLock, time::Instant};

use crate::error::CacheError;

// ---

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Overwrite `key` with `value`, expiring after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Current value, or `None` when missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Set only when no live value exists. Returns whether this call wrote it.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration)
        -> Result<bool, CacheError>;
}

/// Serialize `value` as JSON and store it.
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    // ---
    let body = serde_json::to_string(value)?;
    cache.set(key, body, ttl).await
}

/// Read a JSON value back.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    // ---
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

// ---

/// Redis-backed cache shared by every worker and reader.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        // ---
        let client = Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisCache { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        // ---
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        // ---
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        // ---
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

// ---

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process cache with lazy TTL eviction.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        // ---
        let expires_at = Instant::now() + ttl;
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        // ---
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        // ---
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::{json, Value};

    const TTL: Duration = Duration::from_secs(1500);

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        // ---
        let cache = MemoryCache::new();
        cache.set("sensor:s1", "{}".into(), TTL).await.unwrap();

        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert_eq!(cache.get("sensor:s1").await.unwrap().as_deref(), Some("{}"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("sensor:s1").await.unwrap(), None);

        // evicted on read
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_resets_ttl() {
        // ---
        let cache = MemoryCache::new();
        cache.set("sensor:s1", "1".into(), TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(1000)).await;
        cache.set("sensor:s1", "2".into(), TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(1000)).await;

        assert_eq!(cache.get("sensor:s1").await.unwrap().as_deref(), Some("2"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent() {
        // ---
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        assert!(cache.set_if_absent("guard", "a".into(), ttl).await.unwrap());
        assert!(!cache.set_if_absent("guard", "b".into(), ttl).await.unwrap());
        assert_eq!(cache.get("guard").await.unwrap().as_deref(), Some("a"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.set_if_absent("guard", "c".into(), ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        // ---
        let cache = MemoryCache::new();
        let payload = json!({"t": 20, "readings": [1, 2, 3]});
        set_json(&cache, "sensor:s1", &payload, TTL).await.unwrap();

        let back: Option<Value> = get_json(&cache, "sensor:s1").await.unwrap();
        assert_eq!(back, Some(payload));

        let missing: Option<Value> = get_json(&cache, "sensor:nope").await.unwrap();
        assert!(missing.is_none());
    }
}
