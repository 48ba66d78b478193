//! Key -> entry cache with file persistence and an optional Redis mirror.
//!
//! Readers clone an `Arc` out of the in-memory map and never see a partial
//! entry. A `put` serializes and persists the complete entry first, then
//! swaps it in; if the primary backend write fails the previous entry is
//! left untouched in memory and on disk.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub created_at: DateTime<Utc>,
    /// League (or other producer) that wrote the entry.
    pub source: String,
}

impl<T> CacheEntry<T> {
    pub fn age(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.created_at
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: ChronoDuration) -> bool {
        self.age(now) <= max_age
    }
}

/// Where serialized entries live between restarts.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn store(&self, key: &str, raw: &str) -> Result<()>;
}

/// One JSON file per key, replaced with write-to-temp + rename.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for a key. Anything outside `[A-Za-z0-9.-]` is hex-escaped as
    /// `_XX`, so distinct keys never share a file.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + 5);
        for b in key.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'.' {
                name.push(b as char);
            } else {
                name.push_str(&format!("_{:02X}", b));
            }
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, key: &str, raw: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let written = match tokio::fs::write(&tmp, raw).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // A partial write can leave the temp file behind too.
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", tmp.display(), cleanup);
                }
            }
            return Err(e.into());
        }
        Ok(())
    }
}

pub struct RedisBackend {
    conn: redis::aio::ConnectionManager,
    prefix: String,
}

impl RedisBackend {
    pub async fn connect_with_retry(url: &str, prefix: &str, max_retries: u32) -> anyhow::Result<Self> {
        let mut attempt = 0;
        loop {
            let result = match redis::Client::open(url) {
                Ok(client) => redis::aio::ConnectionManager::new(client).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(conn) => {
                    info!("Connected to Redis");
                    return Ok(Self {
                        conn,
                        prefix: prefix.to_string(),
                    });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(anyhow::anyhow!(
                            "Failed to connect to Redis after {} attempts: {}",
                            max_retries,
                            e
                        ));
                    }
                    warn!("Redis connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.redis_key(key))
            .await
            .map_err(|e| ServiceError::upstream("redis", e))?;
        Ok(raw)
    }

    async fn store(&self, key: &str, raw: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(self.redis_key(key), raw)
            .await
            .map_err(|e| ServiceError::upstream("redis", e))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub miss: u64,
    pub sets: u64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            miss: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
        }
    }
}

pub struct CacheStore<T> {
    entries: RwLock<HashMap<String, Arc<CacheEntry<T>>>>,
    /// First backend is authoritative; the rest are best-effort mirrors.
    backends: Vec<Arc<dyn CacheBackend>>,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
}

impl<T> CacheStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(backends: Vec<Arc<dyn CacheBackend>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            backends,
            clock,
            metrics: CacheMetrics::default(),
        }
    }

    /// Memory only, nothing survives a restart.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Vec::new(), clock)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry<T>>> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned();
        let counter = if found.is_some() {
            &self.metrics.hits
        } else {
            &self.metrics.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Replace the entry for `key`, stamped with the current clock.
    pub async fn put(&self, key: &str, payload: T, source: &str) -> Result<Arc<CacheEntry<T>>> {
        let entry = Arc::new(CacheEntry {
            payload,
            created_at: self.clock.now(),
            source: source.to_string(),
        });
        let raw = serde_json::to_string(&*entry)?;

        let mut backends = self.backends.iter();
        if let Some(primary) = backends.next() {
            primary.store(key, &raw).await?;
        }
        for mirror in backends {
            if let Err(e) = mirror.store(key, &raw).await {
                warn!("Cache mirror {} write for {} failed: {}", mirror.name(), key, e);
            }
        }

        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), entry.clone());
        self.metrics.sets.fetch_add(1, Ordering::Relaxed);
        debug!("Cached {} ({} bytes)", key, raw.len());
        Ok(entry)
    }

    /// Load a persisted entry into memory. Returns whether the key is now
    /// present. Unreadable payloads are logged and skipped.
    pub async fn hydrate(&self, key: &str) -> bool {
        if self
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(key)
        {
            return true;
        }

        for backend in &self.backends {
            let raw = match backend.load(key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Cache backend {} load for {} failed: {}", backend.name(), key, e);
                    continue;
                }
            };
            match serde_json::from_str::<CacheEntry<T>>(&raw) {
                Ok(entry) => {
                    info!(
                        "Restored {} from {} (written {})",
                        key,
                        backend.name(),
                        entry.created_at.to_rfc3339()
                    );
                    self.entries
                        .write()
                        .unwrap_or_else(|p| p.into_inner())
                        .insert(key.to_string(), Arc::new(entry));
                    return true;
                }
                Err(e) => warn!("Discarding unreadable cache entry {} from {}: {}", key, backend.name(), e),
            }
        }
        false
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}
