//! Two-tier response cache in front of the fetch pipeline.
//!
//! # Data Flow
//! ```text
//! lookup(key):  memory tier → disk tier → miss
//! store(entry): HTML → memory tier, everything else → disk tier
//! ```
//!
//! # Design Decisions
//! - Tiers are independent: a disk hit does not warm the memory tier
//! - Store failures are logged and swallowed; the response is still served
//! - Keys are the string form of the normalized target URL

pub mod disk;
pub mod memory;
pub mod sweeper;

pub use disk::{DiskCache, SweepReport};
pub use memory::MemoryCache;
pub use sweeper::DiskSweeper;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use thiserror::Error;

use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::rewrite::ContentKind;

/// Which backing store an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Memory,
    Disk,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Disk => "disk",
        }
    }
}

/// A cached, already rewritten response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// String form of the target reference.
    pub key: String,
    pub payload: Bytes,
    pub content_type: String,
    pub status: StatusCode,
    /// Client-facing upstream headers, already filtered and rewritten.
    pub headers: HeaderMap,
    pub stored_at: SystemTime,
    pub tier: Tier,
}

impl CacheEntry {
    /// Build an entry, choosing its tier from the content type.
    pub fn new(key: impl Into<String>, payload: Bytes, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        let tier = match ContentKind::from_content_type(&content_type) {
            ContentKind::Html => Tier::Memory,
            _ => Tier::Disk,
        };
        Self {
            key: key.into(),
            payload,
            content_type,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            stored_at: SystemTime::now(),
            tier,
        }
    }

    /// Keep the upstream status and headers to replay on a hit.
    pub fn with_response(mut self, status: StatusCode, headers: HeaderMap) -> Self {
        self.status = status;
        self.headers = headers;
        self
    }
}

/// Errors from the disk tier.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing a cache file failed.
    #[error("cache I/O on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A sidecar could not be serialized.
    #[error("cache metadata {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The response cache shared by all request handlers.
pub struct CacheService {
    memory: Option<MemoryCache>,
    disk: Option<Arc<DiskCache>>,
}

impl CacheService {
    /// Build the configured tiers. The disk tier is scanned before returning.
    pub async fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        let memory = config
            .memory
            .enabled
            .then(|| MemoryCache::new(config.memory.capacity, config.memory.ttl()));

        let disk = if config.disk.enabled {
            Some(Arc::new(DiskCache::open(&config.disk).await?))
        } else {
            None
        };

        tracing::info!(
            memory = memory.is_some(),
            disk = disk.is_some(),
            "Response cache ready"
        );
        Ok(Self { memory, disk })
    }

    /// A cache with both tiers switched off.
    pub fn disabled() -> Self {
        Self {
            memory: None,
            disk: None,
        }
    }

    pub fn memory(&self) -> Option<&MemoryCache> {
        self.memory.as_ref()
    }

    pub fn disk(&self) -> Option<&Arc<DiskCache>> {
        self.disk.as_ref()
    }

    /// Look `key` up in the memory tier, then on disk.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        if let Some(memory) = &self.memory {
            if let Some(entry) = memory.get(key) {
                metrics::record_cache_event(Tier::Memory, "hit");
                return Some(entry);
            }
            metrics::record_cache_event(Tier::Memory, "miss");
        }

        if let Some(disk) = &self.disk {
            match disk.get(key).await {
                Ok(Some(entry)) => {
                    metrics::record_cache_event(Tier::Disk, "hit");
                    return Some(entry);
                }
                Ok(None) => metrics::record_cache_event(Tier::Disk, "miss"),
                Err(e) => {
                    metrics::record_cache_event(Tier::Disk, "error");
                    tracing::warn!(key = %key, error = %e, "Disk cache read failed, treating as miss");
                }
            }
        }

        None
    }

    /// Store `entry` in the tier it designates. Returns whether it was stored.
    ///
    /// Failures are logged and never reach the caller.
    pub async fn store(&self, entry: CacheEntry) -> bool {
        match entry.tier {
            Tier::Memory => {
                let Some(memory) = &self.memory else {
                    return false;
                };
                if let Some(evicted) = memory.insert(entry) {
                    metrics::record_cache_event(Tier::Memory, "evict");
                    tracing::debug!(key = %evicted, "Evicted least recently used entry");
                }
                metrics::record_cache_event(Tier::Memory, "store");
                true
            }
            Tier::Disk => {
                let Some(disk) = &self.disk else {
                    return false;
                };
                match disk.put(&entry).await {
                    Ok(()) => {
                        metrics::record_cache_event(Tier::Disk, "store");
                        true
                    }
                    Err(e) => {
                        metrics::record_cache_event(Tier::Disk, "error");
                        tracing::warn!(key = %entry.key, error = %e, "Disk cache store failed, serving uncached");
                        false
                    }
                }
            }
        }
    }

    /// Run one eviction pass over both tiers.
    pub async fn sweep(&self) -> Result<Option<SweepReport>, CacheError> {
        if let Some(memory) = &self.memory {
            let purged = memory.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired memory cache entries");
            }
        }
        match &self.disk {
            Some(disk) => disk.sweep().await.map(Some),
            None => Ok(None),
        }
    }
}
