//! Disk-backed tier: one file per target under the cache directory.
//!
//! # Layout
//! ```text
//! <dir>/<escaped-url>          raw response bytes
//! <dir>/<escaped-url>@meta     JSON sidecar (url, content type, status, headers, store time)
//! <dir>/<escaped-url>@<id>.tmp in-flight writes, renamed into place on commit
//! ```
//! The escaped name is the percent-encoded URL, which never contains `@`.
//! Names too long for common filesystems fall back to a SHA-256 digest that
//! keeps the URL's file extension.
//!
//! Entries expire by modification time. A sweep removes expired entries,
//! then evicts oldest-modified files until the tier fits its byte budget.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use url::Url;

use super::{CacheEntry, CacheError, Tier};
use crate::config::DiskCacheConfig;

const META_SUFFIX: &str = "@meta";
const TEMP_SUFFIX: &str = ".tmp";
const MAX_NAME_LEN: usize = 200;

/// Temp files older than this are abandoned writes, not in-flight ones.
const STALE_TEMP_AGE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    url: String,
    content_type: String,
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    headers: Vec<(String, String)>,
    stored_at: u64,
}

fn default_status() -> u16 {
    StatusCode::OK.as_u16()
}

#[derive(Debug, Clone, Copy)]
struct DiskRecord {
    size: u64,
    modified: SystemTime,
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
    pub temp_removed: usize,
    pub entries: usize,
    pub bytes: u64,
}

/// Removes temp files on drop unless the write they belong to was committed.
struct TempGuard {
    paths: Vec<PathBuf>,
}

impl TempGuard {
    fn commit(mut self) {
        self.paths.clear();
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            if std::fs::remove_file(path).is_ok() {
                tracing::debug!(path = %path.display(), "Removed uncommitted cache temp file");
            }
        }
    }
}

pub struct DiskCache {
    root: PathBuf,
    ttl: Duration,
    max_bytes: u64,
    index: DashMap<String, DiskRecord>,
    bytes: AtomicU64,
}

impl DiskCache {
    /// Open the cache directory, creating it if needed, and index its contents.
    ///
    /// Temp files left by an earlier process are removed.
    pub async fn open(config: &DiskCacheConfig) -> Result<Self, CacheError> {
        let root = config.directory.clone();
        fs::create_dir_all(&root).await.map_err(|source| CacheError::Io {
            path: root.clone(),
            source,
        })?;

        let cache = Self {
            root,
            ttl: config.ttl(),
            max_bytes: config.max_bytes,
            index: DashMap::new(),
            bytes: AtomicU64::new(0),
        };
        let report = cache.rescan(Duration::ZERO).await?;
        tracing::info!(
            directory = %cache.root.display(),
            entries = report.entries,
            bytes = report.bytes,
            temp_removed = report.temp_removed,
            "Disk cache opened"
        );
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes of payload currently indexed.
    pub fn total_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(&file_name(key))
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, META_SUFFIX))
    }

    fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified).unwrap_or_default() > self.ttl
    }

    /// Look up `key`. Entries older than the TTL are never returned.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let name = file_name(key);
        let Some(record) = self.index.get(&name).map(|r| *r) else {
            return Ok(None);
        };

        if self.is_expired(record.modified, SystemTime::now()) {
            tracing::debug!(key = %key, "Disk cache entry expired");
            self.remove_entry(&name).await;
            return Ok(None);
        }

        let data_path = self.data_path(&name);
        let payload = match fs::read(&data_path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.forget(&name);
                return Ok(None);
            }
            Err(source) => return Err(CacheError::Io { path: data_path, source }),
        };

        let sidecar = self.read_sidecar(&name).await;
        if let Some(sidecar) = &sidecar {
            // Digest names can collide in principle; the sidecar settles it.
            if sidecar.url != key {
                return Ok(None);
            }
        }

        let (content_type, status, headers, stored_at) = match sidecar {
            Some(sidecar) => (
                sidecar.content_type,
                StatusCode::from_u16(sidecar.status).unwrap_or(StatusCode::OK),
                header_map(&sidecar.headers),
                UNIX_EPOCH + Duration::from_secs(sidecar.stored_at),
            ),
            None => (guess_content_type(key), StatusCode::OK, HeaderMap::new(), record.modified),
        };

        Ok(Some(CacheEntry {
            key: key.to_string(),
            payload: Bytes::from(payload),
            content_type,
            status,
            headers,
            stored_at,
            tier: Tier::Disk,
        }))
    }

    async fn read_sidecar(&self, name: &str) -> Option<Sidecar> {
        let path = self.meta_path(name);
        let raw = fs::read(&path).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable cache sidecar");
                None
            }
        }
    }

    /// Write `entry` through a temp file and rename it into place.
    ///
    /// Dropping the returned future before it completes leaves no partial
    /// entry behind.
    pub async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let name = file_name(&entry.key);
        let write_id = uuid::Uuid::new_v4().simple().to_string();
        let data_tmp = self.root.join(format!("{}@{}{}", name, write_id, TEMP_SUFFIX));
        let meta_tmp = self.root.join(format!("{}@{}-meta{}", name, write_id, TEMP_SUFFIX));
        let guard = TempGuard {
            paths: vec![data_tmp.clone(), meta_tmp.clone()],
        };

        let sidecar = Sidecar {
            url: entry.key.clone(),
            content_type: entry.content_type.clone(),
            status: entry.status.as_u16(),
            headers: header_pairs(&entry.headers),
            stored_at: entry
                .stored_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };
        let meta = serde_json::to_vec(&sidecar).map_err(|source| CacheError::Metadata {
            path: meta_tmp.clone(),
            source,
        })?;

        write_file(&meta_tmp, &meta).await?;
        write_file(&data_tmp, &entry.payload).await?;

        let meta_path = self.meta_path(&name);
        rename(&meta_tmp, &meta_path).await?;
        let data_path = self.data_path(&name);
        rename(&data_tmp, &data_path).await?;
        guard.commit();

        let record = DiskRecord {
            size: entry.payload.len() as u64,
            modified: SystemTime::now(),
        };
        if let Some(previous) = self.index.insert(name, record) {
            self.bytes.fetch_sub(previous.size, Ordering::Relaxed);
        }
        self.bytes.fetch_add(record.size, Ordering::Relaxed);
        crate::observability::metrics::record_disk_cache_bytes(self.total_bytes());

        tracing::debug!(key = %entry.key, size = record.size, "Stored entry on disk");
        Ok(())
    }

    async fn remove_entry(&self, name: &str) {
        for path in [self.data_path(name), self.meta_path(name)] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                }
            }
        }
        self.forget(name);
    }

    fn forget(&self, name: &str) {
        if let Some((_, record)) = self.index.remove(name) {
            self.bytes.fetch_sub(record.size, Ordering::Relaxed);
        }
    }

    /// Remove expired entries, then evict oldest-modified entries until the
    /// tier fits its byte budget.
    pub async fn sweep(&self) -> Result<SweepReport, CacheError> {
        let report = self.rescan(STALE_TEMP_AGE).await?;
        crate::observability::metrics::record_disk_cache_bytes(report.bytes);
        Ok(report)
    }

    async fn rescan(&self, temp_age: Duration) -> Result<SweepReport, CacheError> {
        let now = SystemTime::now();
        let mut report = SweepReport::default();
        let mut entries: Vec<(String, DiskRecord)> = Vec::new();
        let mut sidecars: Vec<String> = Vec::new();

        let mut dir = fs::read_dir(&self.root).await.map_err(|source| CacheError::Io {
            path: self.root.clone(),
            source,
        })?;
        loop {
            let item = match dir.next_entry().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(source) => {
                    return Err(CacheError::Io {
                        path: self.root.clone(),
                        source,
                    })
                }
            };
            let Ok(name) = item.file_name().into_string() else {
                continue;
            };
            let Ok(metadata) = item.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(now);

            if name.ends_with(TEMP_SUFFIX) && name.contains('@') {
                if now.duration_since(modified).unwrap_or_default() >= temp_age
                    && fs::remove_file(item.path()).await.is_ok()
                {
                    report.temp_removed += 1;
                }
            } else if let Some(stem) = name.strip_suffix(META_SUFFIX) {
                sidecars.push(stem.to_string());
            } else if !name.contains('@') {
                entries.push((
                    name,
                    DiskRecord {
                        size: metadata.len(),
                        modified,
                    },
                ));
            }
        }

        let (expired, mut live): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|(_, record)| self.is_expired(record.modified, now));
        for (name, _) in &expired {
            self.remove_entry(name).await;
        }
        report.expired = expired.len();

        let mut total: u64 = live.iter().map(|(_, record)| record.size).sum();
        if total > self.max_bytes {
            live.sort_by_key(|(_, record)| record.modified);
            let mut evicted = 0;
            for (name, record) in &live {
                if total <= self.max_bytes {
                    break;
                }
                self.remove_entry(name).await;
                total -= record.size;
                evicted += 1;
            }
            live.drain(..evicted);
            report.evicted = evicted;
        }

        let live_names: HashSet<&str> = live.iter().map(|(name, _)| name.as_str()).collect();
        for stem in &sidecars {
            if !live_names.contains(stem.as_str()) && !self.index.contains_key(stem) {
                let _ = fs::remove_file(self.meta_path(stem)).await;
            }
        }

        // Merge rather than replace, so entries committed during the scan survive.
        for (name, record) in &live {
            if let Some(previous) = self.index.insert(name.clone(), *record) {
                self.bytes.fetch_sub(previous.size, Ordering::Relaxed);
            }
            self.bytes.fetch_add(record.size, Ordering::Relaxed);
        }

        report.entries = self.index.len();
        report.bytes = self.total_bytes();
        Ok(report)
    }
}

/// Filesystem-safe name for a cache key.
pub fn file_name(key: &str) -> String {
    let escaped = urlencoding::encode(key);
    if escaped.len() <= MAX_NAME_LEN {
        return escaped.into_owned();
    }

    let digest = Sha256::digest(key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    match extension(key) {
        Some(ext) => format!("h-{}.{}", hex, ext),
        None => format!("h-{}", hex),
    }
}

fn extension(key: &str) -> Option<String> {
    let url = Url::parse(key).ok()?;
    let last = url.path_segments()?.next_back()?.to_string();
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 10 && ext.bytes().all(|b| b.is_ascii_alphanumeric()))
        .then(|| ext.to_ascii_lowercase())
}

/// Content type for an entry without a sidecar, from the URL's file extension.
fn guess_content_type(key: &str) -> String {
    let path = Url::parse(key)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| key.to_string());
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

fn header_map(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            headers.append(name, value);
        }
    }
    headers
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    fs::write(path, contents).await.map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })
}

async fn rename(from: &Path, to: &Path) -> Result<(), CacheError> {
    fs::rename(from, to).await.map_err(|source| CacheError::Io {
        path: to.to_path_buf(),
        source,
    })
}
