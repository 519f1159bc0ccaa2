//! Background task running periodic cache sweeps until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use super::CacheService;

pub struct DiskSweeper {
    cache: Arc<CacheService>,
    interval: Duration,
}

impl DiskSweeper {
    pub fn new(cache: Arc<CacheService>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// Sweep every `interval` until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.cache.disk().is_none() && self.cache.memory().is_none() {
            tracing::info!("Response cache disabled, sweeper not started");
            return;
        }

        tracing::info!(interval_secs = self.interval.as_secs(), "Cache sweeper starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the disk tier was just scanned on open.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn sweep_once(&self) {
        match self.cache.sweep().await {
            Ok(Some(report)) => tracing::info!(
                expired = report.expired,
                evicted = report.evicted,
                temp_removed = report.temp_removed,
                entries = report.entries,
                bytes = report.bytes,
                "Disk cache sweep complete"
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Disk cache sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::config::{CacheConfig, DiskCacheConfig};
    use bytes::Bytes;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweeps_on_interval_and_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(
            CacheService::open(&CacheConfig {
                disk: DiskCacheConfig {
                    directory: dir.path().to_path_buf(),
                    max_bytes: 4,
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        cache
            .store(CacheEntry::new("https://a.test/big.bin", Bytes::from("12345678"), "application/octet-stream"))
            .await;
        assert_eq!(cache.disk().unwrap().len(), 1);

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(DiskSweeper::new(cache.clone(), Duration::from_millis(20)).run(rx));

        let mut swept = false;
        for _ in 0..100 {
            if cache.disk().unwrap().is_empty() {
                swept = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(swept, "over-budget entry should have been evicted");

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop on shutdown")
            .unwrap();
    }
}
