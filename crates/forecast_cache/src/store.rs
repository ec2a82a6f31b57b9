//! Process-local freshness store.
//!
//! Uses `DashMap` so lookups and writes for different keys never contend.
//! An entry is fresh while `now - stored_at < ttl`; the read that finds it
//! stale evicts it. There is no background sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{CacheKey, WeatherPayload};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

/// A stored document. Replaced wholesale on overwrite, never mutated.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Arc<WeatherPayload>,
    pub stored_at: Instant,
}

impl CacheEntry {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// Lifetime hit/miss counters plus current occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

/// TTL key/value store with hit/miss accounting.
#[derive(Debug)]
pub struct FreshnessStore {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FreshnessStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fresh entry. Counts a hit, or counts a miss and evicts.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh(self.ttl) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.clone());
            }
        }

        // A writer may have refreshed the slot since the read above.
        self.entries
            .remove_if(key, |_, entry| !entry.is_fresh(self.ttl));
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `payload` under `key`, stamped now.
    pub fn set(&self, key: CacheKey, payload: Arc<WeatherPayload>) {
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }

    /// Drop every entry. Hit/miss counters are lifetime totals and survive.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CurrentConditions, MainReadings, ResourceKind, Units};

    fn payload(temp: f64) -> Arc<WeatherPayload> {
        Arc::new(WeatherPayload::Current(CurrentConditions {
            coord: None,
            weather: vec![],
            main: MainReadings {
                temp,
                feels_like: None,
                temp_min: None,
                temp_max: None,
                pressure: None,
                humidity: None,
            },
            visibility: None,
            wind: None,
            clouds: None,
            rain: None,
            snow: None,
            dt: 0,
            timezone: None,
            name: None,
            sys: None,
        }))
    }

    fn key() -> CacheKey {
        CacheKey::new(ResourceKind::Current, 51.5, -0.1, Units::Metric)
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_is_a_hit() {
        let store = FreshnessStore::new(Duration::from_secs(60));
        store.set(key(), payload(20.0));

        let entry = store.get(&key()).expect("fresh entry");
        assert_eq!(*entry.payload, *payload(20.0));
        assert_eq!(
            store.metrics(),
            CacheMetrics {
                hits: 1,
                misses: 0,
                size: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = FreshnessStore::new(Duration::from_secs(60));
        store.set(key(), payload(20.0));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get(&key()).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get(&key()).is_none(), "entry at exactly TTL is stale");

        let metrics = store.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.size, 0, "stale read evicts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_key_counts_a_miss() {
        let store = FreshnessStore::new(Duration::from_secs(60));
        assert!(store.get(&key()).is_none());
        assert_eq!(store.metrics().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_restarts_freshness_window() {
        let store = FreshnessStore::new(Duration::from_secs(60));
        store.set(key(), payload(20.0));
        tokio::time::advance(Duration::from_secs(50)).await;
        store.set(key(), payload(21.0));
        tokio::time::advance(Duration::from_secs(50)).await;

        let entry = store.get(&key()).expect("overwritten entry is fresh");
        assert_eq!(*entry.payload, *payload(21.0));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_keeps_lifetime_counters() {
        let store = FreshnessStore::new(Duration::from_secs(60));
        store.set(key(), payload(20.0));
        store.get(&key());
        store.get(&CacheKey::new(ResourceKind::Forecast, 51.5, -0.1, Units::Metric));

        store.clear();

        assert_eq!(
            store.metrics(),
            CacheMetrics {
                hits: 1,
                misses: 1,
                size: 0
            }
        );
        assert!(store.is_empty());
    }
}
