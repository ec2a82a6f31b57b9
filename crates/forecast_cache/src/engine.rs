//! Coalescing request orchestrator.
//!
//! Lookup order for a request: local freshness store, shared tier,
//! in-flight registry, upstream. Concurrent misses for one key share a
//! single upstream call. A successful call fills both tiers before its
//! waiters see the result. A failed call writes nothing. Either way the
//! flight is deregistered once it settles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{CacheKey, FetchFailure, ResourceKind, Units, WeatherPayload};
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::gateway::UpstreamGateway;
use crate::inflight::{Admission, FetchOutcome, InFlightRegistry, SharedFetch};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{CacheMetrics, FreshnessStore};
use crate::tier::SharedCacheTier;

/// Lifetime request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub requests: u64,
    pub local_hits: u64,
    pub shared_hits: u64,
    /// Requests that joined a flight started by someone else.
    pub coalesced: u64,
    /// Upstream attempts, retries included.
    pub upstream_calls: u64,
    pub retries: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    requests: AtomicU64,
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    coalesced: AtomicU64,
    upstream_calls: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FetchStats {
        FetchStats {
            requests: self.requests.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct UpstreamRequest {
    kind: ResourceKind,
    lat: f64,
    lon: f64,
    units: Units,
}

struct Inner {
    gateway: Arc<dyn UpstreamGateway>,
    shared_tier: Option<Arc<dyn SharedCacheTier>>,
    shared_ttl: Duration,
    store: Arc<FreshnessStore>,
    in_flight: InFlightRegistry,
    retry: RetryPolicy,
    stats: StatsCounters,
}

/// Entry point for weather reads. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct WeatherCache {
    inner: Arc<Inner>,
}

pub struct WeatherCacheBuilder {
    gateway: Arc<dyn UpstreamGateway>,
    store: Arc<FreshnessStore>,
    retry: RetryPolicy,
    shared_tier: Option<(Arc<dyn SharedCacheTier>, Duration)>,
}

impl WeatherCacheBuilder {
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Enable the cross-process tier; entries are written with `ttl`.
    pub fn shared_tier(mut self, tier: Arc<dyn SharedCacheTier>, ttl: Duration) -> Self {
        self.shared_tier = Some((tier, ttl));
        self
    }

    pub fn build(self) -> WeatherCache {
        let (shared_tier, shared_ttl) = match self.shared_tier {
            Some((tier, ttl)) => (Some(tier), ttl),
            None => (None, self.store.ttl()),
        };

        WeatherCache {
            inner: Arc::new(Inner {
                gateway: self.gateway,
                shared_tier,
                shared_ttl,
                store: self.store,
                in_flight: InFlightRegistry::new(),
                retry: self.retry,
                stats: StatsCounters::default(),
            }),
        }
    }
}

impl WeatherCache {
    pub fn builder(
        gateway: Arc<dyn UpstreamGateway>,
        store: Arc<FreshnessStore>,
    ) -> WeatherCacheBuilder {
        WeatherCacheBuilder {
            gateway,
            store,
            retry: RetryPolicy::default(),
            shared_tier: None,
        }
    }

    /// Fetch a document, from cache when fresh, coalescing concurrent misses.
    pub async fn fetch_weather(
        &self,
        kind: ResourceKind,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> FetchOutcome {
        let inner = &self.inner;
        StatsCounters::bump(&inner.stats.requests);
        let key = CacheKey::new(kind, lat, lon, units);

        if let Some(entry) = inner.store.get(&key) {
            StatsCounters::bump(&inner.stats.local_hits);
            debug!("Cache hit for {}", key);
            return Ok(entry.payload);
        }

        if let Some(payload) = inner.read_shared(&key).await {
            StatsCounters::bump(&inner.stats.shared_hits);
            debug!("Shared cache hit for {}", key);
            return Ok(payload);
        }

        let request = UpstreamRequest {
            kind,
            lat,
            lon,
            units,
        };
        let mut arm = None;
        let admission = inner.in_flight.join_or_start(&key, |id| {
            let (tx, rx) = oneshot::channel();
            arm = Some(tx);
            launch(Arc::clone(&self.inner), key.clone(), request, id, rx)
        });
        // The flight is registered now; let it run.
        if let Some(tx) = arm {
            let _ = tx.send(());
        }

        match &admission {
            Admission::Started(id, _) => debug!("Cache miss for {}, starting flight {}", key, id),
            Admission::Joined(_) => {
                StatsCounters::bump(&inner.stats.coalesced);
                debug!("Joining in-flight fetch for {}", key);
            }
        }

        admission.into_fetch().await
    }

    pub async fn current(&self, lat: f64, lon: f64, units: Units) -> FetchOutcome {
        self.fetch_weather(ResourceKind::Current, lat, lon, units).await
    }

    pub async fn forecast(&self, lat: f64, lon: f64, units: Units) -> FetchOutcome {
        self.fetch_weather(ResourceKind::Forecast, lat, lon, units).await
    }

    /// Local store hit/miss counters and occupancy.
    pub fn metrics(&self) -> CacheMetrics {
        self.inner.store.metrics()
    }

    pub fn stats(&self) -> FetchStats {
        self.inner.stats.snapshot()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Drop local entries. Counters and the shared tier are untouched.
    pub fn clear(&self) {
        self.inner.store.clear();
    }

    /// Log final counters, drop local entries, and return the last metrics.
    pub fn shutdown(self) -> CacheMetrics {
        let metrics = self.inner.store.metrics();
        let stats = self.inner.stats.snapshot();
        info!(
            "Weather cache shutting down: hits={} misses={} size={} upstream_calls={} coalesced={} failures={}",
            metrics.hits,
            metrics.misses,
            metrics.size,
            stats.upstream_calls,
            stats.coalesced,
            stats.failures
        );
        self.inner.store.clear();
        metrics
    }
}

/// Spawn the upstream call for flight `id`. The task waits for `armed` so
/// its own deregistration cannot run before the registration.
fn launch(
    inner: Arc<Inner>,
    key: CacheKey,
    request: UpstreamRequest,
    id: u64,
    armed: oneshot::Receiver<()>,
) -> SharedFetch {
    let task_inner = Arc::clone(&inner);
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
        let _ = armed.await;
        let outcome = task_inner.fetch_upstream(&task_key, request).await;
        if let Ok(payload) = &outcome {
            task_inner.populate(&task_key, payload).await;
        }
        task_inner.in_flight.complete(&task_key, id);
        outcome
    });

    async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                inner.in_flight.complete(&key, id);
                Err(FetchFailure::internal(format!(
                    "fetch task for {key} failed: {e}"
                )))
            }
        }
    }
    .boxed()
    .shared()
}

impl Inner {
    async fn read_shared(&self, key: &CacheKey) -> Option<Arc<WeatherPayload>> {
        let tier = self.shared_tier.as_ref()?;
        match tier.get(key).await {
            Ok(Some(payload)) if payload.kind() == key.kind() => Some(Arc::new(payload)),
            Ok(Some(payload)) => {
                warn!(
                    "Shared cache entry for {} holds a {} document, ignoring",
                    key,
                    payload.kind()
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "Shared cache get failed for {} (continuing without it): {}",
                    key, e
                );
                None
            }
        }
    }

    async fn fetch_upstream(&self, key: &CacheKey, req: UpstreamRequest) -> FetchOutcome {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            StatsCounters::bump(&self.stats.upstream_calls);

            let err = match self
                .gateway
                .fetch(req.kind, req.lat, req.lon, req.units)
                .await
            {
                Ok(payload) => {
                    if attempts > 1 {
                        info!("Upstream fetch for {} succeeded on attempt {}", key, attempts);
                    }
                    return Ok(Arc::new(payload));
                }
                Err(e) => e,
            };

            match self.retry.decide(attempts, &err) {
                RetryDecision::RetryAfter(delay) => {
                    StatsCounters::bump(&self.stats.retries);
                    warn!(
                        "Upstream fetch for {} failed (attempt {}): {}. Retrying in {:?}",
                        key, attempts, err, delay
                    );
                    sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    StatsCounters::bump(&self.stats.failures);
                    warn!(
                        "Upstream fetch for {} failed after {} attempt(s): {}",
                        key, attempts, err
                    );
                    return Err(FetchFailure::from_error(&err, attempts));
                }
            }
        }
    }

    async fn populate(&self, key: &CacheKey, payload: &Arc<WeatherPayload>) {
        self.store.set(key.clone(), Arc::clone(payload));

        if let Some(tier) = &self.shared_tier {
            if let Err(e) = tier.set(key, payload, self.shared_ttl).await {
                warn!(
                    "Shared cache set failed for {} (continuing without it): {}",
                    key, e
                );
            }
        }
    }
}
