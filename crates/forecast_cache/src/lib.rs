//! De-duplicating weather cache.
//!
//! Sits between request handlers and the weather provider: fresh documents
//! come from the local store or the shared tier, and concurrent misses for
//! the same key collapse into one upstream call with bounded retries.

pub mod engine;
pub mod gateway;
pub mod inflight;
pub mod retry;
pub mod store;
pub mod tier;

pub use engine::{FetchStats, WeatherCache, WeatherCacheBuilder};
pub use gateway::UpstreamGateway;
pub use inflight::FetchOutcome;
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{CacheMetrics, FreshnessStore};
pub use tier::SharedCacheTier;
