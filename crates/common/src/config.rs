//! Dashboard configuration types.

use serde::{Deserialize, Serialize};

use crate::types::Units;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Weather provider endpoints and credentials.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Process-local freshness store.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry/backoff for idempotent upstream reads.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Optional cross-process cache tier.
    #[serde(default)]
    pub shared_cache: SharedCacheConfig,

    /// Unit system used when a request names none.
    #[serde(default)]
    pub default_units: Units,
}

/// Weather provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OpenWeather API key (`OWM_KEY`).
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_current_url")]
    pub current_url: String,

    /// Rich multi-day forecast endpoint.
    #[serde(default = "default_onecall_url")]
    pub onecall_url: String,

    /// Coarse 5-day/3-hour endpoint used as the forecast fallback.
    #[serde(default = "default_five_day_url")]
    pub five_day_url: String,

    /// Per-request network timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Client-side throttle on upstream calls.
    #[serde(default = "default_calls_per_minute")]
    pub max_calls_per_minute: u32,
}

/// Freshness window for cached documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = this + 1).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base; retry `n` waits `base * 2^n` unless the provider
    /// sends `retry-after`.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

/// Redis-over-REST cache shared between processes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedCacheConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub token: String,

    /// Expiry written with each entry; defaults to `cache.ttl_secs`.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl SharedCacheConfig {
    /// The tier is only used when both URL and token are set.
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty() && !self.token.trim().is_empty()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            current_url: default_current_url(),
            onecall_url: default_onecall_url(),
            five_day_url: default_five_day_url(),
            timeout_secs: default_timeout(),
            max_calls_per_minute: default_calls_per_minute(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
        }
    }
}

fn default_current_url() -> String {
    "https://api.openweathermap.org/data/2.5/weather".into()
}
fn default_onecall_url() -> String {
    "https://api.openweathermap.org/data/2.5/onecall".into()
}
fn default_five_day_url() -> String {
    "https://api.openweathermap.org/data/2.5/forecast".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_calls_per_minute() -> u32 {
    60
}

fn default_ttl() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_delay() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_behavior() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.cache.ttl_secs, 60);
        assert_eq!(cfg.retry.max_retries, 2);
        assert_eq!(cfg.retry.base_delay_ms, 500);
        assert_eq!(cfg.default_units, Units::Metric);
        assert!(!cfg.shared_cache.is_enabled());
    }

    #[test]
    fn test_shared_cache_needs_url_and_token() {
        let mut shared = SharedCacheConfig {
            url: "https://eu1-example.upstash.io".into(),
            ..Default::default()
        };
        assert!(!shared.is_enabled());

        shared.token = "secret".into();
        assert!(shared.is_enabled());
    }
}
