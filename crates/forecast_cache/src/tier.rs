//! Shared cache tier seam.
//!
//! Callers treat every error from a tier as a miss (on read) or a no-op
//! (on write); nothing here is retried.

use std::time::Duration;

use async_trait::async_trait;
use common::{CacheKey, Error, WeatherPayload};
use upstash_client::UpstashClient;

#[async_trait]
pub trait SharedCacheTier: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<WeatherPayload>, Error>;

    async fn set(&self, key: &CacheKey, payload: &WeatherPayload, ttl: Duration)
        -> Result<(), Error>;
}

#[async_trait]
impl SharedCacheTier for UpstashClient {
    async fn get(&self, key: &CacheKey) -> Result<Option<WeatherPayload>, Error> {
        match UpstashClient::get(self, key.as_str()).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &CacheKey,
        payload: &WeatherPayload,
        ttl: Duration,
    ) -> Result<(), Error> {
        let raw = serde_json::to_string(payload)?;
        self.set_ex(key.as_str(), &raw, ttl.as_secs().max(1)).await
    }
}
