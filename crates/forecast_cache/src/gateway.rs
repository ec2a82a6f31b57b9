//! Upstream gateway seam.

use async_trait::async_trait;
use common::{Error, ResourceKind, Units, WeatherPayload};
use openweather_client::OpenWeatherClient;

/// One upstream read for a resource shape.
#[async_trait]
pub trait UpstreamGateway: Send + Sync {
    async fn fetch(
        &self,
        kind: ResourceKind,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<WeatherPayload, Error>;
}

#[async_trait]
impl UpstreamGateway for OpenWeatherClient {
    async fn fetch(
        &self,
        kind: ResourceKind,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<WeatherPayload, Error> {
        match kind {
            ResourceKind::Current => self
                .fetch_current(lat, lon, units)
                .await
                .map(WeatherPayload::Current),
            ResourceKind::Forecast => self
                .fetch_forecast(lat, lon, units)
                .await
                .map(WeatherPayload::Forecast),
        }
    }
}
