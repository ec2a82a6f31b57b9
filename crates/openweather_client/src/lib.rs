//! OpenWeather API client.
//!
//! Fetches current conditions and forecasts, normalizing provider
//! responses into the shared document types and provider failures into
//! classified `Error`s. Forecasts come from the rich multi-day endpoint,
//! falling back to the 5-day/3-hour endpoint when the key is not entitled
//! to it.

pub mod five_day;
pub mod rate_limit;

use chrono::{Local, Offset};
use common::config::ProviderConfig;
use common::{
    CurrentConditions, DailyPoint, Error, ForecastDocument, ForecastSource, HourlyPoint, Timezone,
    Units,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::five_day::FiveDayResponse;
use crate::rate_limit::RateLimiter;

const MAX_MESSAGE_CHARS: usize = 500;

/// OpenWeather client with connection pooling and a shared call budget.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    api_key: String,
    current_url: String,
    onecall_url: String,
    five_day_url: String,
    limiter: RateLimiter,
}

/// Response from the rich multi-day endpoint.
#[derive(Debug, Deserialize)]
pub struct OneCallResponse {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub current: Option<HourlyPoint>,
    #[serde(default)]
    pub hourly: Vec<HourlyPoint>,
    #[serde(default)]
    pub daily: Vec<DailyPoint>,
}

impl From<OneCallResponse> for ForecastDocument {
    fn from(raw: OneCallResponse) -> Self {
        ForecastDocument {
            source: ForecastSource::OneCall,
            timezone: raw.timezone.map(Timezone::Name),
            current: raw.current,
            hourly: raw.hourly,
            daily: raw.daily,
        }
    }
}

impl OpenWeatherClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent("weather-dashboard/0.1")
            .pool_max_idle_per_host(4)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build OpenWeather HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            current_url: config.current_url.clone(),
            onecall_url: config.onecall_url.clone(),
            five_day_url: config.five_day_url.clone(),
            limiter: RateLimiter::per_minute(config.max_calls_per_minute),
        })
    }

    fn base_query(&self, lat: f64, lon: f64, units: Units) -> Vec<(&'static str, String)> {
        vec![
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("units", units.as_str().to_string()),
            ("appid", self.api_key.clone()),
        ]
    }

    /// Fetch point-in-time conditions.
    pub async fn fetch_current(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<CurrentConditions, Error> {
        debug!("Fetching current conditions: lat={} lon={} units={}", lat, lon, units);
        let query = self.base_query(lat, lon, units);
        self.get_json(&self.current_url, &query).await
    }

    /// Fetch a forecast series, falling back to the 5-day endpoint on
    /// 400/401/404 from the rich endpoint.
    pub async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<ForecastDocument, Error> {
        match self.fetch_onecall(lat, lon, units).await {
            Ok(raw) => Ok(raw.into()),
            Err(Error::Upstream { status, message, .. }) if matches!(status, 400 | 401 | 404) => {
                info!(
                    "Rich forecast unavailable ({}: {}), using 5-day fallback for ({},{})",
                    status, message, lat, lon
                );
                let raw = self.fetch_five_day(lat, lon, units).await?;
                Ok(five_day::reshape(raw, Local::now().offset().fix()))
            }
            Err(e) => Err(e),
        }
    }

    /// Raw rich forecast response.
    pub async fn fetch_onecall(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<OneCallResponse, Error> {
        debug!("Fetching rich forecast: lat={} lon={} units={}", lat, lon, units);
        let mut query = self.base_query(lat, lon, units);
        query.push(("exclude", "minutely".to_string()));
        self.get_json(&self.onecall_url, &query).await
    }

    /// Raw 5-day/3-hour forecast response.
    pub async fn fetch_five_day(
        &self,
        lat: f64,
        lon: f64,
        units: Units,
    ) -> Result<FiveDayResponse, Error> {
        debug!("Fetching 5-day forecast: lat={} lon={} units={}", lat, lon, units);
        let query = self.base_query(lat, lon, units);
        self.get_json(&self.five_day_url, &query).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&'static str, String)],
    ) -> Result<T, Error> {
        self.limiter.wait().await;

        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {url} failed: {e}")))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after_ms = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            let message = provider_message(&body)
                .unwrap_or_else(|| format!("{url} returned {status}"));

            if status == 429 {
                return Err(Error::RateLimited {
                    message,
                    retry_after_ms,
                });
            }
            return Err(Error::Upstream {
                status,
                message,
                retry_after_ms,
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading body from {url} failed: {e}")))?;

        serde_json::from_str(&body)
            .map_err(|e| Error::Malformed(format!("unexpected payload from {url}: {e}")))
    }
}

/// `retry-after` in whole seconds, converted to milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

/// Prefer the provider's `message`, then `error`, then the raw body.
fn provider_message(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "error"] {
            if let Some(msg) = value.get(field).and_then(|v| v.as_str()) {
                return Some(msg.to_string());
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.chars().take(MAX_MESSAGE_CHARS).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenWeatherClient {
        let config = ProviderConfig {
            api_key: "test-key".into(),
            current_url: format!("{}/data/2.5/weather", server.uri()),
            onecall_url: format!("{}/data/2.5/onecall", server.uri()),
            five_day_url: format!("{}/data/2.5/forecast", server.uri()),
            timeout_secs: 5,
            max_calls_per_minute: 1000,
        };
        OpenWeatherClient::new(&config).expect("client should build")
    }

    fn current_body() -> serde_json::Value {
        serde_json::json!({
            "coord": {"lon": -0.1, "lat": 51.5},
            "weather": [{"id": 800, "main": "Clear", "description": "clear sky", "icon": "01d"}],
            "main": {"temp": 20.0, "feels_like": 19.2, "temp_min": 18.0, "temp_max": 22.0, "pressure": 1015, "humidity": 40},
            "visibility": 10000,
            "wind": {"speed": 4.1, "deg": 250},
            "clouds": {"all": 0},
            "dt": 1772366400,
            "timezone": 0,
            "name": "London"
        })
    }

    #[tokio::test]
    async fn test_fetch_current_normalizes_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .and(query_param("units", "imperial"))
            .and(query_param("appid", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body()))
            .expect(1)
            .mount(&server)
            .await;

        let current = client_for(&server)
            .fetch_current(51.5, -0.1, Units::Imperial)
            .await
            .expect("current conditions");

        assert_eq!(current.main.temp, 20.0);
        assert_eq!(current.name.as_deref(), Some("London"));
        assert_eq!(current.weather[0].main, "Clear");
    }

    #[tokio::test]
    async fn test_missing_main_block_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"dt": 1})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_current(1.0, 2.0, Units::Metric)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "3")
                    .set_body_json(serde_json::json!({"cod": 429, "message": "Too many requests"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_current(1.0, 2.0, Units::Metric)
            .await
            .unwrap_err();

        match err {
            Error::RateLimited {
                message,
                retry_after_ms,
            } => {
                assert_eq!(message, "Too many requests");
                assert_eq!(retry_after_ms, Some(3000));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_message_falls_back_to_error_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(
                ResponseTemplate::new(502).set_body_json(serde_json::json!({"error": "bad gateway"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_current(1.0, 2.0, Units::Metric)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.message(), "bad gateway");
    }

    #[tokio::test]
    async fn test_forecast_uses_rich_endpoint_when_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .and(query_param("exclude", "minutely"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "timezone": "Europe/London",
                "hourly": [{"dt": 1772366400, "temp": 12.0}],
                "daily": [{"dt": 1772366400, "temp": {"day": 12.0, "min": 7.0, "max": 14.0}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let doc = client_for(&server)
            .fetch_forecast(51.5, -0.1, Units::Metric)
            .await
            .expect("forecast");

        assert_eq!(doc.source, ForecastSource::OneCall);
        assert_eq!(doc.timezone, Some(Timezone::Name("Europe/London".into())));
        assert_eq!(doc.daily[0].temp.max, Some(14.0));
    }

    #[tokio::test]
    async fn test_forecast_falls_back_on_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(serde_json::json!({"cod": 404, "message": "Not found"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        // Pairs one minute apart, one day apart: two buckets in any local offset.
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "list": [
                    {"dt": 1772366400, "main": {"temp": 9.0}},
                    {"dt": 1772366460, "main": {"temp": 13.0}},
                    {"dt": 1772452800, "main": {"temp": 5.0}},
                    {"dt": 1772452860, "main": {"temp": 3.0}}
                ],
                "city": {"timezone": 0}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let doc = client_for(&server)
            .fetch_forecast(0.0, 0.0, Units::Metric)
            .await
            .expect("fallback forecast");

        assert_eq!(doc.source, ForecastSource::FiveDay);
        assert_eq!(doc.hourly.len(), 4);
        assert_eq!(doc.daily.len(), 2);
        assert_eq!(doc.daily[0].temp.min, Some(9.0));
        assert_eq!(doc.daily[0].temp.max, Some(13.0));
        assert_eq!(doc.daily[1].temp.min, Some(3.0));
        assert_eq!(doc.daily[1].temp.max, Some(5.0));
    }

    #[tokio::test]
    async fn test_forecast_server_error_does_not_fall_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_forecast(0.0, 0.0, Units::Metric)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn test_fallback_failure_surfaces_as_is() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/onecall"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"message": "Invalid API key"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_forecast(0.0, 0.0, Units::Metric)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.message(), "Invalid API key");
    }

    #[test]
    fn test_provider_message_prefers_message_field() {
        assert_eq!(
            provider_message(r#"{"message":"a","error":"b"}"#).as_deref(),
            Some("a")
        );
        assert_eq!(provider_message(r#"{"error":"b"}"#).as_deref(), Some("b"));
        assert_eq!(provider_message("plain text").as_deref(), Some("plain text"));
        assert_eq!(provider_message("   "), None);
    }
}
