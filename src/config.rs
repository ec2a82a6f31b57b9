//! Configuration loader: merges .env, config.toml, and environment variables.

use common::config::AppConfig;
use common::{Error, Units};
use std::path::Path;

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_non_negative_u32(raw: &str, env_name: &str) -> Result<u32, Error> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn validate_config(config: &AppConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.provider.api_key.trim().is_empty() {
        issues.push("OWM_KEY is required (set in .env or environment)".into());
    }
    if config.provider.current_url.trim().is_empty() {
        issues.push("provider.current_url must not be empty".into());
    }
    if config.provider.onecall_url.trim().is_empty() {
        issues.push("provider.onecall_url must not be empty".into());
    }
    if config.provider.five_day_url.trim().is_empty() {
        issues.push("provider.five_day_url must not be empty".into());
    }
    if config.provider.timeout_secs == 0 {
        issues.push("provider.timeout_secs must be > 0".into());
    }
    if config.provider.max_calls_per_minute == 0 {
        issues.push("provider.max_calls_per_minute must be > 0".into());
    }

    if config.cache.ttl_secs == 0 {
        issues.push("cache.ttl_secs must be > 0".into());
    }
    if config.retry.base_delay_ms == 0 {
        issues.push("retry.base_delay_ms must be > 0".into());
    }
    if config.shared_cache.ttl_secs == Some(0) {
        issues.push("shared_cache.ttl_secs must be > 0 when set".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply environment overrides. `lookup` returns the raw value of a variable.
fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("OWM_KEY") {
        config.provider.api_key = key.trim().to_string();
    }
    if let Some(url) = lookup("OPENWEATHER_URL").and_then(non_empty) {
        config.provider.current_url = url;
    }
    if let Some(url) = lookup("OPENWEATHER_ONECALL_URL").and_then(non_empty) {
        config.provider.onecall_url = url;
    }
    if let Some(url) = lookup("OPENWEATHER_FIVEDAY_URL").and_then(non_empty) {
        config.provider.five_day_url = url;
    }
    if let Some(url) = lookup("UPSTASH_REDIS_REST_URL") {
        config.shared_cache.url = url.trim().to_string();
    }
    if let Some(token) = lookup("UPSTASH_REDIS_REST_TOKEN") {
        config.shared_cache.token = token.trim().to_string();
    }
    if let Some(raw) = lookup("WEATHER_CACHE_TTL_SECS") {
        config.cache.ttl_secs = parse_positive_u64(&raw, "WEATHER_CACHE_TTL_SECS")?;
    }
    if let Some(raw) = lookup("WEATHER_MAX_RETRIES") {
        config.retry.max_retries = parse_non_negative_u32(&raw, "WEATHER_MAX_RETRIES")?;
    }
    if let Some(raw) = lookup("WEATHER_RETRY_BASE_MS") {
        config.retry.base_delay_ms = parse_positive_u64(&raw, "WEATHER_RETRY_BASE_MS")?;
    }
    if let Some(raw) = lookup("WEATHER_DEFAULT_UNITS") {
        config.default_units = Units::coerce(&raw);
    }

    Ok(())
}

/// Load dashboard configuration from environment and optional config file.
pub fn load_config() -> Result<AppConfig, Error> {
    // 1. Load .env file from the working directory or its parents.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Defaults, replaced wholesale by config.toml when present.
    let mut config = AppConfig::default();
    let config_path = Path::new("config.toml");
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config.toml: {}", e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))?;
    }

    // 3. Environment variables win.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("OWM_KEY", " abc123 "),
                ("OPENWEATHER_URL", "http://localhost:9000/weather"),
                ("UPSTASH_REDIS_REST_URL", "https://redis.example"),
                ("UPSTASH_REDIS_REST_TOKEN", "tok"),
                ("WEATHER_CACHE_TTL_SECS", "120"),
                ("WEATHER_MAX_RETRIES", "0"),
                ("WEATHER_DEFAULT_UNITS", "imperial"),
            ]),
        )
        .unwrap();

        assert_eq!(config.provider.api_key, "abc123");
        assert_eq!(config.provider.current_url, "http://localhost:9000/weather");
        assert!(config.provider.onecall_url.ends_with("/data/2.5/onecall"));
        assert!(config.shared_cache.is_enabled());
        assert_eq!(config.cache.ttl_secs, 120);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.default_units, Units::Imperial);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_blank_url_override_keeps_default() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, env(&[("OPENWEATHER_FIVEDAY_URL", "  ")])).unwrap();
        assert!(config.provider.five_day_url.ends_with("/data/2.5/forecast"));
    }

    #[test]
    fn test_unknown_units_fall_back_to_metric() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, env(&[("WEATHER_DEFAULT_UNITS", "kelvin")])).unwrap();
        assert_eq!(config.default_units, Units::Metric);
    }

    #[test]
    fn test_zero_ttl_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("WEATHER_CACHE_TTL_SECS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("WEATHER_CACHE_TTL_SECS"));
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let mut config = AppConfig::default();
        config.provider.timeout_secs = 0;
        config.retry.base_delay_ms = 0;

        let msg = validate_config(&config).unwrap_err().to_string();
        assert!(msg.contains("OWM_KEY is required"));
        assert!(msg.contains("provider.timeout_secs"));
        assert!(msg.contains("retry.base_delay_ms"));
    }
}
