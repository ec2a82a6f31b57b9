//! Weather dashboard CLI.
//!
//! Resolves current conditions or a forecast for a coordinate through the
//! de-duplicating cache:
//! 1. Local freshness store
//! 2. Shared Upstash tier (when configured)
//! 3. One coalesced OpenWeather call with bounded retries

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info, warn};

use common::{AppConfig, ResourceKind, Units};
use forecast_cache::{FreshnessStore, RetryPolicy, WeatherCache};
use openweather_client::OpenWeatherClient;
use upstash_client::UpstashClient;

/// Weather dashboard backend
#[derive(Parser)]
#[command(name = "weather-dashboard", about = "Cached, de-duplicated weather lookups")]
struct Cli {
    /// Validate configuration and exit.
    #[arg(long)]
    check_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Current conditions at a coordinate.
    Current(Lookup),
    /// Hourly and daily forecast at a coordinate.
    Forecast(Lookup),
}

#[derive(clap::Args)]
struct Lookup {
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,

    #[arg(long, allow_negative_numbers = true)]
    lon: f64,

    /// `metric` or `imperial`; anything else means metric.
    #[arg(long)]
    units: Option<String>,

    /// Issue this many identical requests concurrently.
    #[arg(long, default_value_t = 1)]
    repeat: usize,
}

fn validate_coordinates(lat: f64, lon: f64) -> Result<(), String> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude must be within [-90, 90], got {lat}"));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("longitude must be within [-180, 180], got {lon}"));
    }
    Ok(())
}

fn print_error(message: &str) {
    println!("{}", json!({ "error": message }));
}

fn build_cache(cfg: &AppConfig) -> Result<WeatherCache, common::Error> {
    let gateway = Arc::new(OpenWeatherClient::new(&cfg.provider)?);
    let store = Arc::new(FreshnessStore::new(Duration::from_secs(cfg.cache.ttl_secs)));
    let mut builder =
        WeatherCache::builder(gateway, store).retry(RetryPolicy::from_config(&cfg.retry));

    if cfg.shared_cache.is_enabled() {
        match UpstashClient::new(&cfg.shared_cache) {
            Ok(client) => {
                let ttl = cfg.shared_cache.ttl_secs.unwrap_or(cfg.cache.ttl_secs);
                info!("Shared cache tier enabled (ttl={}s)", ttl);
                builder = builder.shared_tier(Arc::new(client), Duration::from_secs(ttl));
            }
            Err(e) => warn!("Shared cache disabled: {}", e),
        }
    } else {
        info!("Shared cache tier not configured; using local store only");
    }

    Ok(builder.build())
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "weather_dashboard=info,forecast_cache=info,openweather_client=info,upstash_client=info"
                    .into()
            }),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Cache: ttl={}s, retries={}, base_delay={}ms, default_units={}",
        cfg.cache.ttl_secs, cfg.retry.max_retries, cfg.retry.base_delay_ms, cfg.default_units,
    );

    if cli.check_config {
        info!("Configuration OK");
        return;
    }

    let Some(command) = cli.command else {
        error!("No command given; use `current` or `forecast` (see --help)");
        std::process::exit(2);
    };

    let (kind, lookup) = match command {
        Command::Current(lookup) => (ResourceKind::Current, lookup),
        Command::Forecast(lookup) => (ResourceKind::Forecast, lookup),
    };

    if let Err(msg) = validate_coordinates(lookup.lat, lookup.lon) {
        print_error(&msg);
        std::process::exit(1);
    }

    let units = lookup
        .units
        .as_deref()
        .map(Units::coerce)
        .unwrap_or(cfg.default_units);

    let cache = match build_cache(&cfg) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to initialize weather cache: {}", e);
            std::process::exit(1);
        }
    };

    let repeat = lookup.repeat.max(1);
    let results = futures_util::future::join_all(
        (0..repeat).map(|_| cache.fetch_weather(kind, lookup.lat, lookup.lon, units)),
    )
    .await;

    let stats = cache.stats();
    info!(
        "Requests: {} (local_hits={}, shared_hits={}, coalesced={}, upstream_calls={}, retries={}, failures={})",
        stats.requests,
        stats.local_hits,
        stats.shared_hits,
        stats.coalesced,
        stats.upstream_calls,
        stats.retries,
        stats.failures,
    );
    cache.shutdown();

    // Every waiter on one key sees the same outcome.
    match results.into_iter().next() {
        Some(Ok(payload)) => match serde_json::to_string_pretty(&*payload) {
            Ok(body) => println!("{body}"),
            Err(e) => {
                print_error(&e.to_string());
                std::process::exit(1);
            }
        },
        Some(Err(failure)) => {
            error!("{} lookup failed after {} attempt(s)", kind, failure.attempts);
            print_error(&failure.message);
            std::process::exit(1);
        }
        None => {}
    }
}
