//! Reshapes the 5-day/3-hour forecast into the rich forecast document.
//!
//! Samples are grouped into calendar days in a caller-supplied UTC offset.
//! Each day reports min/max over its samples and takes the rest of its
//! readings from the sample at index `floor(n/2)`.

use chrono::{DateTime, FixedOffset, NaiveDate};
use common::{
    Clouds, Condition, DailyFeelsLike, DailyPoint, DailyTemps, ForecastDocument, ForecastSource,
    HourlyPoint, Precipitation, Timezone, Wind,
};
use serde::Deserialize;

/// Response from the `/data/2.5/forecast` endpoint.
#[derive(Debug, Deserialize)]
pub struct FiveDayResponse {
    #[serde(default)]
    pub list: Vec<FiveDayEntry>,
    #[serde(default)]
    pub city: Option<FiveDayCity>,
}

#[derive(Debug, Deserialize)]
pub struct FiveDayCity {
    /// Shift from UTC in seconds.
    #[serde(default)]
    pub timezone: Option<i64>,
}

/// One 3-hour sample.
#[derive(Debug, Deserialize)]
pub struct FiveDayEntry {
    pub dt: i64,
    #[serde(default)]
    pub main: Option<FiveDayMain>,
    #[serde(default)]
    pub visibility: Option<f64>,
    #[serde(default)]
    pub clouds: Option<Clouds>,
    #[serde(default)]
    pub wind: Option<Wind>,
    #[serde(default)]
    pub pop: Option<f64>,
    #[serde(default)]
    pub rain: Option<ThreeHourAccumulation>,
    #[serde(default)]
    pub snow: Option<ThreeHourAccumulation>,
    #[serde(default)]
    pub weather: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
pub struct FiveDayMain {
    #[serde(default)]
    pub temp: Option<f64>,
    #[serde(default)]
    pub feels_like: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ThreeHourAccumulation {
    #[serde(rename = "3h", default)]
    pub three_hour: Option<f64>,
}

/// Build a forecast document from a 5-day response, bucketing days in `offset`.
pub fn reshape(raw: FiveDayResponse, offset: FixedOffset) -> ForecastDocument {
    let hourly: Vec<HourlyPoint> = raw.list.into_iter().map(to_hourly).collect();

    // Buckets keep first-appearance order.
    let mut days: Vec<(NaiveDate, Vec<&HourlyPoint>)> = Vec::new();
    for point in &hourly {
        let Some(date) = local_date(point.dt, offset) else {
            continue;
        };
        match days.iter_mut().find(|(d, _)| *d == date) {
            Some((_, bucket)) => bucket.push(point),
            None => days.push((date, vec![point])),
        }
    }

    let daily = days
        .iter()
        .map(|(date, samples)| summarize_day(*date, samples, offset))
        .collect();

    ForecastDocument {
        source: ForecastSource::FiveDay,
        timezone: raw
            .city
            .and_then(|c| c.timezone)
            .map(Timezone::OffsetSeconds),
        current: None,
        hourly,
        daily,
    }
}

fn to_hourly(entry: FiveDayEntry) -> HourlyPoint {
    let main = entry.main.as_ref();
    let wind = entry.wind.as_ref();

    HourlyPoint {
        dt: entry.dt,
        temp: main.and_then(|m| m.temp),
        feels_like: main.and_then(|m| m.feels_like),
        pressure: main.and_then(|m| m.pressure),
        humidity: main.and_then(|m| m.humidity),
        visibility: entry.visibility,
        clouds: entry.clouds.as_ref().and_then(|c| c.all),
        wind_speed: wind.and_then(|w| w.speed),
        wind_deg: wind.and_then(|w| w.deg),
        wind_gust: wind.and_then(|w| w.gust),
        pop: entry.pop,
        rain: hourly_rate(entry.rain.as_ref()),
        snow: hourly_rate(entry.snow.as_ref()),
        weather: entry.weather,
    }
}

/// A 3-hour accumulation expressed as a per-hour rate.
fn hourly_rate(acc: Option<&ThreeHourAccumulation>) -> Option<Precipitation> {
    let total = acc?.three_hour.filter(|v| *v != 0.0)?;
    Some(Precipitation {
        one_hour: Some(total / 3.0),
    })
}

fn local_date(dt: i64, offset: FixedOffset) -> Option<NaiveDate> {
    DateTime::from_timestamp(dt, 0).map(|utc| utc.with_timezone(&offset).date_naive())
}

fn summarize_day(date: NaiveDate, samples: &[&HourlyPoint], offset: FixedOffset) -> DailyPoint {
    let first = samples[0];
    let last = samples[samples.len() - 1];
    let mid = samples[(samples.len() / 2).min(samples.len() - 1)];

    let temps: Vec<f64> = samples.iter().filter_map(|s| s.temp).collect();
    let min = temps.iter().copied().reduce(f64::min);
    let max = temps.iter().copied().reduce(f64::max);

    let pop = samples
        .iter()
        .map(|s| s.pop.unwrap_or(0.0))
        .fold(0.0, f64::max);

    let noon = date
        .and_hms_opt(12, 0, 0)
        .and_then(|naive| naive.and_local_timezone(offset).single())
        .map(|local| local.timestamp())
        .unwrap_or(first.dt);

    DailyPoint {
        dt: noon,
        temp: DailyTemps {
            day: mid.temp,
            min,
            max,
            morn: first.temp,
            eve: last.temp,
            night: last.temp,
        },
        feels_like: DailyFeelsLike {
            day: mid.feels_like,
            morn: first.feels_like,
            eve: last.feels_like,
            night: last.feels_like,
        },
        pressure: mid.pressure,
        humidity: mid.humidity,
        wind_speed: mid.wind_speed,
        wind_deg: mid.wind_deg,
        weather: mid.weather.clone(),
        pop: Some(pop),
    }
}
