//! Offline collaborators for running the server without upstream services.
//!
//! [`SyntheticWeather`] generates deterministic values from the location name
//! and date, so repeated requests stream identical payloads. The location
//! `"nowhere"` always fails, which exercises the `FETCH_ERROR` path.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{Datelike, Duration as DayDelta, NaiveDate, Utc};
use serde_json::{Value, json};
use squall::chunking::{Payload, day_span};
use squall::source::{
    ChatPrompt, ContextUpdate, FetchFuture, IterTokenSource, PayloadFetcher, SideContextUpdater,
    TokenSource, TokenStream, UpdateFuture, WeatherQuery,
};
use tracing::debug;

/// Location that always fails to resolve.
pub const UNKNOWN_LOCATION: &str = "nowhere";

const CONDITIONS: [&str; 5] = ["clear", "partly cloudy", "overcast", "light rain", "windy"];

// ── Weather ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SyntheticWeather {
    latency: Duration,
}

impl SyntheticWeather {
    /// Delay every fetch by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl PayloadFetcher for SyntheticWeather {
    fn fetch<'a>(&'a self, query: &'a WeatherQuery) -> FetchFuture<'a> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let location = query.location();
            if location.eq_ignore_ascii_case(UNKNOWN_LOCATION) {
                return Err(format!("unknown location: {location}"));
            }
            let seed = seed(location);
            debug!(location, ?query, "Generating synthetic weather");
            Ok(match query {
                WeatherQuery::Current { .. } => Payload::Current(current(location, seed)),
                WeatherQuery::Forecast { days, .. } => {
                    let today = Utc::now().date_naive();
                    Payload::Forecast {
                        days: (0..*days as i64)
                            .map(|d| forecast_day(today + DayDelta::days(d), seed))
                            .collect(),
                    }
                }
                WeatherQuery::Historical { start, end, .. } => Payload::Historical {
                    start: *start,
                    end: *end,
                    days: (0..day_span(*start, *end))
                        .map(|d| observed_day(*start + DayDelta::days(d), seed))
                        .collect(),
                },
            })
        })
    }
}

fn seed(location: &str) -> u32 {
    location
        .to_lowercase()
        .bytes()
        .fold(17u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
}

fn wobble(seed: u32, n: i64, range: u32) -> f64 {
    (seed.wrapping_add((n as u32).wrapping_mul(2_654_435_761)) % range) as f64
}

fn current(location: &str, seed: u32) -> Value {
    json!({
        "location": location,
        "observedAt": Utc::now(),
        "temperatureC": 5.0 + wobble(seed, 0, 20),
        "humidity": 40.0 + wobble(seed, 1, 50),
        "windKph": wobble(seed, 2, 40),
        "condition": CONDITIONS[seed as usize % CONDITIONS.len()],
    })
}

fn forecast_day(date: NaiveDate, seed: u32) -> Value {
    let n = date.num_days_from_ce() as i64;
    let low = wobble(seed, n, 12);
    let high = low + 4.0 + wobble(seed, n + 1, 8);
    let hourly: Vec<Value> = (0..24)
        .map(|hour| {
            let t = low + (high - low) * (1.0 - ((hour as f64 - 14.0).abs() / 14.0));
            json!({ "hour": hour, "temperatureC": (t * 10.0).round() / 10.0 })
        })
        .collect();
    json!({
        "date": date,
        "lowC": low,
        "highC": high,
        "condition": CONDITIONS[(seed as usize + n as usize) % CONDITIONS.len()],
        "hourly": hourly,
    })
}

fn observed_day(date: NaiveDate, seed: u32) -> Value {
    let n = date.num_days_from_ce() as i64;
    json!({
        "date": date,
        "meanC": wobble(seed, n, 25) - 2.0,
        "precipitationMm": wobble(seed, n + 7, 12),
    })
}

// ── Chat ────────────────────────────────────────────────────────────

/// Answers every prompt with a canned outlook, one word per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptedAnswer;

impl TokenSource for ScriptedAnswer {
    fn tokens(&self, prompt: &ChatPrompt) -> TokenStream {
        let place = prompt
            .location
            .as_deref()
            .map(|l| format!(" for {l}"))
            .unwrap_or_default();
        let text = format!(
            "Here is the outlook{place}: mild temperatures with a light breeze, \
             some cloud building through the afternoon and a chance of showers \
             in the evening. Pack a light jacket."
        );
        IterTokenSource::words(&text).tokens(prompt)
    }
}

// ── Side context ────────────────────────────────────────────────────

/// Keeps the latest [`ContextUpdate`] per client in memory.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    latest: Mutex<HashMap<String, ContextUpdate>>,
}

impl MemoryContextStore {
    pub fn location_of(&self, client_id: &str) -> Option<String> {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(client_id)
            .map(|u| u.location.clone())
    }
}

impl SideContextUpdater for MemoryContextStore {
    fn update(&self, update: ContextUpdate) -> UpdateFuture {
        debug!(client_id = %update.client_id, location = %update.location, "Storing side context");
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(update.client_id.clone(), update);
        Box::pin(async { Ok(()) })
    }
}
