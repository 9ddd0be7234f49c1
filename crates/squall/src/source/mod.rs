//! External collaborators consumed by the orchestrators.
//!
//! - [`PayloadFetcher`] resolves a [`WeatherQuery`] to a [`Payload`] or fails.
//! - [`TokenSource`] produces an incremental text sequence that may fail
//!   mid-way.
//! - [`SideContextUpdater`] persists conversation side context; it runs
//!   detached from the stream it was triggered by.
//!
//! All three are dyn-compatible: futures and streams are boxed so engines can
//! hold them as `Arc<dyn ...>`.

pub mod openrouter;

use std::future::Future;
use std::pin::Pin;

use chrono::NaiveDate;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::chunking::{Payload, day_span};
use crate::protocol::ContentType;
use crate::registry::StreamType;

pub use openrouter::OpenRouterTokenSource;

/// Boxed future returned by [`PayloadFetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Payload, String>> + Send + 'a>>;

/// Boxed token sequence returned by [`TokenSource::tokens`].
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;

/// Boxed future returned by [`SideContextUpdater::update`].
pub type UpdateFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

// ── Requests ───────────────────────────────────────────────────────

/// What to fetch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeatherQuery {
    Current {
        location: String,
    },
    Forecast {
        location: String,
        days: u32,
    },
    Historical {
        location: String,
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl WeatherQuery {
    pub fn location(&self) -> &str {
        match self {
            WeatherQuery::Current { location }
            | WeatherQuery::Forecast { location, .. }
            | WeatherQuery::Historical { location, .. } => location,
        }
    }

    /// Inclusive day span of a historical range, known before fetch.
    pub fn day_span(&self) -> Option<i64> {
        match self {
            WeatherQuery::Historical { start, end, .. } => Some(day_span(*start, *end)),
            _ => None,
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            WeatherQuery::Current { .. } => ContentType::CurrentWeather,
            WeatherQuery::Forecast { .. } => ContentType::Forecast,
            WeatherQuery::Historical { .. } => ContentType::Historical,
        }
    }

    pub fn stream_type(&self) -> StreamType {
        match self {
            WeatherQuery::Current { .. } => StreamType::Current,
            WeatherQuery::Forecast { .. } => StreamType::Forecast,
            WeatherQuery::Historical { .. } => StreamType::Historical,
        }
    }
}

/// A chat turn to answer.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatPrompt {
    pub message: String,
    pub client_id: String,
    /// Location the client is asking about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Free-form context text prepended to the system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ChatPrompt {
    pub fn new(client_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Side context to persist for a client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ContextUpdate {
    pub client_id: String,
    pub location: String,
    pub message: String,
}

// ── Traits ─────────────────────────────────────────────────────────

pub trait PayloadFetcher: Send + Sync {
    fn fetch<'a>(&'a self, query: &'a WeatherQuery) -> FetchFuture<'a>;
}

pub trait TokenSource: Send + Sync {
    /// Start producing tokens for `prompt`. Failures, including failure to
    /// start, are reported as `Err` items.
    fn tokens(&self, prompt: &ChatPrompt) -> TokenStream;
}

pub trait SideContextUpdater: Send + Sync {
    fn update(&self, update: ContextUpdate) -> UpdateFuture;
}

// ── Adapters ───────────────────────────────────────────────────────

/// Wrap an async closure as a [`PayloadFetcher`].
///
/// ```
/// use squall::chunking::Payload;
/// use squall::source::{FnFetcher, PayloadFetcher};
///
/// let fetcher = FnFetcher::new(|_query| async { Ok(Payload::Current(serde_json::json!({}))) });
/// # let _: &dyn PayloadFetcher = &fetcher;
/// ```
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(WeatherQuery) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Payload, String>> + Send + 'static,
    {
        Self { f }
    }
}

impl<F, Fut> PayloadFetcher for FnFetcher<F>
where
    F: Fn(WeatherQuery) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, String>> + Send + 'static,
{
    fn fetch<'a>(&'a self, query: &'a WeatherQuery) -> FetchFuture<'a> {
        Box::pin((self.f)(query.clone()))
    }
}

/// Replays a fixed token script for every prompt.
#[derive(Debug, Clone, Default)]
pub struct IterTokenSource {
    script: Vec<Result<String, String>>,
}

impl IterTokenSource {
    pub fn new(script: Vec<Result<String, String>>) -> Self {
        Self { script }
    }

    /// One token per whitespace-separated word, each keeping its trailing space.
    pub fn words(text: &str) -> Self {
        let mut script: Vec<Result<String, String>> = text
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        script.retain(|t| t.as_ref().is_ok_and(|s| !s.is_empty()));
        Self { script }
    }

    /// Append a failure after the scripted tokens.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.script.push(Err(message.into()));
        self
    }
}

impl TokenSource for IterTokenSource {
    fn tokens(&self, _prompt: &ChatPrompt) -> TokenStream {
        Box::pin(futures::stream::iter(self.script.clone()))
    }
}

/// Updater that accepts everything and stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUpdater;

impl SideContextUpdater for NoopUpdater {
    fn update(&self, _update: ContextUpdate) -> UpdateFuture {
        Box::pin(async { Ok(()) })
    }
}
