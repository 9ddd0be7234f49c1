//! Stream orchestration.
//!
//! [`StreamEngine`] admits a request through the shared
//! [`AdmissionRegistry`], opens a bounded channel, and spawns one task that
//! drives an [`Emitter`] through the orchestrator body. The caller receives a
//! [`MessageStream`] to forward to its transport.
//!
//! ```text
//! request ──► try_acquire ──► spawn(body) ──► Emitter ──► mpsc ──► MessageStream
//!                  │                                                    │
//!                  └──────────── StreamGuard dropped on exit ◄──────────┘ (drop = cancel)
//! ```
//!
//! Dropping the [`MessageStream`] cancels the task at its next suspension
//! point; the admission slot is released exactly once either way. A stream
//! reclaimed by the expiry sweep is stopped the same way and closed with
//! `Error { code: "STREAM_EXPIRED" }` then `Complete`.

mod chat;
mod weather;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::chunking::ChunkSelector;
use crate::config::StreamConfig;
use crate::emitter::{EmitError, Emitter, Terminator};
use crate::error::StreamError;
use crate::pacing::TokenPacer;
use crate::protocol::{StreamMessage, generate_stream_id};
use crate::registry::{AdmissionRegistry, StreamGuard, StreamType};

/// Identifies who is asking for a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRequest {
    /// Caller-chosen id; one is generated when `None`.
    pub stream_id: Option<String>,
    pub client_id: String,
}

impl StreamRequest {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            stream_id: None,
            client_id: client_id.into(),
        }
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }
}

/// The consumer side of one stream.
#[derive(Debug)]
pub struct MessageStream {
    stream_id: String,
    stream_type: StreamType,
    inner: ReceiverStream<StreamMessage>,
}

impl MessageStream {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }
}

impl Stream for MessageStream {
    type Item = StreamMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Admission, chunking and pacing wired together.
///
/// Cheap to clone; clones share one registry. Stream-starting methods spawn
/// onto the current tokio runtime.
#[derive(Debug, Clone)]
pub struct StreamEngine {
    registry: Arc<AdmissionRegistry>,
    config: StreamConfig,
    selector: ChunkSelector,
    pacer: TokenPacer,
}

impl StreamEngine {
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        let registry = Arc::new(AdmissionRegistry::from_config(&config));
        Self::with_registry(config, registry)
    }

    /// Build an engine around an existing registry.
    pub fn with_registry(
        config: StreamConfig,
        registry: Arc<AdmissionRegistry>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            selector: ChunkSelector::from_config(&config),
            pacer: TokenPacer::from_config(&config),
            registry,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<AdmissionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn selector(&self) -> &ChunkSelector {
        &self.selector
    }

    /// Admit `request` and open its channel.
    fn open(
        &self,
        request: &StreamRequest,
        stream_type: StreamType,
    ) -> Result<(StreamGuard, Emitter, MessageStream), StreamError> {
        let stream_id = request
            .stream_id
            .clone()
            .unwrap_or_else(generate_stream_id);
        let guard = self.registry.try_acquire(
            stream_id.clone(),
            request.client_id.clone(),
            stream_type,
        )?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let stream = MessageStream {
            stream_id: stream_id.clone(),
            stream_type,
            inner: ReceiverStream::new(rx),
        };
        Ok((guard, Emitter::new(stream_id, tx), stream))
    }

    /// Admit `request` and run `body` on its own task.
    fn launch<F, Fut>(
        &self,
        request: &StreamRequest,
        stream_type: StreamType,
        body: F,
    ) -> Result<MessageStream, StreamError>
    where
        F: FnOnce(Emitter) -> Fut,
        Fut: Future<Output = Result<(), EmitError>> + Send + 'static,
    {
        let (guard, emitter, stream) = self.open(request, stream_type)?;
        let terminator = emitter.terminator();
        let task = body(emitter);
        let expired = StreamError::Expired {
            stream_id: stream.stream_id.clone(),
            max_duration_ms: self.registry.max_duration().as_millis() as u64,
        };
        tokio::spawn(drive(guard, terminator, task, expired));
        Ok(stream)
    }
}

enum Outcome {
    Finished(Result<(), EmitError>),
    Cancelled,
    Expired,
}

async fn drive<Fut>(
    mut guard: StreamGuard,
    terminator: Terminator,
    body: Fut,
    expired: StreamError,
) where
    Fut: Future<Output = Result<(), EmitError>>,
{
    // The body, and the emitter it owns, is dropped when the select ends.
    // Polling the body first lets it open the stream before an expiry is seen.
    let outcome = tokio::select! {
        biased;
        result = body => Outcome::Finished(result),
        () = terminator.closed() => Outcome::Cancelled,
        () = guard.expired() => Outcome::Expired,
    };

    match outcome {
        Outcome::Finished(Ok(())) => debug!(stream_id = guard.stream_id(), "Stream finished"),
        Outcome::Finished(Err(EmitError::Disconnected)) => {
            debug!(stream_id = guard.stream_id(), "Consumer disconnected mid-send");
        }
        Outcome::Finished(Err(EmitError::Protocol(e))) => {
            error!(stream_id = guard.stream_id(), "Stream aborted: {e}");
        }
        Outcome::Cancelled => {
            debug!(stream_id = guard.stream_id(), "Consumer went away, stream cancelled");
        }
        Outcome::Expired => {
            warn!(stream_id = guard.stream_id(), "Stream expired, terminating");
            if let Err(e) = terminator.terminate(&expired).await {
                debug!(stream_id = guard.stream_id(), "Expired stream not terminated: {e}");
            }
        }
    }
    guard.release();
}

/// Sleep unless `delay` is zero.
async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Payload;
    use crate::source::{FnFetcher, WeatherQuery};
    use futures::StreamExt;
    use serde_json::json;

    fn engine(max: usize) -> StreamEngine {
        StreamEngine::new(
            StreamConfig::default()
                .with_max_concurrent(max)
                .without_delays(),
        )
        .unwrap()
    }

    fn current() -> WeatherQuery {
        WeatherQuery::Current {
            location: "Reykjavik".into(),
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = StreamEngine::new(StreamConfig::default().with_channel_capacity(0)).unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn caller_supplied_id_is_used() {
        let engine = engine(4);
        let fetcher = Arc::new(FnFetcher::new(|_| async { Ok(Payload::Current(json!({}))) }));
        let request = StreamRequest::new("c1").with_stream_id("st-mine");
        let stream = engine.data_stream(&request, current(), fetcher).unwrap();
        assert_eq!(stream.stream_id(), "st-mine");
        assert_eq!(stream.stream_type(), StreamType::Current);
        let msgs: Vec<_> = stream.collect().await;
        assert_eq!(
            msgs[0],
            StreamMessage::metadata("st-mine", crate::protocol::ContentType::CurrentWeather)
        );
    }

    #[tokio::test]
    async fn slot_is_released_after_completion() {
        let engine = engine(1);
        let fetcher = Arc::new(FnFetcher::new(|_| async { Ok(Payload::Current(json!(1))) }));
        let stream = engine
            .data_stream(&StreamRequest::new("c1"), current(), fetcher.clone())
            .unwrap();
        let err = engine
            .data_stream(&StreamRequest::new("c2"), current(), fetcher.clone())
            .unwrap_err();
        assert!(err.is_admission());

        let _: Vec<_> = stream.collect().await;
        tokio::task::yield_now().await;
        assert_eq!(engine.registry().active_count(), 0);
        assert!(
            engine
                .data_stream(&StreamRequest::new("c2"), current(), fetcher)
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn swept_stream_ends_with_expired_error() {
        let engine = StreamEngine::new(
            StreamConfig::default()
                .with_max_concurrent(1)
                .with_max_duration(Duration::from_millis(100))
                .without_delays(),
        )
        .unwrap();
        let fetcher = Arc::new(FnFetcher::new(|_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Payload::Current(json!(null)))
        }));
        let stream = engine
            .data_stream(&StreamRequest::new("c1"), current(), fetcher.clone())
            .unwrap();

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(engine.registry().sweep_expired(), 1);

        let msgs: Vec<_> = tokio::time::timeout(Duration::from_secs(1), stream.collect())
            .await
            .expect("swept stream terminates");
        assert_eq!(msgs.len(), 3);
        assert!(matches!(msgs[0], StreamMessage::Metadata { .. }));
        assert!(matches!(
            &msgs[1],
            StreamMessage::Error { code, .. } if code == crate::protocol::codes::STREAM_EXPIRED
        ));
        assert_eq!(msgs[2], StreamMessage::Complete);

        assert!(
            engine
                .data_stream(&StreamRequest::new("c2"), current(), fetcher)
                .is_ok()
        );
    }

    #[tokio::test]
    async fn dropping_consumer_releases_slot() {
        let engine = engine(1);
        let fetcher = Arc::new(FnFetcher::new(|_| async {
            futures::future::pending::<()>().await;
            Ok(Payload::Current(json!(null)))
        }));
        let stream = engine
            .data_stream(&StreamRequest::new("c1"), current(), fetcher)
            .unwrap();
        assert!(engine.registry().is_at_capacity());
        drop(stream);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.registry().active_count(), 0);
        assert_eq!(engine.registry().total_served(), 1);
    }
}
