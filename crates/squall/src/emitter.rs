//! Per-stream emission state machine.
//!
//! [`Emitter`] owns the sending half of a stream's bounded channel and checks
//! every outgoing message against the stream ordering rules:
//!
//! ```text
//! Opening --Metadata--> Body --Error--> Failed --Complete--> Closed
//!                        |                                    ^
//!                        +-------------Complete---------------+
//! ```
//!
//! Within `Body`, `Data.chunkIndex` must run `0, 1, 2, ...` with no gaps and
//! no `Data` after one marked `isLast`, and `Progress.current` must never
//! decrease. A breach is a bug in the caller: it asserts in debug builds and
//! is reported as [`StreamError::ProtocolViolation`] otherwise.
//!
//! A [`Terminator`] shares the emitter's state and can close the stream after
//! the body that owned the emitter has been dropped.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::StreamError;
use crate::protocol::{ContentType, StreamMessage};

/// Why a message could not be emitted.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The consumer dropped its end of the stream.
    #[error("consumer disconnected")]
    Disconnected,
    #[error(transparent)]
    Protocol(#[from] StreamError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Opening,
    Body,
    Failed,
    Closed,
}

/// Ordered, validated sender for one stream.
#[derive(Debug)]
pub struct Emitter {
    stream_id: String,
    tx: mpsc::Sender<StreamMessage>,
    state: EmitterState,
    shared: Arc<Mutex<EmitterState>>,
    next_chunk: u32,
    last_chunk_sent: bool,
    last_progress: Option<u32>,
    emitted: usize,
}

impl Emitter {
    pub fn new(stream_id: impl Into<String>, tx: mpsc::Sender<StreamMessage>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tx,
            state: EmitterState::Opening,
            shared: Arc::new(Mutex::new(EmitterState::Opening)),
            next_chunk: 0,
            last_chunk_sent: false,
            last_progress: None,
            emitted: 0,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn state(&self) -> EmitterState {
        self.state
    }

    /// Index the next `Data` message will carry.
    pub fn next_chunk_index(&self) -> u32 {
        self.next_chunk
    }

    /// Number of messages delivered into the channel so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Whether the terminal `Complete` has been emitted.
    pub fn is_closed(&self) -> bool {
        self.state == EmitterState::Closed
    }

    /// A handle that watches the consumer and can terminate the stream
    /// once this emitter is gone.
    pub fn terminator(&self) -> Terminator {
        Terminator {
            stream_id: self.stream_id.clone(),
            tx: self.tx.clone(),
            state: Arc::clone(&self.shared),
        }
    }

    /// Validate and send one message.
    pub async fn send(&mut self, msg: StreamMessage) -> Result<(), EmitError> {
        let next = self.check(&msg)?;
        trace!(stream_id = %self.stream_id, kind = msg.event_name(), "emit");
        self.tx
            .send(msg)
            .await
            .map_err(|_| EmitError::Disconnected)?;
        self.apply(next);
        Ok(())
    }

    pub async fn metadata(&mut self, content_type: ContentType) -> Result<(), EmitError> {
        let msg = StreamMessage::metadata(self.stream_id.clone(), content_type);
        self.send(msg).await
    }

    pub async fn progress(
        &mut self,
        current: u32,
        total: u32,
        message: impl Into<String>,
    ) -> Result<(), EmitError> {
        self.send(StreamMessage::progress(current, total, message))
            .await
    }

    /// Send the next `Data` chunk, numbering it automatically.
    pub async fn data(
        &mut self,
        payload: serde_json::Value,
        is_last: bool,
    ) -> Result<(), EmitError> {
        let msg = StreamMessage::data(self.next_chunk, payload, is_last);
        self.send(msg).await
    }

    /// Emit `Error` followed by `Complete`.
    pub async fn fail(
        &mut self,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Result<(), EmitError> {
        self.send(StreamMessage::error(message, code)).await?;
        self.complete().await
    }

    pub async fn complete(&mut self) -> Result<(), EmitError> {
        self.send(StreamMessage::complete()).await
    }

    /// Compute the state transition for `msg` without applying it.
    fn check(&self, msg: &StreamMessage) -> Result<Transition, StreamError> {
        use EmitterState::*;

        let transition = match (self.state, msg) {
            (Closed, _) => return violation(&self.stream_id, "message after Complete"),
            (Opening, StreamMessage::Metadata { .. }) => Transition::To(Body),
            (Opening, _) => return violation(&self.stream_id, "first message must be Metadata"),
            (Failed, StreamMessage::Complete) => Transition::To(Closed),
            (Failed, _) => return violation(&self.stream_id, "only Complete may follow Error"),
            (Body, StreamMessage::Metadata { .. }) => {
                return violation(&self.stream_id, "duplicate Metadata");
            }
            (Body, StreamMessage::Progress { current, total, .. }) => {
                if current > total {
                    return violation(&self.stream_id, "progress exceeds total");
                }
                if self.last_progress.is_some_and(|last| *current < last) {
                    return violation(&self.stream_id, "progress went backwards");
                }
                Transition::Progress(*current)
            }
            (
                Body,
                StreamMessage::Data {
                    chunk_index,
                    is_last,
                    ..
                },
            ) => {
                if self.last_chunk_sent {
                    return violation(&self.stream_id, "Data after the last chunk");
                }
                if *chunk_index != self.next_chunk {
                    return violation(
                        &self.stream_id,
                        &format!(
                            "chunk index {chunk_index} out of order (expected {})",
                            self.next_chunk
                        ),
                    );
                }
                Transition::Data { is_last: *is_last }
            }
            (Body, StreamMessage::Error { .. }) => Transition::To(Failed),
            (Body, StreamMessage::Complete) => Transition::To(Closed),
        };
        Ok(transition)
    }

    fn apply(&mut self, transition: Transition) {
        self.emitted += 1;
        match transition {
            Transition::To(state) => {
                self.state = state;
                *self.shared.lock().unwrap_or_else(|e| e.into_inner()) = state;
            }
            Transition::Progress(current) => self.last_progress = Some(current),
            Transition::Data { is_last } => {
                self.next_chunk += 1;
                self.last_chunk_sent = is_last;
            }
        }
    }
}

/// Closes a stream whose body was stopped from outside.
#[derive(Debug, Clone)]
pub struct Terminator {
    stream_id: String,
    tx: mpsc::Sender<StreamMessage>,
    state: Arc<Mutex<EmitterState>>,
}

impl Terminator {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// State the emitter last reached.
    pub fn state(&self) -> EmitterState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolves once the consumer goes away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Finish the stream with `Error` then `Complete` on behalf of a dropped
    /// body. Only valid once the emitter itself is gone.
    ///
    /// A stream that never sent `Metadata` is left to close without
    /// messages; one that already failed only gets its `Complete`.
    pub async fn terminate(&self, err: &StreamError) -> Result<(), EmitError> {
        let mut state = self.state();
        if state == EmitterState::Body {
            self.push(StreamMessage::error(err.to_string(), err.code()))
                .await?;
            state = EmitterState::Failed;
        }
        if state == EmitterState::Failed {
            self.push(StreamMessage::complete()).await?;
            state = EmitterState::Closed;
        }
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        Ok(())
    }

    async fn push(&self, msg: StreamMessage) -> Result<(), EmitError> {
        trace!(stream_id = %self.stream_id, kind = msg.event_name(), "terminate");
        self.tx.send(msg).await.map_err(|_| EmitError::Disconnected)
    }
}

enum Transition {
    To(EmitterState),
    Progress(u32),
    Data { is_last: bool },
}

fn violation<T>(stream_id: &str, what: &str) -> Result<T, StreamError> {
    debug_assert!(false, "protocol violation on {stream_id}: {what}");
    Err(StreamError::ProtocolViolation(format!("{stream_id}: {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn emitter() -> (Emitter, mpsc::Receiver<StreamMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (Emitter::new("st-test", tx), rx)
    }

    #[tokio::test]
    async fn full_lifecycle_is_accepted() {
        let (mut em, mut rx) = emitter();
        em.metadata(ContentType::Json).await.unwrap();
        em.progress(1, 2, "half").await.unwrap();
        em.data(json!("a"), false).await.unwrap();
        em.progress(2, 2, "done").await.unwrap();
        em.data(json!("b"), true).await.unwrap();
        em.complete().await.unwrap();
        assert!(em.is_closed());
        assert_eq!(em.emitted(), 6);

        let mut indices = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let StreamMessage::Data { chunk_index, .. } = msg {
                indices.push(chunk_index);
            }
        }
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn fail_emits_error_then_complete() {
        let (mut em, mut rx) = emitter();
        em.metadata(ContentType::Chat).await.unwrap();
        em.fail("upstream died", "CHAT_STREAM_ERROR").await.unwrap();
        assert!(em.is_closed());

        assert!(matches!(rx.try_recv().unwrap(), StreamMessage::Metadata { .. }));
        assert!(matches!(rx.try_recv().unwrap(), StreamMessage::Error { .. }));
        assert_eq!(rx.try_recv().unwrap(), StreamMessage::Complete);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_consumer_reports_disconnect() {
        let (mut em, rx) = emitter();
        drop(rx);
        let err = em.metadata(ContentType::Json).await.unwrap_err();
        assert!(matches!(err, EmitError::Disconnected));
        assert_eq!(em.state(), EmitterState::Opening);
    }

    #[tokio::test]
    async fn terminator_closes_an_open_body() {
        let (mut em, mut rx) = emitter();
        let terminator = em.terminator();
        em.metadata(ContentType::Forecast).await.unwrap();
        em.data(json!(1), false).await.unwrap();
        drop(em);

        let err = StreamError::Expired {
            stream_id: "st-test".into(),
            max_duration_ms: 10,
        };
        terminator.terminate(&err).await.unwrap();
        assert_eq!(terminator.state(), EmitterState::Closed);
        drop(terminator);

        let mut msgs = Vec::new();
        while let Some(msg) = rx.recv().await {
            msgs.push(msg);
        }
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[2], StreamMessage::error(err.to_string(), "STREAM_EXPIRED"));
        assert_eq!(msgs[3], StreamMessage::Complete);
    }

    #[tokio::test]
    async fn terminator_leaves_finished_streams_alone() {
        let (mut em, mut rx) = emitter();
        let terminator = em.terminator();
        em.metadata(ContentType::Chat).await.unwrap();
        em.complete().await.unwrap();
        drop(em);

        let err = StreamError::Expired {
            stream_id: "st-test".into(),
            max_duration_ms: 10,
        };
        terminator.terminate(&err).await.unwrap();
        drop(terminator);
        assert!(matches!(rx.recv().await, Some(StreamMessage::Metadata { .. })));
        assert_eq!(rx.recv().await, Some(StreamMessage::Complete));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    #[cfg_attr(debug_assertions, should_panic(expected = "protocol violation"))]
    async fn data_before_metadata_is_a_violation() {
        let (mut em, _rx) = emitter();
        let err = em.data(json!(1), true).await.unwrap_err();
        assert!(matches!(err, EmitError::Protocol(_)));
    }

    #[tokio::test]
    #[cfg_attr(debug_assertions, should_panic(expected = "protocol violation"))]
    async fn message_after_complete_is_a_violation() {
        let (mut em, _rx) = emitter();
        em.metadata(ContentType::Json).await.unwrap();
        em.complete().await.unwrap();
        let err = em.progress(1, 1, "late").await.unwrap_err();
        assert!(matches!(err, EmitError::Protocol(_)));
    }

    #[tokio::test]
    #[cfg_attr(debug_assertions, should_panic(expected = "protocol violation"))]
    async fn progress_must_not_decrease() {
        let (mut em, _rx) = emitter();
        em.metadata(ContentType::Json).await.unwrap();
        em.progress(3, 4, "three").await.unwrap();
        let err = em.progress(2, 4, "two").await.unwrap_err();
        assert!(matches!(err, EmitError::Protocol(_)));
    }

    #[tokio::test]
    #[cfg_attr(debug_assertions, should_panic(expected = "protocol violation"))]
    async fn data_after_error_is_a_violation() {
        let (mut em, _rx) = emitter();
        em.metadata(ContentType::Json).await.unwrap();
        em.send(StreamMessage::error("x", "FETCH_ERROR"))
            .await
            .unwrap();
        let err = em.data(json!(1), true).await.unwrap_err();
        assert!(matches!(err, EmitError::Protocol(_)));
    }
}
