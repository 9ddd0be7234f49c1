//! Error taxonomy for stream admission and delivery.
//!
//! Only [`StreamError::AdmissionRejected`] and
//! [`StreamError::DuplicateStream`] ever reach a caller directly: they are
//! returned before a single message is emitted. Collaborator failures
//! ([`StreamError::FetchFailure`], [`StreamError::TokenSourceFailure`]) are
//! converted into an `Error` + `Complete` pair inside the stream and never
//! escape through the message channel.

use thiserror::Error;

use crate::protocol::codes;

/// Errors produced by the streaming engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The registry is full. Not retried automatically.
    #[error("stream {stream_id} rejected: {active}/{max} streams active")]
    AdmissionRejected {
        stream_id: String,
        active: usize,
        max: usize,
    },

    /// A stream with the same id is already active.
    #[error("stream {0} is already active")]
    DuplicateStream(String),

    /// The payload fetcher failed to produce a payload.
    #[error("fetch failed: {0}")]
    FetchFailure(String),

    /// The token source failed mid-sequence.
    #[error("token source failed: {0}")]
    TokenSourceFailure(String),

    /// The stream outlived the maximum duration and was reclaimed.
    #[error("stream {stream_id} expired after {max_duration_ms}ms")]
    Expired {
        stream_id: String,
        max_duration_ms: u64,
    },

    /// An emission broke the message ordering rules. Indicates a bug in an
    /// orchestrator, not a runtime condition.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StreamError {
    /// Wire error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdmissionRejected { .. } | Self::DuplicateStream(_) => codes::CAPACITY_EXCEEDED,
            Self::FetchFailure(_) => codes::FETCH_ERROR,
            Self::TokenSourceFailure(_) => codes::CHAT_STREAM_ERROR,
            Self::Expired { .. } => codes::STREAM_EXPIRED,
            Self::ProtocolViolation(_) => codes::PROTOCOL_VIOLATION,
            Self::InvalidConfig(_) => codes::INVALID_CONFIG,
        }
    }

    /// Whether this error is a pre-stream refusal (no messages were emitted).
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::AdmissionRejected { .. } | Self::DuplicateStream(_)
        )
    }
}
