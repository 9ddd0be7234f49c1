//! The wire-agnostic message model every stream emits.
//!
//! A stream is `Metadata`, then any number of `Progress` / `Data` messages,
//! optionally one `Error`, and exactly one terminal `Complete`. The
//! [`Emitter`](crate::emitter::Emitter) enforces that ordering at emission
//! time; this module only builds the values.
//!
//! Serialized with an internal `type` tag so a transport can forward the JSON
//! as-is:
//!
//! ```
//! use squall::protocol::StreamMessage;
//!
//! let msg = StreamMessage::data(0, serde_json::json!({"temp": 21.5}), true);
//! let json = serde_json::to_value(&msg).unwrap();
//! assert_eq!(json["type"], "data");
//! assert_eq!(json["chunkIndex"], 0);
//! assert_eq!(json["isLast"], true);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Error codes carried by [`StreamMessage::Error`].
pub mod codes {
    pub const FETCH_ERROR: &str = "FETCH_ERROR";
    pub const CHAT_STREAM_ERROR: &str = "CHAT_STREAM_ERROR";
    pub const CAPACITY_EXCEEDED: &str = "CAPACITY_EXCEEDED";
    pub const STREAM_EXPIRED: &str = "STREAM_EXPIRED";
    pub const PROTOCOL_VIOLATION: &str = "PROTOCOL_VIOLATION";
    pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
}

/// What the `Data` payloads of a stream contain.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    #[serde(rename = "weather/current")]
    CurrentWeather,
    #[serde(rename = "weather/forecast")]
    Forecast,
    #[serde(rename = "weather/historical")]
    Historical,
    #[serde(rename = "text/chat")]
    Chat,
    #[serde(rename = "application/json")]
    Json,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::CurrentWeather => "weather/current",
            ContentType::Forecast => "weather/forecast",
            ContentType::Historical => "weather/historical",
            ContentType::Chat => "text/chat",
            ContentType::Json => "application/json",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of a stream. Exactly one variant is active.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamMessage {
    /// Always first.
    Metadata {
        stream_id: String,
        content_type: ContentType,
    },
    /// Optional progress annotation. `current` never exceeds `total`.
    Progress {
        current: u32,
        total: u32,
        message: String,
    },
    /// One chunk of the payload.
    Data {
        chunk_index: u32,
        payload: serde_json::Value,
        is_last: bool,
    },
    /// At most one, immediately followed by `Complete`.
    Error { message: String, code: String },
    /// Always last.
    Complete,
}

impl StreamMessage {
    pub fn metadata(stream_id: impl Into<String>, content_type: ContentType) -> Self {
        StreamMessage::Metadata {
            stream_id: stream_id.into(),
            content_type,
        }
    }

    /// Build a progress message.
    ///
    /// `current > total` is a construction bug: it asserts in debug builds
    /// and is clamped to `total` otherwise.
    pub fn progress(current: u32, total: u32, message: impl Into<String>) -> Self {
        debug_assert!(
            current <= total,
            "protocol violation: progress {current} exceeds total {total}"
        );
        StreamMessage::Progress {
            current: current.min(total),
            total,
            message: message.into(),
        }
    }

    pub fn data(chunk_index: u32, payload: serde_json::Value, is_last: bool) -> Self {
        StreamMessage::Data {
            chunk_index,
            payload,
            is_last,
        }
    }

    pub fn error(message: impl Into<String>, code: impl Into<String>) -> Self {
        StreamMessage::Error {
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn complete() -> Self {
        StreamMessage::Complete
    }

    /// Event name used by transports (matches the serialized `type` tag).
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamMessage::Metadata { .. } => "metadata",
            StreamMessage::Progress { .. } => "progress",
            StreamMessage::Data { .. } => "data",
            StreamMessage::Error { .. } => "error",
            StreamMessage::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamMessage::Complete)
    }
}

/// Generate a unique stream id.
///
/// Combines wall-clock nanoseconds with a process-wide counter so ids
/// generated within the same nanosecond stay distinct.
pub fn generate_stream_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("st-{ts:x}-{count:04x}")
}
