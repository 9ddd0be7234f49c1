//! Admission-controlled, paced event streaming for weather and chat payloads.
//!
//! `squall` turns a slow upstream (a weather fetch, an LLM token stream) into
//! an ordered, always-terminating sequence of [`StreamMessage`] values that a
//! transport can forward verbatim. The core abstraction is the
//! [`StreamEngine`]: it admits each request against a shared
//! [`AdmissionRegistry`], picks a chunk plan or paces tokens, and hands back a
//! [`MessageStream`].
//!
//! # Getting started
//!
//! ```
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use squall::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let engine = StreamEngine::new(StreamConfig::default().without_delays())?;
//! let source = Arc::new(IterTokenSource::words("Light rain until noon."));
//!
//! let stream = engine.chat_stream(
//!     &StreamRequest::new("client-1"),
//!     ChatPrompt::new("client-1", "Do I need an umbrella?"),
//!     source,
//! )?;
//! let messages: Vec<StreamMessage> = stream.collect().await;
//!
//! assert!(matches!(messages.first(), Some(StreamMessage::Metadata { .. })));
//! assert_eq!(messages.last(), Some(&StreamMessage::Complete));
//! # Ok(())
//! # }
//! ```
//!
//! # Where to find things
//!
//! - **Message model and ordering rules:** [`protocol`] for the values,
//!   [`emitter`] for the per-stream state machine that enforces
//!   Metadata-first, Complete-last, gap-free chunk indices and monotonic
//!   progress.
//!
//! - **Concurrency cap and expiry:** [`registry`]. Use
//!   [`spawn_sweeper`](registry::spawn_sweeper) to reclaim streams that
//!   outlive `max_duration`.
//!
//! - **How a payload is split:** [`chunking`] (`single`, `byDay`, `byWeek`,
//!   `byMonth`).
//!
//! - **How tokens are grouped and rate-limited:** [`pacing`].
//!
//! - **Plugging in data:** implement [`PayloadFetcher`](source::PayloadFetcher),
//!   [`TokenSource`](source::TokenSource) or
//!   [`SideContextUpdater`](source::SideContextUpdater); see
//!   [`OpenRouterTokenSource`](source::OpenRouterTokenSource) for a live LLM.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | [`StreamMessage`], [`ContentType`](protocol::ContentType), error codes, stream ids |
//! | [`emitter`] | [`Emitter`](emitter::Emitter) state machine over the outbound channel |
//! | [`registry`] | [`AdmissionRegistry`], [`StreamGuard`](registry::StreamGuard), expiry sweep |
//! | [`chunking`] | [`Payload`](chunking::Payload), [`ChunkPlan`](chunking::ChunkPlan), [`ChunkSelector`](chunking::ChunkSelector) |
//! | [`pacing`] | [`TokenPacer`](pacing::TokenPacer) |
//! | [`engine`] | [`StreamEngine`] orchestrators |
//! | [`source`] | Collaborator traits and adapters |
//! | [`config`] | [`StreamConfig`](config::StreamConfig) |
//! | [`error`] | [`StreamError`](error::StreamError) |

pub mod chunking;
pub mod config;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod pacing;
pub mod prelude;
pub mod protocol;
pub mod registry;
pub mod source;

pub use engine::{MessageStream, StreamEngine, StreamRequest};
pub use protocol::StreamMessage;
pub use registry::AdmissionRegistry;
