//! Convenience re-exports for common `squall` types.
//!
//! ```
//! use squall::prelude::*;
//! ```
//!
//! Covers what a transport needs to start and forward streams. Emitter and
//! decoder internals are left out; import those from their modules.

// ── Engine ──────────────────────────────────────────────────────────
pub use crate::engine::{MessageStream, StreamEngine, StreamRequest};

// ── Protocol ────────────────────────────────────────────────────────
pub use crate::protocol::{ContentType, StreamMessage, codes, generate_stream_id};

// ── Admission ───────────────────────────────────────────────────────
pub use crate::registry::{AdmissionRegistry, RegistryStats, StreamType, spawn_sweeper};

// ── Configuration and errors ────────────────────────────────────────
pub use crate::config::StreamConfig;
pub use crate::error::StreamError;

// ── Chunking and pacing ─────────────────────────────────────────────
pub use crate::chunking::{ChunkPlan, ChunkStrategy, Payload};
pub use crate::pacing::{PacingReport, TokenPacer};

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::source::{
    ChatPrompt, ContextUpdate, FnFetcher, IterTokenSource, NoopUpdater, OpenRouterTokenSource,
    PayloadFetcher, SideContextUpdater, TokenSource, WeatherQuery,
};
