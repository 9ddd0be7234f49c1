//! Server-Sent-Events transport for `squall` streams.
//!
//! `squall-web` exposes every [`StreamEngine`] orchestrator as an HTTP
//! endpoint that answers with `text/event-stream`. Each SSE event is named
//! after the message kind (`metadata`, `progress`, `data`, `error`,
//! `complete`) and carries the JSON-encoded [`StreamMessage`] as its data.
//!
//! # Quick start
//!
//! ```ignore
//! use squall::prelude::*;
//! use squall_web::{Collaborators, WebConfig, spawn_web};
//!
//! let engine = StreamEngine::new(StreamConfig::default())?;
//! let addr = spawn_web(engine, Collaborators::demo(), WebConfig::default()).await?;
//! println!("Streams: http://{addr}/api/weather/forecast?location=Oslo&days=7");
//! ```
//!
//! # Architecture
//!
//! ```text
//! GET /api/weather/* ─┐
//! POST /api/chat ─────┼──▶ StreamEngine ──MessageStream──▶ sse::into_response ──▶ client
//!                     │          │
//! GET /api/stats ─────┴──▶ AdmissionRegistry ◀── sweeper (every sweep_interval)
//! ```
//!
//! Admission refusals are answered before any event with
//! `503 {"code":"CAPACITY_EXCEEDED","message":...}`.
//!
//! [`StreamMessage`]: squall::StreamMessage

mod api;
pub mod demo;
mod server;
pub mod sse;

pub use api::{ApiError, AppState, Collaborators};

use std::net::SocketAddr;
use std::time::Duration;

use squall::StreamEngine;
use squall::registry::spawn_sweeper;

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
    /// How often expired streams are reclaimed. Default: 30 seconds.
    pub sweep_interval: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Spawn the web server and the registry sweeper on the current Tokio runtime.
///
/// Returns the bound address. Both tasks run until the runtime shuts down.
pub async fn spawn_web(
    engine: StreamEngine,
    collaborators: Collaborators,
    config: WebConfig,
) -> std::io::Result<SocketAddr> {
    spawn_sweeper(engine.registry().clone(), config.sweep_interval);
    let router = server::build_router(AppState {
        engine,
        collaborators,
    });
    server::start_server(router, config.bind_addr).await
}
