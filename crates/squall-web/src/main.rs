//! Stream server binary.
//!
//! Serves every squall orchestrator over Server-Sent Events, backed by the
//! offline demo collaborators or, with `--openrouter`, a live LLM for chat.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p squall-web
//! cargo run -p squall-web -- --port 8080 --max-concurrent 20
//! OPENROUTER_KEY=sk-... cargo run -p squall-web -- --openrouter --model google/gemini-2.5-flash
//! ```
//!
//! Then consume a stream with curl:
//!
//! ```bash
//! curl -N 'http://127.0.0.1:3001/api/weather/historical?location=Oslo&start=2023-01-01&end=2024-03-01'
//! curl -N -X POST http://127.0.0.1:3001/api/chat \
//!      -H 'content-type: application/json' \
//!      -d '{"message":"Do I need an umbrella?","client_id":"me","location":"Oslo"}'
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use squall::config::{
    DEFAULT_CHUNK_HOLD_MS, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_DURATION_MS,
    DEFAULT_MAX_TOKENS_PER_CHUNK, DEFAULT_TOKEN_DELAY_MS, StreamConfig,
};
use squall::source::OpenRouterTokenSource;
use squall::source::openrouter::DEFAULT_MODEL;
use squall::StreamEngine;
use squall_web::{Collaborators, WebConfig, spawn_web};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Admission-controlled weather and chat event streams.
#[derive(Parser)]
#[command(about = "Serve paced weather and chat streams over Server-Sent Events")]
struct Args {
    /// Interface to bind.
    #[arg(long, env = "SQUALL_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to bind.
    #[arg(long, env = "SQUALL_PORT", default_value_t = 3001)]
    port: u16,

    /// Maximum simultaneously active streams.
    #[arg(long, env = "SQUALL_MAX_CONCURRENT", default_value_t = DEFAULT_MAX_CONCURRENT)]
    max_concurrent: usize,

    /// Lifetime in milliseconds after which a stream is reclaimed.
    #[arg(long, env = "SQUALL_MAX_DURATION_MS", default_value_t = DEFAULT_MAX_DURATION_MS)]
    max_duration_ms: u64,

    /// Delay between paced chat chunks, in milliseconds.
    #[arg(long, env = "SQUALL_TOKEN_DELAY_MS", default_value_t = DEFAULT_TOKEN_DELAY_MS)]
    token_delay_ms: u64,

    /// Tokens buffered into one chat chunk.
    #[arg(long, env = "SQUALL_MAX_TOKENS_PER_CHUNK", default_value_t = DEFAULT_MAX_TOKENS_PER_CHUNK)]
    max_tokens_per_chunk: usize,

    /// Milliseconds a full chat chunk waits for the next token. 0 waits
    /// indefinitely.
    #[arg(long, env = "SQUALL_CHUNK_HOLD_MS", default_value_t = DEFAULT_CHUNK_HOLD_MS)]
    chunk_hold_ms: u64,

    /// Seconds between expiry sweeps.
    #[arg(long, env = "SQUALL_SWEEP_INTERVAL_SECS", default_value_t = 30)]
    sweep_interval_secs: u64,

    /// Answer chat with OpenRouter instead of the scripted demo answer.
    /// Reads the API key from OPENROUTER_KEY.
    #[arg(long)]
    openrouter: bool,

    /// OpenRouter model used with --openrouter.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
}

impl Args {
    fn stream_config(&self) -> StreamConfig {
        StreamConfig::default()
            .with_max_concurrent(self.max_concurrent)
            .with_max_duration(Duration::from_millis(self.max_duration_ms))
            .with_token_delay(Duration::from_millis(self.token_delay_ms))
            .with_max_tokens_per_chunk(self.max_tokens_per_chunk)
            .with_chunk_hold_timeout(Duration::from_millis(self.chunk_hold_ms))
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let engine = StreamEngine::new(args.stream_config()).map_err(|e| e.to_string())?;

    let mut collaborators = Collaborators::demo();
    if args.openrouter {
        let api_key = std::env::var("OPENROUTER_KEY")
            .map_err(|_| "Set OPENROUTER_KEY env var to your OpenRouter API key")?;
        let source = OpenRouterTokenSource::new(api_key)?.with_model(&args.model);
        info!(model = source.model(), "Chat answered by OpenRouter");
        collaborators = collaborators.with_tokens(Arc::new(source));
    }

    let web_config = WebConfig {
        bind_addr: (args.host, args.port).into(),
        sweep_interval: Duration::from_secs(args.sweep_interval_secs.max(1)),
    };
    let addr = spawn_web(engine, collaborators, web_config)
        .await
        .map_err(|e| format!("failed to bind {}:{}: {e}", args.host, args.port))?;
    println!("Streams: http://{addr}/api/stats");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for ctrl-c: {e}"))?;
    info!("Shutting down");
    Ok(())
}
