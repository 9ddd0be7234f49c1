//! Configuration for the [`StreamEngine`](crate::engine::StreamEngine).
//!
//! Every field has a production default; override through the `with_*`
//! builder methods or by setting fields directly.
//!
//! ```
//! use std::time::Duration;
//! use squall::config::StreamConfig;
//!
//! let config = StreamConfig::default()
//!     .with_max_concurrent(10)
//!     .with_token_delay(Duration::from_millis(20));
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::chunking::ChunkStrategy;
use crate::error::StreamError;

/// Default cap on simultaneously active streams.
pub const DEFAULT_MAX_CONCURRENT: usize = 100;
/// Default maximum lifetime of one stream before the sweep reclaims it.
pub const DEFAULT_MAX_DURATION_MS: u64 = 600_000;
/// Default delay between paced chat chunks (~20 emissions/second).
pub const DEFAULT_TOKEN_DELAY_MS: u64 = 50;
/// Default number of tokens buffered into one chat chunk.
pub const DEFAULT_MAX_TOKENS_PER_CHUNK: usize = 10;
/// Default wait for the next token before a full chat chunk is sent anyway.
pub const DEFAULT_CHUNK_HOLD_MS: u64 = 500;

/// Engine-wide streaming configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Cap on simultaneously active streams. Default: `100`.
    pub max_concurrent: usize,
    /// Lifetime after which a stream is reclaimed by the sweep. Default: 10 minutes.
    pub max_duration: Duration,
    /// Delay between successive chat `Data` emissions. Default: `50ms`.
    pub token_delay: Duration,
    /// Tokens buffered per chat chunk. Default: `10`.
    pub max_tokens_per_chunk: usize,
    /// How long a full chat chunk waits for the next token before it is sent
    /// as a non-final chunk. Zero waits indefinitely. Default: `500ms`.
    pub chunk_hold_timeout: Duration,
    /// Payloads estimated below this element count are sent whole. Default: `100`.
    pub single_chunk_threshold: usize,
    /// Historical spans above this many days are chunked by week. Default: `90`.
    pub week_chunk_min_days: i64,
    /// Historical spans above this many days are chunked by month. Default: `365`.
    pub month_chunk_min_days: i64,
    /// Delay between per-day chunks. Default: `50ms`.
    pub day_chunk_delay: Duration,
    /// Delay between per-week chunks. Default: `50ms`.
    pub week_chunk_delay: Duration,
    /// Delay between per-month chunks. Default: `100ms`.
    pub month_chunk_delay: Duration,
    /// Delay between the fixed stages of a progress stream. Default: none.
    pub progress_stage_delay: Duration,
    /// Bounded channel size between a stream task and its consumer. Default: `32`.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_duration: Duration::from_millis(DEFAULT_MAX_DURATION_MS),
            token_delay: Duration::from_millis(DEFAULT_TOKEN_DELAY_MS),
            max_tokens_per_chunk: DEFAULT_MAX_TOKENS_PER_CHUNK,
            chunk_hold_timeout: Duration::from_millis(DEFAULT_CHUNK_HOLD_MS),
            single_chunk_threshold: 100,
            week_chunk_min_days: 90,
            month_chunk_min_days: 365,
            day_chunk_delay: Duration::from_millis(50),
            week_chunk_delay: Duration::from_millis(50),
            month_chunk_delay: Duration::from_millis(100),
            progress_stage_delay: Duration::ZERO,
            channel_capacity: 32,
        }
    }
}

impl StreamConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = duration;
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn with_max_tokens_per_chunk(mut self, max: usize) -> Self {
        self.max_tokens_per_chunk = max;
        self
    }

    pub fn with_chunk_hold_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_hold_timeout = timeout;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Remove every pacing delay and time-based flush. Handy for tests and
    /// batch replays.
    pub fn without_delays(mut self) -> Self {
        self.token_delay = Duration::ZERO;
        self.chunk_hold_timeout = Duration::ZERO;
        self.day_chunk_delay = Duration::ZERO;
        self.week_chunk_delay = Duration::ZERO;
        self.month_chunk_delay = Duration::ZERO;
        self.progress_stage_delay = Duration::ZERO;
        self
    }

    /// Inter-chunk delay for a chunking strategy.
    pub fn chunk_delay(&self, strategy: ChunkStrategy) -> Duration {
        match strategy {
            ChunkStrategy::Single => Duration::ZERO,
            ChunkStrategy::ByDay => self.day_chunk_delay,
            ChunkStrategy::ByWeek => self.week_chunk_delay,
            ChunkStrategy::ByMonth => self.month_chunk_delay,
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.max_concurrent == 0 {
            return Err(StreamError::InvalidConfig(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if self.max_tokens_per_chunk == 0 {
            return Err(StreamError::InvalidConfig(
                "max_tokens_per_chunk must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(StreamError::InvalidConfig(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.month_chunk_min_days < self.week_chunk_min_days {
            return Err(StreamError::InvalidConfig(format!(
                "month threshold ({}) below week threshold ({})",
                self.month_chunk_min_days, self.week_chunk_min_days
            )));
        }
        Ok(())
    }
}
