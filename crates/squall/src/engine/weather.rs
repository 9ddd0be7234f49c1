//! Payload orchestrators: fetch once, then deliver by chunk plan.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{MessageStream, StreamEngine, StreamRequest, pause};
use crate::chunking::{ChunkPlan, ChunkSelector};
use crate::config::StreamConfig;
use crate::emitter::{EmitError, Emitter};
use crate::error::StreamError;
use crate::protocol::codes;
use crate::registry::StreamType;
use crate::source::{PayloadFetcher, WeatherQuery};

/// Fixed stages announced by [`StreamEngine::progress_stream`].
const STAGES: [(u32, &str); 3] = [
    (25, "Fetching data"),
    (50, "Processing data"),
    (75, "Preparing delivery"),
];

impl StreamEngine {
    /// `Metadata → Data* → Complete`, chunked by the payload's plan.
    pub fn data_stream(
        &self,
        request: &StreamRequest,
        query: WeatherQuery,
        fetcher: Arc<dyn PayloadFetcher>,
    ) -> Result<MessageStream, StreamError> {
        let ctx = Delivery::new(self, false);
        self.launch(request, query.stream_type(), move |emitter| {
            ctx.run(emitter, query, fetcher)
        })
    }

    /// Like [`data_stream`](Self::data_stream), with a `Progress` before every
    /// `Data`. A historical range also announces its plan before fetching.
    pub fn chunked_stream(
        &self,
        request: &StreamRequest,
        query: WeatherQuery,
        fetcher: Arc<dyn PayloadFetcher>,
    ) -> Result<MessageStream, StreamError> {
        let ctx = Delivery::new(self, true);
        self.launch(request, query.stream_type(), move |emitter| {
            ctx.run(emitter, query, fetcher)
        })
    }

    /// `Metadata → Progress(25, 50, 75) → Data* → Progress(100) → Complete`.
    pub fn progress_stream(
        &self,
        request: &StreamRequest,
        query: WeatherQuery,
        fetcher: Arc<dyn PayloadFetcher>,
    ) -> Result<MessageStream, StreamError> {
        let ctx = Delivery::new(self, false);
        self.launch(request, StreamType::Progress, move |mut emitter| async move {
            emitter.metadata(query.content_type()).await?;
            let (percent, label) = STAGES[0];
            emitter
                .progress(percent, 100, format!("{label} for {}", query.location()))
                .await?;

            let payload = match fetcher.fetch(&query).await {
                Ok(payload) => payload,
                Err(e) => return ctx.fetch_failed(&mut emitter, e).await,
            };

            for (percent, label) in &STAGES[1..] {
                pause(ctx.config.progress_stage_delay).await;
                emitter.progress(*percent, 100, *label).await?;
            }

            let plan = ctx.selector.plan(&payload);
            let chunks = plan.split(payload);
            ctx.send_chunks(&mut emitter, plan, chunks, false).await?;

            pause(ctx.config.progress_stage_delay).await;
            emitter.progress(100, 100, "Complete").await?;
            emitter.complete().await
        })
    }
}

/// Per-stream copy of what a payload body needs from the engine.
struct Delivery {
    config: StreamConfig,
    selector: ChunkSelector,
    annotate: bool,
}

impl Delivery {
    fn new(engine: &StreamEngine, annotate: bool) -> Self {
        Self {
            config: engine.config.clone(),
            selector: engine.selector,
            annotate,
        }
    }

    async fn run(
        self,
        mut emitter: Emitter,
        query: WeatherQuery,
        fetcher: Arc<dyn PayloadFetcher>,
    ) -> Result<(), EmitError> {
        emitter.metadata(query.content_type()).await?;

        // The plan for a historical range is known before the fetch.
        let early_plan = query.day_span().map(|span| self.selector.for_range(span));
        if self.annotate
            && let Some(plan) = early_plan.filter(ChunkPlan::is_multi)
        {
            emitter
                .progress(
                    0,
                    plan.unit_count as u32,
                    format!("Fetching {} chunks for {}", plan.unit_count, query.location()),
                )
                .await?;
        }

        let payload = match fetcher.fetch(&query).await {
            Ok(payload) => payload,
            Err(e) => return self.fetch_failed(&mut emitter, e).await,
        };

        let plan = early_plan.unwrap_or_else(|| self.selector.plan(&payload));
        debug!(
            stream_id = emitter.stream_id(),
            strategy = ?plan.strategy,
            units = plan.unit_count,
            "Delivering payload"
        );
        let chunks = plan.split(payload);
        self.send_chunks(&mut emitter, plan, chunks, self.annotate)
            .await?;
        emitter.complete().await
    }

    async fn send_chunks(
        &self,
        emitter: &mut Emitter,
        plan: ChunkPlan,
        chunks: Vec<serde_json::Value>,
        annotate: bool,
    ) -> Result<(), EmitError> {
        let total = chunks.len() as u32;
        let delay = self.config.chunk_delay(plan.strategy);
        for (index, chunk) in chunks.into_iter().enumerate() {
            let index = index as u32;
            if index > 0 {
                pause(delay).await;
            }
            if annotate {
                emitter
                    .progress(index + 1, total, format!("Chunk {} of {total}", index + 1))
                    .await?;
            }
            emitter.data(chunk, index + 1 == total).await?;
        }
        Ok(())
    }

    async fn fetch_failed(&self, emitter: &mut Emitter, message: String) -> Result<(), EmitError> {
        warn!(stream_id = emitter.stream_id(), "Fetch failed: {message}");
        let err = StreamError::FetchFailure(message);
        emitter.fail(err.to_string(), codes::FETCH_ERROR).await
    }
}
