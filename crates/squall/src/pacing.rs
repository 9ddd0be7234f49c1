//! Token pacing: turn an incremental token sequence into bounded, rate-limited
//! `Data` chunks.
//!
//! Tokens are buffered until `max_tokens_per_chunk` have accumulated. A full
//! chunk is held back until either the next non-empty token arrives (so it is
//! not the last) or the sequence ends (so it is), which keeps `isLast` exact
//! even when the token count divides evenly. If the source stalls for longer
//! than the hold timeout, the held chunk goes out as non-final; should the
//! sequence then end with nothing buffered, an empty final chunk closes it.
//! Successive `Data` emissions are separated by a fixed delay.
//!
//! On an upstream failure a held full chunk is still delivered, the partial
//! buffer is discarded, and the stream terminates with
//! `Error { code: "CHAT_STREAM_ERROR" }` then `Complete`.

use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::emitter::{EmitError, Emitter};
use crate::error::StreamError;

/// Counters describing one paced run.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PacingReport {
    /// `Data` messages emitted.
    pub chunks: u32,
    /// Non-empty tokens consumed.
    pub tokens: usize,
    /// Empty tokens skipped.
    pub skipped: usize,
    /// Tokens buffered but never delivered because the source failed.
    pub discarded: usize,
    /// Upstream failure message, when the source failed.
    pub failure: Option<String>,
}

impl PacingReport {
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenPacer {
    max_tokens_per_chunk: usize,
    delay: Duration,
    hold_timeout: Duration,
}

impl TokenPacer {
    pub fn new(max_tokens_per_chunk: usize, delay: Duration) -> Self {
        Self {
            max_tokens_per_chunk: max_tokens_per_chunk.max(1),
            delay,
            hold_timeout: Duration::ZERO,
        }
    }

    /// Send a held full chunk after `timeout` without a new token.
    /// Zero waits indefinitely.
    pub fn with_hold_timeout(mut self, timeout: Duration) -> Self {
        self.hold_timeout = timeout;
        self
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.max_tokens_per_chunk, config.token_delay)
            .with_hold_timeout(config.chunk_hold_timeout)
    }

    pub fn max_tokens_per_chunk(&self) -> usize {
        self.max_tokens_per_chunk
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Drain `tokens` into `emitter` and terminate the stream.
    ///
    /// The emitter must already have sent `Metadata` (and any leading
    /// `Progress`). On return it is closed unless the consumer disconnected.
    pub async fn run<S>(&self, tokens: S, emitter: &mut Emitter) -> Result<PacingReport, EmitError>
    where
        S: Stream<Item = Result<String, String>>,
    {
        let mut tokens = std::pin::pin!(tokens);
        let mut report = PacingReport::default();
        let mut buffer = String::new();
        let mut buffered = 0usize;
        let mut held: Option<String> = None;

        loop {
            let next = if held.is_some() && !self.hold_timeout.is_zero() {
                match tokio::time::timeout(self.hold_timeout, tokens.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        if let Some(full) = held.take() {
                            debug!(
                                stream_id = emitter.stream_id(),
                                "token source stalled, flushing held chunk"
                            );
                            self.emit(emitter, full, false, &mut report).await?;
                        }
                        continue;
                    }
                }
            } else {
                tokens.next().await
            };
            let Some(item) = next else { break };

            match item {
                Ok(token) if token.is_empty() => report.skipped += 1,
                Ok(token) => {
                    report.tokens += 1;
                    if let Some(full) = held.take() {
                        self.emit(emitter, full, false, &mut report).await?;
                    }
                    buffer.push_str(&token);
                    buffered += 1;
                    if buffered >= self.max_tokens_per_chunk {
                        held = Some(std::mem::take(&mut buffer));
                        buffered = 0;
                    }
                }
                Err(e) => {
                    if let Some(full) = held.take() {
                        self.emit(emitter, full, false, &mut report).await?;
                    }
                    report.discarded = buffered;
                    warn!(
                        stream_id = emitter.stream_id(),
                        discarded = buffered,
                        "token source failed: {e}"
                    );
                    report.failure = Some(e.clone());
                    let err = StreamError::TokenSourceFailure(e);
                    emitter.fail(err.to_string(), err.code()).await?;
                    return Ok(report);
                }
            }
        }

        let last = held.or_else(|| (!buffer.is_empty()).then_some(buffer));
        match last {
            Some(text) => self.emit(emitter, text, true, &mut report).await?,
            // Only reachable after a stall flush: close the chunk sequence.
            None if report.chunks > 0 => {
                self.emit(emitter, String::new(), true, &mut report).await?;
            }
            None => {}
        }
        emitter.complete().await?;

        debug!(
            stream_id = emitter.stream_id(),
            chunks = report.chunks,
            tokens = report.tokens,
            skipped = report.skipped,
            "pacing finished"
        );
        Ok(report)
    }

    async fn emit(
        &self,
        emitter: &mut Emitter,
        text: String,
        is_last: bool,
        report: &mut PacingReport,
    ) -> Result<(), EmitError> {
        if report.chunks > 0 && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        emitter.data(Value::String(text), is_last).await?;
        report.chunks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ContentType, StreamMessage, codes};
    use futures::stream;
    use tokio::sync::mpsc;

    async fn pace(
        pacer: TokenPacer,
        script: Vec<Result<String, String>>,
    ) -> (PacingReport, Vec<StreamMessage>) {
        let (tx, mut rx) = mpsc::channel(256);
        let mut emitter = Emitter::new("st-pace", tx);
        emitter.metadata(ContentType::Chat).await.unwrap();
        let report = pacer.run(stream::iter(script), &mut emitter).await.unwrap();
        drop(emitter);
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        (report, out)
    }

    fn ok(tokens: &[&str]) -> Vec<Result<String, String>> {
        tokens.iter().map(|t| Ok(t.to_string())).collect()
    }

    fn data(msgs: &[StreamMessage]) -> Vec<(u32, String, bool)> {
        msgs.iter()
            .filter_map(|m| match m {
                StreamMessage::Data {
                    chunk_index,
                    payload,
                    is_last,
                } => Some((*chunk_index, payload.as_str()?.to_string(), *is_last)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn short_sequence_is_one_last_chunk() {
        let pacer = TokenPacer::new(10, Duration::ZERO);
        let (report, msgs) = pace(pacer, ok(&["The ", "weather "])).await;
        assert_eq!(msgs.len(), 3);
        assert_eq!(data(&msgs), vec![(0, "The weather ".into(), true)]);
        assert_eq!(msgs[2], StreamMessage::Complete);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.tokens, 2);
    }

    #[tokio::test]
    async fn empty_tokens_are_skipped() {
        let pacer = TokenPacer::new(2, Duration::ZERO);
        let (report, msgs) = pace(pacer, ok(&["a", "", "b", "", "c"])).await;
        assert_eq!(
            data(&msgs),
            vec![(0, "ab".into(), false), (1, "c".into(), true)]
        );
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn exact_multiple_still_marks_last() {
        let pacer = TokenPacer::new(2, Duration::ZERO);
        let (_, msgs) = pace(pacer, ok(&["a", "b", "c", "d"])).await;
        assert_eq!(
            data(&msgs),
            vec![(0, "ab".into(), false), (1, "cd".into(), true)]
        );
    }

    #[tokio::test]
    async fn no_tokens_means_no_data() {
        let pacer = TokenPacer::new(10, Duration::ZERO);
        let (report, msgs) = pace(pacer, vec![]).await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1], StreamMessage::Complete);
        assert_eq!(report.chunks, 0);
    }

    #[tokio::test]
    async fn failure_discards_partial_buffer() {
        let pacer = TokenPacer::new(10, Duration::ZERO);
        let script = vec![Ok("The ".to_string()), Err("upstream reset".to_string())];
        let (report, msgs) = pace(pacer, script).await;
        assert!(matches!(msgs[0], StreamMessage::Metadata { .. }));
        assert_eq!(
            msgs[1],
            StreamMessage::error(
                "token source failed: upstream reset",
                codes::CHAT_STREAM_ERROR
            )
        );
        assert_eq!(msgs[2], StreamMessage::Complete);
        assert_eq!(msgs.len(), 3);
        assert_eq!(report.discarded, 1);
        assert!(report.failed());
    }

    #[tokio::test]
    async fn failure_delivers_held_full_chunk() {
        let pacer = TokenPacer::new(2, Duration::ZERO);
        let mut script = ok(&["a", "b"]);
        script.push(Err("gone".into()));
        let (_, msgs) = pace(pacer, script).await;
        assert_eq!(data(&msgs), vec![(0, "ab".into(), false)]);
        assert!(matches!(msgs[2], StreamMessage::Error { .. }));
        assert_eq!(msgs[3], StreamMessage::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_source_flushes_held_chunk() {
        let pacer =
            TokenPacer::new(2, Duration::ZERO).with_hold_timeout(Duration::from_millis(100));
        let (tx, mut rx) = mpsc::channel(16);
        let mut emitter = Emitter::new("st-stall", tx);
        emitter.metadata(ContentType::Chat).await.unwrap();

        // Two tokens, then nothing for a long while before the source ends.
        let tokens = stream::iter(ok(&["a", "b"])).chain(stream::once(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, String>(String::new())
        }));
        let run = tokio::spawn(async move { pacer.run(tokens, &mut emitter).await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(rx.recv().await, Some(StreamMessage::Metadata { .. })));
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamMessage::data(0, "ab".into(), false)
        );

        run.await.unwrap().unwrap();
        let mut rest = Vec::new();
        while let Some(msg) = rx.recv().await {
            rest.push(msg);
        }
        assert_eq!(
            rest,
            vec![StreamMessage::data(1, "".into(), true), StreamMessage::Complete]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delay_separates_chunks() {
        let pacer = TokenPacer::new(1, Duration::from_millis(50));
        let start = tokio::time::Instant::now();
        let (report, _) = pace(pacer, ok(&["a", "b", "c"])).await;
        assert_eq!(report.chunks, 3);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
