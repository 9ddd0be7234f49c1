//! [`TokenSource`] backed by the OpenRouter chat completions API.
//!
//! Sends a streaming (`"stream": true`) request and yields each text content
//! delta as one token. Transport failures, non-2xx responses, and read errors
//! mid-body surface as `Err` items so the pacing engine can terminate the
//! stream cleanly.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace, warn};

use super::{ChatPrompt, TokenSource, TokenStream};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a concise weather assistant. \
Answer in plain prose, two or three sentences at most.";

pub struct OpenRouterTokenSource {
    client: reqwest::Client,
    api_key: String,
    model: String,
    system_prompt: String,
    referer: String,
    title: String,
}

impl OpenRouterTokenSource {
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("squall/0.3")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            referer: "https://github.com/squall-rs/squall".to_string(),
            title: "squall".to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &ChatPrompt) -> serde_json::Value {
        let mut system = self.system_prompt.clone();
        if let Some(location) = &prompt.location {
            system.push_str(&format!("\nThe user is asking about {location}."));
        }
        if let Some(context) = &prompt.context {
            system.push_str("\n\n");
            system.push_str(context);
        }
        json!({
            "model": self.model,
            "stream": true,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt.message },
            ],
        })
    }
}

impl TokenSource for OpenRouterTokenSource {
    fn tokens(&self, prompt: &ChatPrompt) -> TokenStream {
        debug!(model = %self.model, "sending streaming chat request");
        let request = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&self.request_body(prompt));
        let reader = SseReader {
            phase: Phase::Start(request),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
        };
        Box::pin(futures::stream::unfold(reader, SseReader::next))
    }
}

// ── SSE reading ────────────────────────────────────────────────────

enum Phase {
    Start(reqwest::RequestBuilder),
    Reading(reqwest::Response),
    Done,
}

struct SseReader {
    phase: Phase,
    decoder: SseDecoder,
    pending: VecDeque<String>,
}

impl SseReader {
    async fn next(mut self) -> Option<(Result<String, String>, Self)> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some((Ok(token), self));
            }
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::Start(request) => match request.send().await {
                    Err(e) => return Some((Err(format!("streaming request failed: {e}")), self)),
                    Ok(resp) if !resp.status().is_success() => {
                        let status = resp.status();
                        let text = resp.text().await.unwrap_or_default();
                        return Some((Err(format!("OpenRouter API HTTP {status}: {text}")), self));
                    }
                    Ok(resp) => self.phase = Phase::Reading(resp),
                },
                Phase::Reading(mut resp) => match resp.chunk().await {
                    Err(e) => {
                        return Some((Err(format!("failed to read streaming chunk: {e}")), self));
                    }
                    Ok(None) => self.decoder.finish(&mut self.pending),
                    Ok(Some(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes);
                        if !self.decoder.push(&text, &mut self.pending) {
                            self.phase = Phase::Reading(resp);
                        }
                    }
                },
            }
        }
    }
}

/// Line-oriented decoder for an OpenAI-style SSE body.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Feed raw body text, appending decoded text deltas to `out`.
    ///
    /// Returns `true` once `data: [DONE]` has been seen.
    fn push(&mut self, text: &str, out: &mut VecDeque<String>) -> bool {
        self.buffer.push_str(text);
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline_pos).collect();
            let line = line.trim();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if line == "data: [DONE]" {
                self.buffer.clear();
                return true;
            }
            if let Some(data) = line.strip_prefix("data: ") {
                out.extend(parse_sse_data(data));
            }
        }
        false
    }

    /// Decode whatever is left once the body ends without a trailing newline.
    fn finish(&mut self, out: &mut VecDeque<String>) {
        let remaining = std::mem::take(&mut self.buffer);
        let remaining = remaining.trim();
        if remaining != "data: [DONE]"
            && let Some(data) = remaining.strip_prefix("data: ")
        {
            out.extend(parse_sse_data(data));
        }
    }
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

/// Extract the non-empty text deltas from one SSE `data:` payload.
fn parse_sse_data(data: &str) -> Vec<String> {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let mut deltas = Vec::new();
            for choice in chunk.choices.unwrap_or_default() {
                if let Some(content) = choice.delta.and_then(|d| d.content)
                    && !content.is_empty()
                {
                    deltas.push(content);
                }
                if let Some(reason) = choice.finish_reason {
                    trace!("stream finish_reason: {reason}");
                }
            }
            deltas
        }
        Err(e) => {
            warn!("failed to parse SSE chunk: {e} (data: {data})");
            Vec::new()
        }
    }
}
