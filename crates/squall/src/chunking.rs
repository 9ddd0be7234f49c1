//! Chunking strategy selection for fetched weather payloads.
//!
//! A small payload goes out as one `Data` message. A large forecast is split
//! per day, and a long historical range per week or per month:
//!
//! | Input | Condition | Strategy | Chunks |
//! |-------|-----------|----------|--------|
//! | any payload | estimated elements `< 100` | `single` | 1 |
//! | forecast | otherwise | `byDay` | one per day |
//! | historical range | span `> 365` days | `byMonth` | `ceil(days / 30)` |
//! | historical range | span `> 90` days | `byWeek` | `ceil(days / 7)` |
//! | historical range | otherwise | `single` | 1 |
//!
//! Thresholds come from [`StreamConfig`](crate::config::StreamConfig).

use chrono::{Duration as DayDelta, NaiveDate};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::StreamConfig;
use crate::protocol::ContentType;

/// How a payload is subdivided for delivery.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChunkStrategy {
    Single,
    ByDay,
    ByWeek,
    ByMonth,
}

impl ChunkStrategy {
    /// Day records grouped into one chunk, for range-based strategies.
    pub fn days_per_unit(&self) -> Option<usize> {
        match self {
            ChunkStrategy::Single | ChunkStrategy::ByDay => None,
            ChunkStrategy::ByWeek => Some(7),
            ChunkStrategy::ByMonth => Some(30),
        }
    }
}

/// A fetched payload, shaped by what the source returned.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// A single observation (current conditions, air quality, ...).
    Current(Value),
    /// One record per forecast day.
    Forecast { days: Vec<Value> },
    /// One record per day of an inclusive historical range.
    Historical {
        start: NaiveDate,
        end: NaiveDate,
        days: Vec<Value>,
    },
}

impl Payload {
    pub fn content_type(&self) -> ContentType {
        match self {
            Payload::Current(_) => ContentType::CurrentWeather,
            Payload::Forecast { .. } => ContentType::Forecast,
            Payload::Historical { .. } => ContentType::Historical,
        }
    }

    /// Element count used to choose between single and multi-chunk delivery.
    pub fn estimated_elements(&self) -> usize {
        match self {
            Payload::Current(value) => estimate_elements(value),
            Payload::Forecast { days } => days.iter().map(|d| 1 + estimate_elements(d)).sum(),
            Payload::Historical { days, .. } => days.len(),
        }
    }

    pub fn days(&self) -> Option<&[Value]> {
        match self {
            Payload::Current(_) => None,
            Payload::Forecast { days } | Payload::Historical { days, .. } => Some(days),
        }
    }

    /// The whole payload as one JSON value.
    pub fn into_value(self) -> Value {
        match self {
            Payload::Current(value) => value,
            Payload::Forecast { days } => json!({ "days": days }),
            Payload::Historical { start, end, days } => json!({
                "start": start,
                "end": end,
                "days": days,
            }),
        }
    }
}

/// Count array elements in a JSON value, recursively.
///
/// Each array item counts as one plus whatever arrays it contains; scalars
/// and object keys count nothing.
pub fn estimate_elements(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.iter().map(|v| 1 + estimate_elements(v)).sum(),
        Value::Object(map) => map.values().map(estimate_elements).sum(),
        _ => 0,
    }
}

/// Inclusive number of days between `start` and `end`.
///
/// Zero or negative when `end` precedes `start`.
pub fn day_span(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

/// The delivery plan for one payload.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPlan {
    pub strategy: ChunkStrategy,
    pub unit_count: usize,
}

impl ChunkPlan {
    pub fn single() -> Self {
        Self {
            strategy: ChunkStrategy::Single,
            unit_count: 1,
        }
    }

    pub fn is_multi(&self) -> bool {
        self.strategy != ChunkStrategy::Single
    }

    /// Split `payload` into ordered chunk payloads.
    ///
    /// Range-based strategies always yield `unit_count` chunks: chunk `k`
    /// holds the records at day offsets `[k*n, (k+1)*n)`, which may be empty
    /// when the source returned fewer records than the span. Records past the
    /// last unit are folded into the final chunk.
    pub fn split(&self, payload: Payload) -> Vec<Value> {
        match self.strategy {
            ChunkStrategy::Single => vec![payload.into_value()],
            ChunkStrategy::ByDay => match payload {
                Payload::Forecast { days } | Payload::Historical { days, .. } if !days.is_empty() => {
                    days
                }
                other => vec![other.into_value()],
            },
            ChunkStrategy::ByWeek | ChunkStrategy::ByMonth => {
                let per_unit = self.strategy.days_per_unit().unwrap_or(1);
                let (range, days) = match payload {
                    Payload::Historical { start, end, days } => (Some((start, end)), days),
                    Payload::Forecast { days } => (None, days),
                    current @ Payload::Current(_) => return vec![current.into_value()],
                };
                group_days(range, days, per_unit, self.unit_count.max(1))
            }
        }
    }
}

fn group_days(
    range: Option<(NaiveDate, NaiveDate)>,
    days: Vec<Value>,
    per_unit: usize,
    units: usize,
) -> Vec<Value> {
    let mut chunks = Vec::with_capacity(units);
    let mut rest = days.into_iter();
    for unit in 0..units {
        let offset = unit * per_unit;
        let group: Vec<Value> = if unit + 1 == units {
            rest.by_ref().collect()
        } else {
            rest.by_ref().take(per_unit).collect()
        };
        let mut chunk = json!({ "offset": offset, "days": group });
        if let Some((start, end)) = range {
            let from = start + DayDelta::days(offset as i64);
            let to = (from + DayDelta::days(per_unit as i64 - 1)).min(end);
            chunk["from"] = json!(from);
            chunk["to"] = json!(to);
        }
        chunks.push(chunk);
    }
    chunks
}

/// Chooses a [`ChunkPlan`] from payload size and requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSelector {
    pub single_chunk_threshold: usize,
    pub week_chunk_min_days: i64,
    pub month_chunk_min_days: i64,
}

impl Default for ChunkSelector {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

impl ChunkSelector {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            single_chunk_threshold: config.single_chunk_threshold,
            week_chunk_min_days: config.week_chunk_min_days,
            month_chunk_min_days: config.month_chunk_min_days,
        }
    }

    /// Plan for a historical range, decided from the span alone.
    pub fn for_range(&self, span_days: i64) -> ChunkPlan {
        if span_days > self.month_chunk_min_days {
            ChunkPlan {
                strategy: ChunkStrategy::ByMonth,
                unit_count: ceil_div(span_days, 30),
            }
        } else if span_days > self.week_chunk_min_days {
            ChunkPlan {
                strategy: ChunkStrategy::ByWeek,
                unit_count: ceil_div(span_days, 7),
            }
        } else {
            ChunkPlan::single()
        }
    }

    /// Plan for an already-fetched payload.
    pub fn plan(&self, payload: &Payload) -> ChunkPlan {
        match payload {
            Payload::Historical { start, end, .. } => self.for_range(day_span(*start, *end)),
            Payload::Forecast { days } => {
                if payload.estimated_elements() < self.single_chunk_threshold || days.is_empty() {
                    ChunkPlan::single()
                } else {
                    ChunkPlan {
                        strategy: ChunkStrategy::ByDay,
                        unit_count: days.len(),
                    }
                }
            }
            // No day structure to split along.
            Payload::Current(_) => ChunkPlan::single(),
        }
    }
}

fn ceil_div(days: i64, per_unit: i64) -> usize {
    ((days + per_unit - 1) / per_unit).max(1) as usize
}
