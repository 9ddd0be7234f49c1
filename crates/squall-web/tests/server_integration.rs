//! Integration tests for the squall-web server.
//!
//! These tests start a real axum server on a random port and consume the
//! event streams with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use squall::StreamEngine;
use squall::config::StreamConfig;
use squall_web::demo::SyntheticWeather;
use squall_web::{Collaborators, WebConfig, spawn_web};

/// Helper: spawn a test server on port 0 (random available port).
async fn spawn_test_server(config: StreamConfig, collaborators: Collaborators) -> String {
    let engine = StreamEngine::new(config.without_delays()).unwrap();
    let web_config = WebConfig {
        bind_addr: ([127, 0, 0, 1], 0).into(),
        ..Default::default()
    };
    let addr = spawn_web(engine, collaborators, web_config).await.unwrap();
    format!("http://{addr}")
}

async fn spawn_default() -> String {
    spawn_test_server(StreamConfig::default(), Collaborators::demo()).await
}

/// Parse an SSE body into `(event name, JSON data)` pairs.
fn parse_events(body: &str) -> Vec<(String, Value)> {
    let mut events = Vec::new();
    let mut name = String::new();
    for line in body.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            name = event.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            let data: Value = serde_json::from_str(data.trim()).unwrap();
            events.push((std::mem::take(&mut name), data));
        }
    }
    events
}

async fn get_events(url: &str) -> Vec<(String, Value)> {
    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    parse_events(&resp.text().await.unwrap())
}

fn names(events: &[(String, Value)]) -> Vec<&str> {
    events.iter().map(|(n, _)| n.as_str()).collect()
}

// ── Diagnostics ──────────────────────────────────────────────────────

#[tokio::test]
async fn stats_report_configuration() {
    let base = spawn_test_server(
        StreamConfig::default().with_max_concurrent(7),
        Collaborators::demo(),
    )
    .await;
    let json: Value = reqwest::get(format!("{base}/api/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["active"], 0);
    assert_eq!(json["max"], 7);
    assert_eq!(json["totalServed"], 0);
    assert_eq!(json["maxDurationMs"], 600_000);
}

// ── Weather streams ──────────────────────────────────────────────────

#[tokio::test]
async fn current_weather_is_one_chunk() {
    let base = spawn_default().await;
    let events = get_events(&format!("{base}/api/weather/current?location=Oslo")).await;
    assert_eq!(names(&events), vec!["metadata", "data", "complete"]);
    let (_, metadata) = &events[0];
    assert_eq!(metadata["type"], "metadata");
    assert_eq!(metadata["contentType"], "weather/current");
    assert_eq!(events[1].1["isLast"], true);
    assert_eq!(events[1].1["payload"]["location"], "Oslo");
}

#[tokio::test]
async fn forecast_streams_one_chunk_per_day() {
    let base = spawn_default().await;
    let events = get_events(&format!("{base}/api/weather/forecast?location=Oslo&days=7")).await;
    let data: Vec<&Value> = events
        .iter()
        .filter(|(n, _)| n == "data")
        .map(|(_, v)| v)
        .collect();
    assert_eq!(data.len(), 7);
    for (i, chunk) in data.iter().enumerate() {
        assert_eq!(chunk["chunkIndex"], i);
        assert_eq!(chunk["isLast"], i == 6);
    }
    assert_eq!(events.last().unwrap().0, "complete");
}

#[tokio::test]
async fn historical_range_is_chunked_by_week_with_progress() {
    let base = spawn_default().await;
    let events = get_events(&format!(
        "{base}/api/weather/historical?location=Oslo&start=2024-01-01&end=2024-04-29&client_id=t1"
    ))
    .await;
    let data = events.iter().filter(|(n, _)| n == "data").count();
    let progress = events.iter().filter(|(n, _)| n == "progress").count();
    assert_eq!(data, 18);
    assert_eq!(progress, 19);
    assert_eq!(events[1].1["total"], 18);
}

#[tokio::test]
async fn progress_endpoint_reports_fixed_stages() {
    let base = spawn_default().await;
    let events = get_events(&format!("{base}/api/weather/progress?location=Oslo")).await;
    let currents: Vec<u64> = events
        .iter()
        .filter(|(n, _)| n == "progress")
        .map(|(_, v)| v["current"].as_u64().unwrap())
        .collect();
    assert_eq!(currents, vec![25, 50, 75, 100]);
}

#[tokio::test]
async fn fetch_failure_is_an_error_event() {
    let base = spawn_default().await;
    let events = get_events(&format!("{base}/api/weather/current?location=nowhere")).await;
    assert_eq!(names(&events), vec!["metadata", "error", "complete"]);
    assert_eq!(events[1].1["code"], "FETCH_ERROR");
}

#[tokio::test]
async fn reversed_range_is_rejected() {
    let base = spawn_default().await;
    let resp = reqwest::get(format!(
        "{base}/api/weather/historical?location=Oslo&start=2024-05-01&end=2024-04-01"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 400);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn malformed_query_values_are_json_errors() {
    let base = spawn_default().await;
    for query in [
        "historical?location=Oslo&start=2024-13-45&end=2024-12-31",
        "forecast?location=Oslo&days=abc",
    ] {
        let resp = reqwest::get(format!("{base}/api/weather/{query}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{query}");
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["code"], "BAD_REQUEST", "{query}");
    }
}

#[tokio::test]
async fn full_registry_refuses_with_503() {
    let slow = Collaborators::demo().with_fetcher(Arc::new(SyntheticWeather::with_latency(
        Duration::from_secs(30),
    )));
    let base = spawn_test_server(StreamConfig::default().with_max_concurrent(1), slow).await;

    let held = reqwest::get(format!("{base}/api/weather/current?location=Oslo"))
        .await
        .unwrap();
    assert_eq!(held.status(), 200);

    let resp = reqwest::get(format!("{base}/api/weather/current?location=Bergen"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "CAPACITY_EXCEEDED");

    let streams: Value = reqwest::get(format!("{base}/api/streams"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(streams.as_array().unwrap().len(), 1);
    drop(held);
}

// ── Chat ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_streams_paced_answer() {
    let base = spawn_default().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/chat"))
        .json(&json!({ "message": "Umbrella?", "client_id": "c1", "location": "Oslo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let events = parse_events(&resp.text().await.unwrap());

    assert_eq!(events[0].0, "metadata");
    assert_eq!(events[0].1["contentType"], "text/chat");
    assert_eq!(events[1].1["current"], 1);
    assert_eq!(events.last().unwrap().0, "complete");

    let text: String = events
        .iter()
        .filter(|(n, _)| n == "data")
        .map(|(_, v)| v["payload"].as_str().unwrap().to_string())
        .collect();
    assert!(text.starts_with("Here is the outlook for Oslo:"));
}

#[tokio::test]
async fn empty_chat_message_is_rejected() {
    let base = spawn_default().await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/chat"))
        .json(&json!({ "message": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
