//! HTTP endpoint handlers.
//!
//! Stream endpoints admit the request synchronously, so a refusal is a plain
//! JSON error response and never a half-open event stream.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use squall::chunking::day_span;
use squall::error::StreamError;
use squall::registry::{ConnectionRecord, RegistryStats};
use squall::source::{ChatPrompt, PayloadFetcher, SideContextUpdater, TokenSource, WeatherQuery};
use squall::{StreamEngine, StreamRequest};
use tracing::debug;

use crate::demo::{MemoryContextStore, ScriptedAnswer, SyntheticWeather};
use crate::sse;

/// Longest forecast a client may request.
pub const MAX_FORECAST_DAYS: u32 = 16;
const DEFAULT_FORECAST_DAYS: u32 = 7;
const ANONYMOUS_CLIENT: &str = "anonymous";

/// The external data sources the endpoints stream from.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn PayloadFetcher>,
    pub tokens: Arc<dyn TokenSource>,
    pub context: Arc<dyn SideContextUpdater>,
}

impl Collaborators {
    /// Synthetic weather, a scripted chat answer and an in-memory context store.
    pub fn demo() -> Self {
        Self {
            fetcher: Arc::new(SyntheticWeather::default()),
            tokens: Arc::new(ScriptedAnswer),
            context: Arc::new(MemoryContextStore::default()),
        }
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PayloadFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }
}

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: StreamEngine,
    pub collaborators: Collaborators,
}

// ── Errors ──────────────────────────────────────────────────────────

/// A JSON error response: `{"code": ..., "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        let status = match &err {
            StreamError::AdmissionRejected { .. } => StatusCode::SERVICE_UNAVAILABLE,
            StreamError::DuplicateStream(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            code: "BAD_REQUEST",
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "code": self.code, "message": self.message }));
        (self.status, body).into_response()
    }
}

// ── Diagnostics ─────────────────────────────────────────────────────

/// GET /api/stats: Admission registry statistics.
pub async fn get_stats(State(app): State<AppState>) -> Json<RegistryStats> {
    Json(app.engine.registry().statistics())
}

/// GET /api/streams: Active streams, oldest first.
pub async fn get_streams(State(app): State<AppState>) -> Json<Vec<ConnectionRecord>> {
    Json(app.engine.registry().snapshot())
}

// ── Weather streams ─────────────────────────────────────────────────

/// Query string shared by the weather endpoints.
#[derive(Deserialize, Debug, Default)]
pub struct WeatherParams {
    pub location: Option<String>,
    pub days: Option<u32>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub client_id: Option<String>,
    pub stream_id: Option<String>,
}

impl WeatherParams {
    fn request(&self) -> StreamRequest {
        StreamRequest {
            stream_id: self.stream_id.clone(),
            client_id: self
                .client_id
                .clone()
                .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string()),
        }
    }

    fn location(&self) -> Result<String, ApiError> {
        match self.location.as_deref().map(str::trim) {
            Some(location) if !location.is_empty() => Ok(location.to_string()),
            _ => Err(ApiError::bad_request("location is required")),
        }
    }

    fn forecast(&self) -> Result<WeatherQuery, ApiError> {
        let days = self.days.unwrap_or(DEFAULT_FORECAST_DAYS);
        if days == 0 || days > MAX_FORECAST_DAYS {
            return Err(ApiError::bad_request(format!(
                "days must be between 1 and {MAX_FORECAST_DAYS}"
            )));
        }
        Ok(WeatherQuery::Forecast {
            location: self.location()?,
            days,
        })
    }

    fn historical(&self) -> Result<WeatherQuery, ApiError> {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return Err(ApiError::bad_request("start and end are required"));
        };
        if day_span(start, end) < 1 {
            return Err(ApiError::bad_request(format!(
                "end ({end}) is before start ({start})"
            )));
        }
        Ok(WeatherQuery::Historical {
            location: self.location()?,
            start,
            end,
        })
    }
}

/// GET /api/weather/current: Current conditions, one chunk.
pub async fn get_current(
    State(app): State<AppState>,
    params: Result<Query<WeatherParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let query = WeatherQuery::Current {
        location: params.location()?,
    };
    stream_payload(&app, &params, query, false)
}

/// GET /api/weather/forecast: Forecast, chunked per day when large.
pub async fn get_forecast(
    State(app): State<AppState>,
    params: Result<Query<WeatherParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let query = params.forecast()?;
    stream_payload(&app, &params, query, false)
}

/// GET /api/weather/historical: A date range, chunked per week or month.
///
/// Every chunk is preceded by a `progress` event.
pub async fn get_historical(
    State(app): State<AppState>,
    params: Result<Query<WeatherParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let query = params.historical()?;
    stream_payload(&app, &params, query, true)
}

/// GET /api/weather/progress: Fixed-stage progress around one fetch.
///
/// Streams a forecast when `days` is given, current conditions otherwise.
pub async fn get_progress(
    State(app): State<AppState>,
    params: Result<Query<WeatherParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let query = match params.days {
        Some(_) => params.forecast()?,
        None => WeatherQuery::Current {
            location: params.location()?,
        },
    };
    let stream = app.engine.progress_stream(
        &params.request(),
        query,
        app.collaborators.fetcher.clone(),
    )?;
    debug!(stream_id = stream.stream_id(), "Progress stream opened");
    Ok(sse::into_response(stream))
}

fn stream_payload(
    app: &AppState,
    params: &WeatherParams,
    query: WeatherQuery,
    annotate: bool,
) -> Result<impl IntoResponse + use<>, ApiError> {
    let fetcher = app.collaborators.fetcher.clone();
    let request = params.request();
    let stream = if annotate {
        app.engine.chunked_stream(&request, query, fetcher)?
    } else {
        app.engine.data_stream(&request, query, fetcher)?
    };
    debug!(
        stream_id = stream.stream_id(),
        stream_type = %stream.stream_type(),
        "Weather stream opened"
    );
    Ok(sse::into_response(stream))
}

// ── Chat ────────────────────────────────────────────────────────────

/// Request body for POST /api/chat.
#[derive(Deserialize, Debug)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
}

/// POST /api/chat: Stream a paced answer.
///
/// A `location` in the body is recorded as side context for the client
/// without delaying the answer.
pub async fn post_chat(
    State(app): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    if body.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    let client_id = body
        .client_id
        .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string());
    let request = StreamRequest {
        stream_id: body.stream_id,
        client_id: client_id.clone(),
    };
    let mut prompt = ChatPrompt::new(client_id, body.message);
    prompt.location = body.location.filter(|l| !l.trim().is_empty());

    let stream = app.engine.contextual_chat_stream(
        &request,
        prompt,
        app.collaborators.tokens.clone(),
        app.collaborators.context.clone(),
    )?;
    debug!(stream_id = stream.stream_id(), "Chat stream opened");
    Ok(sse::into_response(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_deserializes_with_optional_fields() {
        let body: ChatBody = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(body.message, "hi");
        assert!(body.client_id.is_none());
        assert!(body.location.is_none());
    }

    #[test]
    fn reversed_range_is_bad_request() {
        let params = WeatherParams {
            location: Some("Oslo".into()),
            start: NaiveDate::from_ymd_opt(2024, 3, 1),
            end: NaiveDate::from_ymd_opt(2024, 2, 1),
            ..Default::default()
        };
        let err = params.historical().unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn forecast_days_are_bounded() {
        let params = WeatherParams {
            location: Some("Oslo".into()),
            days: Some(MAX_FORECAST_DAYS + 1),
            ..Default::default()
        };
        assert!(params.forecast().is_err());
        let params = WeatherParams {
            location: Some(" ".into()),
            ..Default::default()
        };
        assert!(params.forecast().is_err());
    }

    #[test]
    fn malformed_query_is_a_json_bad_request() {
        let uri: axum::http::Uri = "/api/weather/historical?location=Oslo&start=2024-13-45"
            .parse()
            .unwrap();
        let rejection = Query::<WeatherParams>::try_from_uri(&uri).unwrap_err();
        let err = ApiError::from(rejection);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "BAD_REQUEST");
    }

    #[test]
    fn admission_refusal_maps_to_503() {
        let err = ApiError::from(StreamError::AdmissionRejected {
            stream_id: "st-1".into(),
            active: 2,
            max: 2,
        });
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code, "CAPACITY_EXCEEDED");
    }
}
