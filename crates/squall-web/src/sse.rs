//! [`StreamMessage`] to Server-Sent-Events encoding.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use squall::{MessageStream, StreamMessage};
use tracing::warn;

/// One SSE event per message: the event name is the message kind and the
/// data is the message JSON.
pub fn to_event(msg: &StreamMessage) -> Event {
    let event = Event::default().event(msg.event_name());
    match event.json_data(msg) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to encode {} message: {e}", msg.event_name());
            Event::default().event(msg.event_name()).data("{}")
        }
    }
}

/// Wrap a message stream as an SSE response body.
pub fn into_response(
    stream: MessageStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let events = stream.map(|msg| Ok::<_, Infallible>(to_event(&msg)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn sse_response_has_event_stream_content_type() {
        let engine = squall::StreamEngine::new(squall::config::StreamConfig::default()).unwrap();
        let stream = engine
            .chat_stream(
                &squall::StreamRequest::new("c"),
                squall::source::ChatPrompt::new("c", "hi"),
                std::sync::Arc::new(squall::source::IterTokenSource::words("ok")),
            )
            .unwrap();
        let response = into_response(stream).into_response();
        assert_eq!(response.headers()["content-type"], "text/event-stream");
    }
}
