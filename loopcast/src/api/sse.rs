//! Server-Sent Events push channel
//!
//! Streams session state changes and appended log events to connected
//! clients. Slow clients that lag behind the bus lose events.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use super::AppState;

/// GET /api/events - SSE event stream
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(subscribers = state.bus.subscriber_count() + 1, "New SSE client connected");

    let stream = BroadcastStream::new(state.bus.subscribe()).filter_map(|result| async move {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                Err(e) => {
                    warn!(error = %e, "Failed to serialize event");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "SSE client lagging behind event bus");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
