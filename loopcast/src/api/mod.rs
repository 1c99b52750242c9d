//! HTTP control surface
//!
//! Thin axum layer over the media repository, the supervisor and the event
//! log. Handlers translate requests and map [`crate::Error`] to JSON errors.

pub mod handlers;
pub mod sse;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use loopcast_common::events::EventBus;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::supervisor::Supervisor;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
    pub bus: EventBus,
}

impl AppState {
    pub fn new(supervisor: Supervisor, bus: EventBus) -> Self {
        Self { supervisor, bus }
    }
}

/// Build the router with all routes
pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.supervisor.config().max_upload_bytes;

    Router::new()
        .route("/health", get(handlers::health))
        // Media
        .route("/api/media", delete(handlers::erase_all_media))
        .route(
            "/api/media/:kind",
            get(handlers::list_media)
                .post(handlers::upload_media)
                .delete(handlers::erase_media_kind),
        )
        .route("/api/media/:kind/:name", delete(handlers::delete_media))
        // Streaming
        .route("/api/stream/start", post(handlers::start_stream))
        .route("/api/stream/stop", post(handlers::stop_stream))
        .route("/api/stream/status", get(handlers::stream_status))
        .route("/api/sessions/:session_id/logs", get(handlers::session_logs))
        // Push channel
        .route("/api/events", get(sse::event_stream))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
