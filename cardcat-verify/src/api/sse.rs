//! Server-Sent Events stream of catalog activity

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events
///
/// Streams every `CatalogEvent`: CardVerified, ChecklistMissing,
/// ChecklistLearned, ChecklistEnriched, ChecklistsImported, BatchProgress.
pub async fn event_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    cardcat_common::sse::catalog_event_stream("cardcat-verify", &state.event_bus)
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
