//! Server-Sent Events for pipeline progress

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /api/events
///
/// Streams JobSubmitted, JobProgress, ItemFailed, JobCompleted and JobFailed.
pub async fn event_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    pim_common::sse::create_event_sse_stream("pim-ai", &state.event_bus)
}
