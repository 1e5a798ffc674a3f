use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use std::convert::Infallible;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use crate::api::ApiState;

/// Bus events as a server-sent event stream. Slow clients skip what they
/// missed instead of stalling the bus.
pub async fn events(
    State(state): State<ApiState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.broadcast.subscribe()).filter_map(|msg| {
        let event = msg.ok()?;
        Some(Ok(SseEvent::default()
            .event(format!("{:?}", event.event_type))
            .data(event.to_json())))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
