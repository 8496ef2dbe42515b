use crate::events::MediaEvent;
use crate::server::auth::Caller;
use crate::server::AppContext;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/events", get(events_handler))
}

pub async fn events_handler(
    State(ctx): State<AppContext>,
    Caller(caller): Caller,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.tracker.events().subscribe();

    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .filter(move |event: &MediaEvent| event.visible_to(&caller))
        .map(|event: MediaEvent| {
            // Unnamed events; the client routes on event_type in the data.
            let data = serde_json::to_string(&event).unwrap_or_else(|e| {
                format!(r#"{{"error": "serialization failed: {}"}}"#, e)
            });

            Ok(Event::default().data(data))
        });

    let heartbeat =
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30)))
            .map(|_| {
                Ok(Event::default()
                    .event("heartbeat")
                    .data(r#"{"event_type":"heartbeat"}"#))
            });

    let combined = stream.merge(heartbeat);

    Sse::new(combined).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
