use std::convert::Infallible;

use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use courier_core::events::{Delivery, LiveEvent, Subscription};
use futures_util::{Stream, StreamExt, stream};
use tokio::sync::watch;

use crate::api::extractors::AdminAuth;
use crate::state::AppState;

const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// `GET /live`: Server-Sent Events stream of live bus events.
///
/// Each event carries the bus id as the SSE `id` and the event type as the
/// SSE `event`, so a reconnecting browser resumes via `Last-Event-ID`.
pub async fn live_events(
    State(state): State<AppState>,
    _auth: AdminAuth,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let last_event_id = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let subscription = state.bus.subscribe_after(last_event_id);
    tracing::debug!(
        ?last_event_id,
        subscribers = state.bus.subscriber_count(),
        "Live stream opened"
    );

    let events = deliveries(subscription)
        .map(|delivery| Ok(to_sse(delivery)))
        .take_until(shutdown_started(state.shutdown.clone()));

    Sse::new(events).keep_alive(KeepAlive::new().interval(state.config.live.keepalive))
}

fn deliveries(subscription: Subscription) -> impl Stream<Item = Delivery> {
    stream::unfold(subscription, |mut subscription| async move {
        let delivery = subscription.recv().await?;
        Some((delivery, subscription))
    })
}

fn to_sse(delivery: Delivery) -> Event {
    match delivery {
        Delivery::Event(event) => event_frame(&event),
        Delivery::Lagged(skipped) => Event::default()
            .event("stream.lagged")
            .data(skipped.to_string()),
    }
}

fn event_frame(event: &LiveEvent) -> Event {
    Event::default()
        .id(event.id.to_string())
        .event(&event.event_type)
        .data(event.data.to_string())
}

/// Resolves once shutdown begins. Without a shutdown source it never does.
async fn shutdown_started(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|started| *started).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::config::LiveConfig;
    use courier_core::events::LiveEventBus;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_event_frame_carries_id_and_type() {
        let frame = event_frame(&LiveEvent {
            id: 7,
            event_type: "dispatch.updated".to_string(),
            data: json!({"status": "SENT"}),
            timestamp: 0,
        });
        let rendered = format!("{frame:?}");
        assert!(rendered.contains("dispatch.updated"));
        assert!(rendered.contains('7'));
    }

    #[tokio::test]
    async fn test_deliveries_resume_after_last_event_id() {
        let bus = LiveEventBus::new(LiveConfig {
            throttle: Duration::ZERO,
            ..LiveConfig::default()
        });
        bus.publish("a", json!(1));
        let subscription = bus.subscribe_after(Some(1));
        bus.publish("b", json!(2));
        bus.publish("c", json!(3));

        let received: Vec<_> = deliveries(subscription).take(2).collect().await;
        let ids: Vec<u64> = received
            .into_iter()
            .map(|d| match d {
                Delivery::Event(e) => e.id,
                Delivery::Lagged(_) => 0,
            })
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let bus = LiveEventBus::new(LiveConfig::default());
        let (tx, rx) = watch::channel(false);
        let stream = deliveries(bus.subscribe()).take_until(shutdown_started(rx));
        tx.send(true).unwrap();
        let remaining: Vec<_> = stream.collect().await;
        assert!(remaining.is_empty());
    }
}
