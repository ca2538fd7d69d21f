use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use courier_sdk::objects::LiveEvent;
use courier_sdk::objects::live::DISPATCH_UPDATED;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::trace;

use crate::config::LiveConfig;
use crate::entities::dispatch_unit::DispatchUnit;

/// Publish/subscribe hub with per-type throttling.
///
/// Cloning yields another handle to the same bus. At most one event per
/// `type` is delivered within each throttle window; later publishes in the
/// window are dropped, not queued. Every delivered event carries an id one
/// greater than the previous, starting at 1.
#[derive(Clone)]
pub struct LiveEventBus {
    inner: Arc<Inner>,
}

struct Inner {
    sender: broadcast::Sender<LiveEvent>,
    throttle: Duration,
    state: Mutex<BusState>,
}

#[derive(Default)]
struct BusState {
    last_id: u64,
    last_delivered: HashMap<String, Instant>,
}

/// What a subscriber sees next.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(LiveEvent),
    /// The subscriber fell behind and this many events were discarded.
    Lagged(u64),
}

/// A live connection to the bus. Dropping it unsubscribes.
pub struct Subscription {
    receiver: broadcast::Receiver<LiveEvent>,
}

impl LiveEventBus {
    pub fn new(config: LiveConfig) -> Self {
        let (sender, _) = broadcast::channel(config.buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                sender,
                throttle: config.throttle,
                state: Mutex::new(BusState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an event unless one of the same type went out within the
    /// throttle window. Returns the delivered event.
    pub fn publish(&self, event_type: &str, data: Value) -> Option<LiveEvent> {
        let now = Instant::now();
        let mut state = self.state();

        if let Some(last) = state.last_delivered.get(event_type)
            && now.duration_since(*last) < self.inner.throttle
        {
            trace!(event_type, "Live event throttled");
            return None;
        }

        state.last_id += 1;
        state.last_delivered.insert(event_type.to_string(), now);
        let event = LiveEvent {
            id: state.last_id,
            event_type: event_type.to_string(),
            data,
            timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
        };
        // Sending under the lock keeps delivery order equal to id order.
        // An error only means nobody is listening.
        let _ = self.inner.sender.send(event.clone());
        Some(event)
    }

    /// Publish a `dispatch.updated` event carrying the unit's API view.
    pub fn publish_unit(&self, unit: &DispatchUnit) -> Option<LiveEvent> {
        let data = serde_json::to_value(unit.to_response()).unwrap_or_default();
        self.publish(DISPATCH_UPDATED, data)
    }

    pub fn subscribe(&self) -> Subscription {
        self.subscribe_after(None)
    }

    /// Subscribe on behalf of a client resuming from `last_event_id`.
    ///
    /// The bus buffers nothing and sends under the same lock that assigns
    /// ids, so a new subscription only ever sees ids above the current
    /// counter. Everything the client already saw is skipped without
    /// filtering. An id the bus has not issued yet comes from an earlier
    /// process; the client just starts over with the next event.
    pub fn subscribe_after(&self, last_event_id: Option<u64>) -> Subscription {
        let state = self.state();
        if let Some(id) = last_event_id
            && id > state.last_id
        {
            trace!(last_event_id = id, current = state.last_id, "Resume id from an earlier process");
        }
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Id of the most recently delivered event (0 before the first).
    pub fn last_id(&self) -> u64 {
        self.state().last_id
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Subscription {
    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.receiver.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some(Delivery::Lagged(skipped)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_sdk::objects::live::BATCH_COMPLETED;
    use serde_json::json;

    fn bus() -> LiveEventBus {
        LiveEventBus::new(LiveConfig::default())
    }

    fn event_id(delivery: Option<Delivery>) -> u64 {
        match delivery {
            Some(Delivery::Event(event)) => event.id,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_type_is_throttled() {
        let bus = bus();
        let mut sub = bus.subscribe();

        assert!(bus.publish(DISPATCH_UPDATED, json!({"n": 1})).is_some());
        assert!(bus.publish(DISPATCH_UPDATED, json!({"n": 2})).is_none());

        let Some(Delivery::Event(event)) = sub.recv().await else {
            panic!("expected an event");
        };
        assert_eq!(event.data, json!({"n": 1}));
        assert!(sub.receiver.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_types_both_delivered() {
        let bus = bus();
        let mut sub = bus.subscribe();

        bus.publish(DISPATCH_UPDATED, json!({}));
        bus.publish(BATCH_COMPLETED, json!({}));

        assert_eq!(event_id(sub.recv().await), 1);
        assert_eq!(event_id(sub.recv().await), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reopens() {
        let bus = bus();
        bus.publish(DISPATCH_UPDATED, json!({}));
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(bus.publish(DISPATCH_UPDATED, json!({})).is_none());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(bus.publish(DISPATCH_UPDATED, json!({})).map(|e| e.id), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_skips_seen_events() {
        let bus = bus();
        let mut early = bus.subscribe();
        bus.publish("a", json!({}));
        bus.publish("b", json!({}));

        let mut resumed = bus.subscribe_after(Some(2));
        let mut from_previous_process = bus.subscribe_after(Some(99));
        bus.publish("c", json!({}));

        assert_eq!(event_id(early.recv().await), 1);
        assert_eq!(event_id(resumed.recv().await), 3);
        assert_eq!(event_id(from_previous_process.recv().await), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_is_told_about_gaps() {
        let bus = LiveEventBus::new(LiveConfig {
            buffer: 2,
            ..LiveConfig::default()
        });
        let mut sub = bus.subscribe();
        for event_type in ["a", "b", "c", "d"] {
            bus.publish(event_type, json!({}));
        }

        assert_eq!(sub.recv().await, Some(Delivery::Lagged(2)));
        assert_eq!(event_id(sub.recv().await), 3);
        assert_eq!(event_id(sub.recv().await), 4);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = bus();
        let sub = bus.subscribe();
        let other = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        sub.unsubscribe();
        drop(other);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish("a", json!({})).map(|e| e.id), Some(1));
    }
}
