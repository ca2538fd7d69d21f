//! Applies delivery outcomes reported by the workflow engine.

use courier_sdk::objects::{CallbackResponse, CallbackStatus, DispatchCallback};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

use crate::events::LiveEventBus;
use crate::framework::UnitStore;
use crate::transitions::{self, BackoffPolicy, Transition, TransitionError};

/// `lastError` recorded when a FAILED callback carries no error text.
const UNSPECIFIED_FAILURE: &str = "delivery failed";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid occurredAt timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

pub struct CallbackIngestor<S> {
    store: S,
    bus: LiveEventBus,
}

impl<S: UnitStore> CallbackIngestor<S> {
    pub fn new(store: S, bus: LiveEventBus) -> Self {
        Self { store, bus }
    }

    /// Advance the unit named in `callback`.
    ///
    /// Reports for units that already reached a terminal state are
    /// accepted and leave the unit untouched (`applied = false`).
    pub async fn ingest(
        &self,
        callback: &DispatchCallback,
        policy: &BackoffPolicy,
    ) -> Result<CallbackResponse, IngestError> {
        let now = OffsetDateTime::now_utc();
        let transition = match callback.status {
            CallbackStatus::Sent => {
                let at = match callback.occurred_at {
                    Some(ts) => OffsetDateTime::from_unix_timestamp(ts)
                        .map_err(|_| IngestError::InvalidTimestamp(ts))?,
                    None => now,
                };
                Transition::Deliver {
                    provider_message_id: callback.provider_message_id.clone(),
                    at,
                }
            }
            CallbackStatus::Failed => Transition::Fail {
                error: callback
                    .error
                    .clone()
                    .unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string()),
            },
            CallbackStatus::Skipped => Transition::Skip {
                reason: callback.error.clone(),
            },
            CallbackStatus::Done => Transition::Complete,
        };

        let applied =
            transitions::apply(&self.store, policy, callback.unit_id, &transition, now).await?;

        if applied.changed {
            info!(
                unit_id = %callback.unit_id,
                status = %applied.unit.status,
                retry_count = applied.unit.retry_count,
                "Callback applied"
            );
            self.bus.publish_unit(&applied.unit);
        } else {
            info!(
                unit_id = %callback.unit_id,
                status = %applied.unit.status,
                reported = ?callback.status,
                "Callback ignored for settled unit"
            );
        }

        Ok(CallbackResponse {
            applied: applied.changed,
            unit: applied.unit.to_response(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveConfig;
    use crate::entities::dispatch_unit::{DispatchUnit, InsertDispatchUnit};
    use crate::entities::{DispatchChannel, DispatchStatus, UnitKind};
    use crate::events::Delivery;
    use crate::framework::MemoryProcessor;
    use courier_sdk::objects::CorrelationIds;
    use kanau::processor::Processor;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    async fn dispatched_unit(store: &MemoryProcessor, kind: UnitKind) -> DispatchUnit {
        let unit = store
            .process(InsertDispatchUnit {
                kind,
                channel: DispatchChannel::Email,
                recipient: "student@example.com".to_string(),
                template_key: "remind_schedule".to_string(),
                variables: BTreeMap::new(),
                correlation_ids: CorrelationIds::default(),
            })
            .await
            .unwrap();
        transitions::apply(
            store,
            &BackoffPolicy::default(),
            unit.id,
            &Transition::Dispatch {
                rendered_payload: "body".to_string(),
            },
            OffsetDateTime::now_utc(),
        )
        .await
        .unwrap()
        .unit
    }

    fn callback(unit_id: Uuid, status: CallbackStatus) -> DispatchCallback {
        DispatchCallback {
            unit_id,
            status,
            provider_message_id: None,
            error: None,
            occurred_at: None,
        }
    }

    fn ingestor(store: &MemoryProcessor) -> (CallbackIngestor<MemoryProcessor>, LiveEventBus) {
        let bus = LiveEventBus::new(LiveConfig::default());
        (CallbackIngestor::new(store.clone(), bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_sent_callback_marks_unit_sent() {
        let store = MemoryProcessor::new();
        let (ingestor, bus) = ingestor(&store);
        let mut live = bus.subscribe();
        let unit = dispatched_unit(&store, UnitKind::Message).await;

        let response = ingestor
            .ingest(
                &DispatchCallback {
                    provider_message_id: Some("abc".to_string()),
                    ..callback(unit.id, CallbackStatus::Sent)
                },
                &BackoffPolicy::default(),
            )
            .await
            .unwrap();

        assert!(response.applied);
        let stored = store.units().pop().unwrap();
        assert_eq!(stored.status, DispatchStatus::Sent);
        assert!(stored.sent_at.is_some());
        assert_eq!(stored.next_attempt_at, None);
        assert_eq!(stored.provider_message_id.as_deref(), Some("abc"));

        let Some(Delivery::Event(event)) = live.recv().await else {
            panic!("expected a live event");
        };
        assert_eq!(event.event_type, "dispatch.updated");
        assert_eq!(event.data["status"], "SENT");
    }

    #[tokio::test]
    async fn test_duplicate_sent_changes_nothing() {
        let store = MemoryProcessor::new();
        let (ingestor, _bus) = ingestor(&store);
        let unit = dispatched_unit(&store, UnitKind::Message).await;
        let sent = DispatchCallback {
            occurred_at: Some(1_700_000_000),
            ..callback(unit.id, CallbackStatus::Sent)
        };

        ingestor.ingest(&sent, &BackoffPolicy::default()).await.unwrap();
        let first = store.units().pop().unwrap();

        let again = DispatchCallback {
            occurred_at: Some(1_800_000_000),
            ..sent
        };
        let response = ingestor.ingest(&again, &BackoffPolicy::default()).await.unwrap();

        assert!(!response.applied);
        let second = store.units().pop().unwrap();
        assert_eq!(second.sent_at, first.sent_at);
        assert_eq!(second.retry_count, first.retry_count);
        assert_eq!(second.version, first.version);
        assert_eq!(
            first.sent_at.map(OffsetDateTime::unix_timestamp),
            Some(1_700_000_000)
        );
    }

    #[tokio::test]
    async fn test_failed_callback_schedules_retry() {
        let store = MemoryProcessor::new();
        let (ingestor, _bus) = ingestor(&store);
        let unit = dispatched_unit(&store, UnitKind::Message).await;
        let failed = DispatchCallback {
            error: Some("recipient unreachable".to_string()),
            ..callback(unit.id, CallbackStatus::Failed)
        };

        let before = OffsetDateTime::now_utc();
        let response = ingestor.ingest(&failed, &BackoffPolicy::default()).await.unwrap();
        assert!(response.applied);
        assert_eq!(response.unit.retry_count, 1);
        let next = response.unit.next_attempt_at.unwrap();
        assert!(next >= (before + time::Duration::minutes(2)).unix_timestamp());
        assert_eq!(response.unit.last_error.as_deref(), Some("recipient unreachable"));

        // Redelivery of the same report does not burn another retry.
        let response = ingestor.ingest(&failed, &BackoffPolicy::default()).await.unwrap();
        assert!(!response.applied);
        assert_eq!(response.unit.retry_count, 1);
    }

    #[tokio::test]
    async fn test_done_only_for_jobs() {
        let store = MemoryProcessor::new();
        let (ingestor, _bus) = ingestor(&store);
        let message = dispatched_unit(&store, UnitKind::Message).await;
        let job = dispatched_unit(&store, UnitKind::Job).await;

        let err = ingestor
            .ingest(&callback(message.id, CallbackStatus::Done), &BackoffPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Transition(TransitionError::NotAJob(_))));

        let response = ingestor
            .ingest(&callback(job.id, CallbackStatus::Done), &BackoffPolicy::default())
            .await
            .unwrap();
        assert_eq!(
            response.unit.status,
            courier_sdk::objects::DispatchStatus::Done
        );
    }

    #[tokio::test]
    async fn test_skipped_callback_keeps_reason() {
        let store = MemoryProcessor::new();
        let (ingestor, _bus) = ingestor(&store);
        let unit = dispatched_unit(&store, UnitKind::Message).await;

        let response = ingestor
            .ingest(
                &DispatchCallback {
                    error: Some("opted out".to_string()),
                    ..callback(unit.id, CallbackStatus::Skipped)
                },
                &BackoffPolicy::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.unit.status,
            courier_sdk::objects::DispatchStatus::Skipped
        );
        assert_eq!(response.unit.last_error.as_deref(), Some("opted out"));
    }

    #[tokio::test]
    async fn test_unknown_unit() {
        let store = MemoryProcessor::new();
        let (ingestor, _bus) = ingestor(&store);

        let err = ingestor
            .ingest(
                &callback(Uuid::now_v7(), CallbackStatus::Sent),
                &BackoffPolicy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Transition(TransitionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp() {
        let store = MemoryProcessor::new();
        let (ingestor, _bus) = ingestor(&store);
        let unit = dispatched_unit(&store, UnitKind::Message).await;

        let err = ingestor
            .ingest(
                &DispatchCallback {
                    occurred_at: Some(i64::MAX),
                    ..callback(unit.id, CallbackStatus::Sent)
                },
                &BackoffPolicy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidTimestamp(_)));
    }
}
