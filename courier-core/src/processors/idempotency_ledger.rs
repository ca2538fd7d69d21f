//! Request/response memoization for retried mutations.
//!
//! Each mutating entry point runs its operation through
//! [`IdempotencyLedger::execute`], keyed by the caller's idempotency key,
//! the route, and the authenticated actor. The first request claims the
//! identity and runs the operation; duplicates get the stored response
//! back without running it again.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::entities::idempotency_record::{
    Actor, ClaimIdempotencyRecord, CompleteIdempotencyRecord, GetIdempotencyRecord,
    IdempotencyIdentity, IdempotencyRecord, ReapIdempotencyRecords, RefreshIdempotencyClaim,
    ReleaseIdempotencyClaim, TakeOverIdempotencyClaim,
};
use crate::framework::LedgerStore;
use crate::utils::request_hash;

/// Longest accepted idempotency key.
pub const MAX_KEY_LENGTH: usize = 255;

/// Floor for the heartbeat period of a running claim.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum LedgerError<E> {
    #[error("missing idempotency key")]
    MissingKey,
    #[error("idempotency key longer than {MAX_KEY_LENGTH} characters")]
    KeyTooLong,
    #[error("idempotency key was already used with a different request")]
    Conflict,
    #[error("a request with this idempotency key is still being processed")]
    InProgress,
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Operation(E),
}

/// Response of an idempotent execution.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerOutcome {
    pub status: u16,
    pub body: Value,
    /// Served from the ledger without running the operation.
    pub replayed: bool,
}

impl LedgerOutcome {
    fn replay(record: &IdempotencyRecord) -> Self {
        Self {
            status: record
                .response_status
                .and_then(|s| u16::try_from(s).ok())
                .unwrap_or(500),
            body: record
                .response_body
                .as_ref()
                .map(|body| body.0.clone())
                .unwrap_or(Value::Null),
            replayed: true,
        }
    }
}

pub struct IdempotencyLedger<S> {
    store: S,
    config: LedgerConfig,
}

impl<S: LedgerStore> IdempotencyLedger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Run `operation` at most once for `(key, route, actor)` and `body`.
    ///
    /// `operation` returns the HTTP status and JSON body to memoize. If it
    /// fails, the claim is released and nothing is stored, so the caller
    /// may retry with the same key. While it runs, the claim is refreshed
    /// every third of `stale_claim`, so only a claim whose owner died can be
    /// taken over.
    pub async fn execute<F, Fut, E>(
        &self,
        key: &str,
        route: &str,
        actor: &Actor,
        body: &Value,
        operation: F,
    ) -> Result<LedgerOutcome, LedgerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(u16, Value), E>>,
    {
        if key.is_empty() {
            return Err(LedgerError::MissingKey);
        }
        if key.chars().count() > MAX_KEY_LENGTH {
            return Err(LedgerError::KeyTooLong);
        }

        let identity = IdempotencyIdentity {
            key: key.to_string(),
            route: route.to_string(),
            actor: actor.clone(),
        };
        let hash = request_hash(body);
        let deadline = Instant::now() + self.config.wait_timeout;

        loop {
            if let Some(claim_id) = self.claim(&identity, &hash).await? {
                return self.run(identity, claim_id, operation).await;
            }

            let Some(record) = self
                .store
                .process(GetIdempotencyRecord {
                    identity: identity.clone(),
                })
                .await?
            else {
                // The winner failed and released its claim in between.
                continue;
            };

            if record.request_hash != hash {
                warn!(%actor, route, "Idempotency key reused with a different request");
                return Err(LedgerError::Conflict);
            }

            if record.is_completed() {
                debug!(%actor, route, "Replaying stored response");
                return Ok(LedgerOutcome::replay(&record));
            }

            if let Some(claim_id) = self.take_over_if_stale(&identity, &hash).await? {
                return self.run(identity, claim_id, operation).await;
            }

            if Instant::now() >= deadline {
                return Err(LedgerError::InProgress);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Returns the new claim's id when this caller won it.
    async fn claim(
        &self,
        identity: &IdempotencyIdentity,
        hash: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let claimed = self
            .store
            .process(ClaimIdempotencyRecord {
                identity: identity.clone(),
                request_hash: hash.to_string(),
                claim_id: Uuid::new_v4(),
                now: OffsetDateTime::now_utc(),
            })
            .await?;
        Ok(claimed.map(|record| record.claim_id))
    }

    async fn take_over_if_stale(
        &self,
        identity: &IdempotencyIdentity,
        hash: &str,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let taken = self
            .store
            .process(TakeOverIdempotencyClaim {
                identity: identity.clone(),
                request_hash: hash.to_string(),
                claim_id: Uuid::new_v4(),
                stale_before: now - self.config.stale_claim,
                now,
            })
            .await?;
        if taken.is_some() {
            info!(actor = %identity.actor, route = %identity.route, "Took over abandoned idempotency claim");
        }
        Ok(taken.map(|record| record.claim_id))
    }

    /// Keep the claim fresh for as long as `operation` runs.
    async fn run_with_heartbeat<Fut, T>(
        &self,
        identity: &IdempotencyIdentity,
        claim_id: Uuid,
        operation: Fut,
    ) -> T
    where
        Fut: Future<Output = T>,
    {
        let mut heartbeat = tokio::time::interval((self.config.stale_claim / 3).max(MIN_HEARTBEAT));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the claim was just written.
        heartbeat.tick().await;

        tokio::pin!(operation);
        loop {
            tokio::select! {
                result = &mut operation => return result,
                _ = heartbeat.tick() => {
                    let refreshed = self
                        .store
                        .process(RefreshIdempotencyClaim {
                            identity: identity.clone(),
                            claim_id,
                            now: OffsetDateTime::now_utc(),
                        })
                        .await;
                    match refreshed {
                        Ok(0) => warn!(actor = %identity.actor, route = %identity.route, "Idempotency claim lost while running"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, actor = %identity.actor, route = %identity.route, "Failed to refresh idempotency claim"),
                    }
                }
            }
        }
    }

    async fn run<F, Fut, E>(
        &self,
        identity: IdempotencyIdentity,
        claim_id: Uuid,
        operation: F,
    ) -> Result<LedgerOutcome, LedgerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(u16, Value), E>>,
    {
        match self
            .run_with_heartbeat(&identity, claim_id, operation())
            .await
        {
            Ok((status, body)) => {
                let completed = self
                    .store
                    .process(CompleteIdempotencyRecord {
                        identity: identity.clone(),
                        claim_id,
                        response_status: i32::from(status),
                        response_body: body.clone(),
                        now: OffsetDateTime::now_utc(),
                    })
                    .await;
                // The side effect already happened; report it even if the
                // response could not be memoized.
                match completed {
                    Ok(0) => {
                        warn!(actor = %identity.actor, route = %identity.route, "Idempotency claim was taken over; response not stored");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, actor = %identity.actor, route = %identity.route, "Failed to store idempotent response");
                    }
                }
                self.maybe_reap().await;
                Ok(LedgerOutcome {
                    status,
                    body,
                    replayed: false,
                })
            }
            Err(e) => {
                if let Err(release_error) = self
                    .store
                    .process(ReleaseIdempotencyClaim {
                        identity: identity.clone(),
                        claim_id,
                    })
                    .await
                {
                    error!(error = %release_error, actor = %identity.actor, route = %identity.route, "Failed to release idempotency claim");
                }
                Err(LedgerError::Operation(e))
            }
        }
    }

    async fn maybe_reap(&self) {
        let probability = self.config.reap_probability;
        if !(probability > 0.0 && rand::random_bool(probability.min(1.0))) {
            return;
        }
        let older_than = OffsetDateTime::now_utc() - self.config.retention;
        match self
            .store
            .process(ReapIdempotencyRecords { older_than })
            .await
        {
            Ok(0) => {}
            Ok(reaped) => debug!(reaped, "Reaped expired idempotency records"),
            Err(e) => warn!(error = %e, "Failed to reap idempotency records"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::idempotency_record::ActorKind;
    use crate::framework::MemoryProcessor;
    use futures_util::future::join_all;
    use kanau::processor::Processor;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn service() -> Actor {
        Actor::new(ActorKind::Service, "crm")
    }

    fn ledger(store: &MemoryProcessor, config: LedgerConfig) -> IdempotencyLedger<MemoryProcessor> {
        IdempotencyLedger::new(store.clone(), config)
    }

    fn quiet() -> LedgerConfig {
        LedgerConfig {
            reap_probability: 0.0,
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_second_call_is_replayed() {
        let store = MemoryProcessor::new();
        let ledger = ledger(&store, quiet());
        let runs = AtomicUsize::new(0);
        let runs = &runs;
        let body = json!({"limit": 1});

        let op = move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>((201, json!({"unit_id": "u-1"})))
        };
        let first = ledger.execute("k1", "units.create", &service(), &body, op).await.unwrap();
        let second = ledger.execute("k1", "units.create", &service(), &body, op).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.status, 201);
        assert_eq!(second.status, 201);
        assert_eq!(first.body, second.body);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_execute_once() {
        let store = MemoryProcessor::new();
        let ledger = ledger(&store, quiet());
        let runs = Arc::new(AtomicUsize::new(0));
        let body = json!({"retry_failed_only": false});
        let actor = service();

        let calls = (0..8).map(|_| {
            let runs = runs.clone();
            ledger.execute("batch-1", "batches.run", &actor, &body, move || async move {
                let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, ()>((200, json!({"run": n})))
            })
        });
        let outcomes: Vec<_> = join_all(calls)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);
        for outcome in &outcomes {
            assert_eq!(outcome.status, 200);
            assert_eq!(outcome.body, json!({"run": 1}));
        }
    }

    #[tokio::test]
    async fn test_different_body_conflicts() {
        let store = MemoryProcessor::new();
        let ledger = ledger(&store, quiet());

        ledger
            .execute("k1", "units.create", &service(), &json!({"a": 1}), || async {
                Ok::<_, ()>((201, json!({"first": true})))
            })
            .await
            .unwrap();
        let err = ledger
            .execute("k1", "units.create", &service(), &json!({"a": 2}), || async {
                Ok::<_, ()>((201, json!({"first": false})))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict));

        let replay = ledger
            .execute("k1", "units.create", &service(), &json!({"a": 1}), || async {
                Ok::<_, ()>((500, json!(null)))
            })
            .await
            .unwrap();
        assert_eq!(replay.body, json!({"first": true}));
    }

    #[tokio::test]
    async fn test_identity_includes_route_and_actor() {
        let store = MemoryProcessor::new();
        let ledger = ledger(&store, quiet());
        let runs = AtomicUsize::new(0);
        let runs = &runs;
        let body = json!({});
        let op = move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>((200, json!({})))
        };

        ledger.execute("k", "a", &service(), &body, op).await.unwrap();
        ledger.execute("k", "b", &service(), &body, op).await.unwrap();
        ledger
            .execute("k", "a", &Actor::new(ActorKind::Admin, "admin"), &body, op)
            .await
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_operation_releases_claim() {
        let store = MemoryProcessor::new();
        let ledger = ledger(&store, quiet());
        let body = json!({});

        let err = ledger
            .execute("k", "units.send", &service(), &body, || async {
                Err::<(u16, Value), _>("channel down")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Operation("channel down")));
        assert_eq!(store.ledger_len(), 0);

        let retried = ledger
            .execute("k", "units.send", &service(), &body, || async {
                Ok::<_, &str>((200, json!({"ok": true})))
            })
            .await
            .unwrap();
        assert!(!retried.replayed);
    }

    #[tokio::test]
    async fn test_key_validation() {
        let store = MemoryProcessor::new();
        let ledger = ledger(&store, quiet());
        let op = || async { Ok::<_, ()>((200, json!({}))) };

        let err = ledger.execute("", "r", &service(), &json!({}), op).await.unwrap_err();
        assert!(matches!(err, LedgerError::MissingKey));

        let long = "k".repeat(MAX_KEY_LENGTH + 1);
        let err = ledger.execute(&long, "r", &service(), &json!({}), op).await.unwrap_err();
        assert!(matches!(err, LedgerError::KeyTooLong));
    }

    fn identity(key: &str, route: &str) -> IdempotencyIdentity {
        IdempotencyIdentity {
            key: key.to_string(),
            route: route.to_string(),
            actor: service(),
        }
    }

    #[tokio::test]
    async fn test_in_flight_duplicate_times_out() {
        let store = MemoryProcessor::new();
        let ledger = ledger(
            &store,
            LedgerConfig {
                wait_timeout: Duration::from_millis(120),
                ..quiet()
            },
        );
        let body = json!({});
        store
            .process(ClaimIdempotencyRecord {
                identity: identity("k", "r"),
                request_hash: request_hash(&body),
                claim_id: Uuid::new_v4(),
                now: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();

        let err = ledger
            .execute("k", "r", &service(), &body, || async {
                Ok::<_, ()>((200, json!({})))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InProgress));
    }

    #[tokio::test]
    async fn test_abandoned_claim_is_taken_over() {
        let store = MemoryProcessor::new();
        let ledger = ledger(&store, quiet());
        let body = json!({});
        store
            .process(ClaimIdempotencyRecord {
                identity: identity("k", "r"),
                request_hash: request_hash(&body),
                claim_id: Uuid::new_v4(),
                now: OffsetDateTime::now_utc() - time::Duration::minutes(10),
            })
            .await
            .unwrap();

        let outcome = ledger
            .execute("k", "r", &service(), &body, || async {
                Ok::<_, ()>((200, json!({"recovered": true})))
            })
            .await
            .unwrap();
        assert!(!outcome.replayed);
        assert_eq!(outcome.body, json!({"recovered": true}));
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let store = MemoryProcessor::new();
        let ledger = ledger(&store, quiet());
        store.set_unavailable(true);

        let err = ledger
            .execute("k", "r", &service(), &json!({}), || async {
                Ok::<_, ()>((200, json!({})))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
    }

    #[tokio::test]
    async fn test_reap_removes_expired_completed_records() {
        let store = MemoryProcessor::new();
        let old = identity("old", "r");
        let stuck = identity("stuck", "r");
        let old_claim = Uuid::new_v4();
        for (identity, claim_id) in [(old.clone(), old_claim), (stuck.clone(), Uuid::new_v4())] {
            store
                .process(ClaimIdempotencyRecord {
                    identity,
                    request_hash: request_hash(&json!({})),
                    claim_id,
                    now: OffsetDateTime::now_utc() - time::Duration::hours(48),
                })
                .await
                .unwrap();
        }
        store
            .process(CompleteIdempotencyRecord {
                identity: old.clone(),
                claim_id: old_claim,
                response_status: 200,
                response_body: json!({}),
                now: OffsetDateTime::now_utc() - time::Duration::hours(48),
            })
            .await
            .unwrap();

        let ledger = ledger(
            &store,
            LedgerConfig {
                reap_probability: 1.0,
                ..LedgerConfig::default()
            },
        );
        ledger
            .execute("new", "r", &service(), &json!({}), || async {
                Ok::<_, ()>((200, json!({})))
            })
            .await
            .unwrap();

        assert_eq!(store.ledger_len(), 2);
        let gone = store
            .process(GetIdempotencyRecord { identity: old })
            .await
            .unwrap();
        assert!(gone.is_none());
        // An unfinished claim is never reaped, however old.
        let kept = store
            .process(GetIdempotencyRecord { identity: stuck })
            .await
            .unwrap();
        assert!(kept.is_some_and(|record| !record.is_completed()));
    }

    #[tokio::test]
    async fn test_slow_winner_keeps_its_claim() {
        let store = MemoryProcessor::new();
        let ledger = ledger(
            &store,
            LedgerConfig {
                stale_claim: Duration::from_millis(200),
                wait_timeout: Duration::from_secs(5),
                ..quiet()
            },
        );
        let runs = AtomicUsize::new(0);
        let runs = &runs;
        let body = json!({"limit": 100});
        let op = move || async move {
            let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(700)).await;
            Ok::<_, ()>((200, json!({"run": n})))
        };

        let first_service = service();
        let first = ledger.execute("cron-0900", "batches.run", &first_service, &body, op);
        let second = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ledger
                .execute("cron-0900", "batches.run", &service(), &body, op)
                .await
        };
        let (first, second) = tokio::join!(first, second);
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.body, json!({"run": 1}));
    }

    #[tokio::test]
    async fn test_previous_owner_cannot_touch_taken_over_claim() {
        let store = MemoryProcessor::new();
        let id = identity("k", "r");
        let hash = request_hash(&json!({}));
        let abandoned = Uuid::new_v4();
        let current = Uuid::new_v4();
        store
            .process(ClaimIdempotencyRecord {
                identity: id.clone(),
                request_hash: hash.clone(),
                claim_id: abandoned,
                now: OffsetDateTime::now_utc() - time::Duration::minutes(10),
            })
            .await
            .unwrap();
        let now = OffsetDateTime::now_utc();
        let taken = store
            .process(TakeOverIdempotencyClaim {
                identity: id.clone(),
                request_hash: hash,
                claim_id: current,
                stale_before: now - time::Duration::minutes(5),
                now,
            })
            .await
            .unwrap();
        assert_eq!(taken.map(|record| record.claim_id), Some(current));

        let released = store
            .process(ReleaseIdempotencyClaim {
                identity: id.clone(),
                claim_id: abandoned,
            })
            .await
            .unwrap();
        let completed = store
            .process(CompleteIdempotencyRecord {
                identity: id.clone(),
                claim_id: abandoned,
                response_status: 200,
                response_body: json!({"stale": true}),
                now,
            })
            .await
            .unwrap();
        let refreshed = store
            .process(RefreshIdempotencyClaim {
                identity: id.clone(),
                claim_id: abandoned,
                now,
            })
            .await
            .unwrap();
        assert_eq!((released, completed, refreshed), (0, 0, 0));

        let record = store
            .process(GetIdempotencyRecord { identity: id })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.claim_id, current);
        assert!(!record.is_completed());
    }
}
