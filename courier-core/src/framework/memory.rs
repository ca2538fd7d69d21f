//! In-memory store for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kanau::processor::Processor;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities::DispatchStatus;
use crate::entities::dispatch_unit::{
    DispatchUnit, GetDispatchUnitById, InsertDispatchUnit, ListDispatchUnits,
    ListDueDispatchUnits, TransitionDispatchUnit,
};
use crate::entities::idempotency_record::{
    ClaimIdempotencyRecord, CompleteIdempotencyRecord, GetIdempotencyRecord, IdempotencyIdentity,
    IdempotencyRecord, ReapIdempotencyRecords, RefreshIdempotencyClaim, ReleaseIdempotencyClaim,
    TakeOverIdempotencyClaim,
};

#[derive(Default)]
struct Tables {
    ledger: HashMap<IdempotencyIdentity, IdempotencyRecord>,
    /// Insertion order doubles as creation order.
    units: Vec<DispatchUnit>,
}

/// Process-local implementation of every storage query.
///
/// Cloning shares the same tables. Each query runs under one mutex, which
/// gives the claim and compare-and-set queries the same atomicity the
/// PostgreSQL versions get from the primary key and `WHERE` guards.
#[derive(Clone, Default)]
pub struct MemoryProcessor {
    tables: Arc<Mutex<Tables>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every query fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All units in creation order.
    pub fn units(&self) -> Vec<DispatchUnit> {
        self.lock().units.clone()
    }

    pub fn ledger_len(&self) -> usize {
        self.lock().ledger.len()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, sqlx::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(self.lock())
    }
}

// ---------------------------------------------------------------------------
// Idempotency ledger
// ---------------------------------------------------------------------------

impl Processor<ClaimIdempotencyRecord> for MemoryProcessor {
    type Output = Option<IdempotencyRecord>;
    type Error = sqlx::Error;

    async fn process(
        &self,
        cmd: ClaimIdempotencyRecord,
    ) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
        let mut tables = self.tables()?;
        if tables.ledger.contains_key(&cmd.identity) {
            return Ok(None);
        }
        let record = IdempotencyRecord {
            idempotency_key: cmd.identity.key.clone(),
            route: cmd.identity.route.clone(),
            actor_kind: cmd.identity.actor.kind,
            actor_id: cmd.identity.actor.id.clone(),
            request_hash: cmd.request_hash,
            claim_id: cmd.claim_id,
            response_status: None,
            response_body: None,
            claimed_at: cmd.now,
            created_at: cmd.now,
            completed_at: None,
        };
        tables.ledger.insert(cmd.identity, record.clone());
        Ok(Some(record))
    }
}

impl Processor<GetIdempotencyRecord> for MemoryProcessor {
    type Output = Option<IdempotencyRecord>;
    type Error = sqlx::Error;

    async fn process(
        &self,
        query: GetIdempotencyRecord,
    ) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
        Ok(self.tables()?.ledger.get(&query.identity).cloned())
    }
}

impl Processor<TakeOverIdempotencyClaim> for MemoryProcessor {
    type Output = Option<IdempotencyRecord>;
    type Error = sqlx::Error;

    async fn process(
        &self,
        cmd: TakeOverIdempotencyClaim,
    ) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
        let mut tables = self.tables()?;
        let Some(record) = tables.ledger.get_mut(&cmd.identity) else {
            return Ok(None);
        };
        if record.is_completed()
            || record.request_hash != cmd.request_hash
            || record.claimed_at >= cmd.stale_before
        {
            return Ok(None);
        }
        record.claimed_at = cmd.now;
        record.claim_id = cmd.claim_id;
        Ok(Some(record.clone()))
    }
}

impl Processor<RefreshIdempotencyClaim> for MemoryProcessor {
    type Output = u64;
    type Error = sqlx::Error;

    async fn process(&self, cmd: RefreshIdempotencyClaim) -> Result<u64, sqlx::Error> {
        let mut tables = self.tables()?;
        match tables.ledger.get_mut(&cmd.identity) {
            Some(record) if record.claim_id == cmd.claim_id && !record.is_completed() => {
                record.claimed_at = cmd.now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

impl Processor<CompleteIdempotencyRecord> for MemoryProcessor {
    type Output = u64;
    type Error = sqlx::Error;

    async fn process(&self, cmd: CompleteIdempotencyRecord) -> Result<u64, sqlx::Error> {
        let mut tables = self.tables()?;
        match tables.ledger.get_mut(&cmd.identity) {
            Some(record) if record.claim_id == cmd.claim_id && !record.is_completed() => {
                record.response_status = Some(cmd.response_status);
                record.response_body = Some(Json(cmd.response_body));
                record.completed_at = Some(cmd.now);
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

impl Processor<ReleaseIdempotencyClaim> for MemoryProcessor {
    type Output = u64;
    type Error = sqlx::Error;

    async fn process(&self, cmd: ReleaseIdempotencyClaim) -> Result<u64, sqlx::Error> {
        let mut tables = self.tables()?;
        match tables.ledger.get(&cmd.identity) {
            Some(record) if record.claim_id == cmd.claim_id && !record.is_completed() => {
                tables.ledger.remove(&cmd.identity);
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

impl Processor<ReapIdempotencyRecords> for MemoryProcessor {
    type Output = u64;
    type Error = sqlx::Error;

    async fn process(&self, cmd: ReapIdempotencyRecords) -> Result<u64, sqlx::Error> {
        let mut tables = self.tables()?;
        let before = tables.ledger.len();
        tables
            .ledger
            .retain(|_, record| !record.is_completed() || record.created_at >= cmd.older_than);
        Ok((before - tables.ledger.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Dispatch units
// ---------------------------------------------------------------------------

impl Processor<InsertDispatchUnit> for MemoryProcessor {
    type Output = DispatchUnit;
    type Error = sqlx::Error;

    async fn process(&self, insert: InsertDispatchUnit) -> Result<DispatchUnit, sqlx::Error> {
        let mut tables = self.tables()?;
        let now = OffsetDateTime::now_utc();
        let unit = DispatchUnit {
            id: Uuid::now_v7(),
            kind: insert.kind,
            channel: insert.channel,
            recipient: insert.recipient,
            template_key: insert.template_key,
            variables: Json(insert.variables),
            rendered_payload: None,
            status: DispatchStatus::Queued,
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            provider_message_id: None,
            correlation_ids: Json(insert.correlation_ids),
            version: 0,
            created_at: now,
            updated_at: now,
            sent_at: None,
        };
        tables.units.push(unit.clone());
        Ok(unit)
    }
}

impl Processor<GetDispatchUnitById> for MemoryProcessor {
    type Output = Option<DispatchUnit>;
    type Error = sqlx::Error;

    async fn process(&self, query: GetDispatchUnitById) -> Result<Option<DispatchUnit>, sqlx::Error> {
        Ok(self
            .tables()?
            .units
            .iter()
            .find(|u| u.id == query.id)
            .cloned())
    }
}

impl Processor<ListDueDispatchUnits> for MemoryProcessor {
    type Output = Vec<DispatchUnit>;
    type Error = sqlx::Error;

    async fn process(&self, query: ListDueDispatchUnits) -> Result<Vec<DispatchUnit>, sqlx::Error> {
        let limit = usize::try_from(query.limit).unwrap_or(0);
        Ok(self
            .tables()?
            .units
            .iter()
            .filter(|u| match u.status {
                DispatchStatus::Failed => u.next_attempt_at.is_some_and(|at| at <= query.now),
                DispatchStatus::Queued => !query.retry_failed_only,
                _ => false,
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

impl Processor<TransitionDispatchUnit> for MemoryProcessor {
    type Output = Option<DispatchUnit>;
    type Error = sqlx::Error;

    async fn process(
        &self,
        cmd: TransitionDispatchUnit,
    ) -> Result<Option<DispatchUnit>, sqlx::Error> {
        let mut tables = self.tables()?;
        let Some(unit) = tables.units.iter_mut().find(|u| {
            u.id == cmd.id && u.status == cmd.expected_status && u.version == cmd.expected_version
        }) else {
            return Ok(None);
        };
        let change = cmd.change;
        unit.status = change.status;
        unit.retry_count = change.retry_count;
        unit.next_attempt_at = change.next_attempt_at;
        unit.last_error = change.last_error;
        unit.rendered_payload = change.rendered_payload;
        unit.provider_message_id = change.provider_message_id;
        unit.sent_at = change.sent_at;
        unit.version += 1;
        unit.updated_at = OffsetDateTime::now_utc();
        Ok(Some(unit.clone()))
    }
}

impl Processor<ListDispatchUnits> for MemoryProcessor {
    type Output = Vec<DispatchUnit>;
    type Error = sqlx::Error;

    async fn process(&self, query: ListDispatchUnits) -> Result<Vec<DispatchUnit>, sqlx::Error> {
        let offset = usize::try_from(query.offset).unwrap_or(0);
        let limit = usize::try_from(query.limit).unwrap_or(0);
        Ok(self
            .tables()?
            .units
            .iter()
            .rev()
            .filter(|u| query.status.is_none_or(|s| u.status == s))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
