use std::collections::BTreeMap;

use courier_sdk::objects::{CorrelationIds, DispatchUnitResponse};
use kanau::processor::Processor;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities::{DispatchChannel, DispatchStatus, UnitKind};
use crate::framework::DatabaseProcessor;

/// One outbound message or job and its delivery bookkeeping.
///
/// Rows are never deleted; every change goes through
/// [`TransitionDispatchUnit`], which bumps `version`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DispatchUnit {
    pub id: Uuid,
    pub kind: UnitKind,
    pub channel: DispatchChannel,
    pub recipient: String,
    pub template_key: String,
    pub variables: Json<BTreeMap<String, String>>,
    pub rendered_payload: Option<String>,
    pub status: DispatchStatus,
    pub retry_count: i32,
    pub next_attempt_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub correlation_ids: Json<CorrelationIds>,
    pub version: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub sent_at: Option<OffsetDateTime>,
}

impl DispatchUnit {
    /// The mutable columns of this unit as they currently are.
    pub fn current_change(&self) -> UnitChange {
        UnitChange {
            status: self.status,
            retry_count: self.retry_count,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error.clone(),
            rendered_payload: self.rendered_payload.clone(),
            provider_message_id: self.provider_message_id.clone(),
            sent_at: self.sent_at,
        }
    }

    pub fn to_response(&self) -> DispatchUnitResponse {
        DispatchUnitResponse {
            unit_id: self.id,
            kind: self.kind.into(),
            channel: self.channel.into(),
            recipient: self.recipient.clone(),
            template_key: self.template_key.clone(),
            rendered_payload: self.rendered_payload.clone(),
            status: self.status.into(),
            retry_count: self.retry_count,
            next_attempt_at: self.next_attempt_at.map(OffsetDateTime::unix_timestamp),
            last_error: self.last_error.clone(),
            provider_message_id: self.provider_message_id.clone(),
            correlation_ids: self.correlation_ids.0.clone(),
            created_at: self.created_at.unix_timestamp(),
            sent_at: self.sent_at.map(OffsetDateTime::unix_timestamp),
        }
    }
}

/// Full write set of a status transition.
///
/// Produced by [`crate::transitions::plan`] and written atomically by
/// [`TransitionDispatchUnit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitChange {
    pub status: DispatchStatus,
    pub retry_count: i32,
    pub next_attempt_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub rendered_payload: Option<String>,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
/// Insert a new unit in `QUEUED` state.
pub struct InsertDispatchUnit {
    pub kind: UnitKind,
    pub channel: DispatchChannel,
    pub recipient: String,
    pub template_key: String,
    pub variables: BTreeMap<String, String>,
    pub correlation_ids: CorrelationIds,
}

impl Processor<InsertDispatchUnit> for DatabaseProcessor {
    type Output = DispatchUnit;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertDispatchUnit")]
    async fn process(&self, insert: InsertDispatchUnit) -> Result<DispatchUnit, sqlx::Error> {
        sqlx::query_as::<_, DispatchUnit>(
            r#"
            INSERT INTO dispatch_units
                (id, kind, channel, recipient, template_key, variables, correlation_ids)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(insert.kind)
        .bind(insert.channel)
        .bind(insert.recipient)
        .bind(insert.template_key)
        .bind(Json(insert.variables))
        .bind(Json(insert.correlation_ids))
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct GetDispatchUnitById {
    pub id: Uuid,
}

impl Processor<GetDispatchUnitById> for DatabaseProcessor {
    type Output = Option<DispatchUnit>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDispatchUnitById")]
    async fn process(&self, query: GetDispatchUnitById) -> Result<Option<DispatchUnit>, sqlx::Error> {
        sqlx::query_as::<_, DispatchUnit>("SELECT * FROM dispatch_units WHERE id = $1")
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Select units a batch should pick up, oldest first.
///
/// With `retry_failed_only` only `FAILED` units whose `next_attempt_at`
/// has passed are returned; otherwise `QUEUED` units are included too.
pub struct ListDueDispatchUnits {
    pub limit: i64,
    pub retry_failed_only: bool,
    pub now: OffsetDateTime,
}

impl Processor<ListDueDispatchUnits> for DatabaseProcessor {
    type Output = Vec<DispatchUnit>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListDueDispatchUnits")]
    async fn process(&self, query: ListDueDispatchUnits) -> Result<Vec<DispatchUnit>, sqlx::Error> {
        sqlx::query_as::<_, DispatchUnit>(
            r#"
            SELECT *
            FROM dispatch_units
            WHERE (status = 'failed' AND next_attempt_at <= $1)
               OR (NOT $2 AND status = 'queued')
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(query.now)
        .bind(query.retry_failed_only)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Compare-and-set write of a status transition.
///
/// Applies `change` only if the row still has `expected_status` and
/// `expected_version`. Returns `None` when another writer got there first.
pub struct TransitionDispatchUnit {
    pub id: Uuid,
    pub expected_status: DispatchStatus,
    pub expected_version: i32,
    pub change: UnitChange,
}

impl Processor<TransitionDispatchUnit> for DatabaseProcessor {
    type Output = Option<DispatchUnit>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:TransitionDispatchUnit")]
    async fn process(
        &self,
        cmd: TransitionDispatchUnit,
    ) -> Result<Option<DispatchUnit>, sqlx::Error> {
        let TransitionDispatchUnit {
            id,
            expected_status,
            expected_version,
            change,
        } = cmd;
        sqlx::query_as::<_, DispatchUnit>(
            r#"
            UPDATE dispatch_units
            SET status = $4,
                retry_count = $5,
                next_attempt_at = $6,
                last_error = $7,
                rendered_payload = $8,
                provider_message_id = $9,
                sent_at = $10,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND status = $2 AND version = $3
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected_status)
        .bind(expected_version)
        .bind(change.status)
        .bind(change.retry_count)
        .bind(change.next_attempt_at)
        .bind(change.last_error)
        .bind(change.rendered_payload)
        .bind(change.provider_message_id)
        .bind(change.sent_at)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Page through units, newest first, optionally filtered by status.
pub struct ListDispatchUnits {
    pub limit: i64,
    pub offset: i64,
    pub status: Option<DispatchStatus>,
}

impl Processor<ListDispatchUnits> for DatabaseProcessor {
    type Output = Vec<DispatchUnit>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListDispatchUnits")]
    async fn process(&self, query: ListDispatchUnits) -> Result<Vec<DispatchUnit>, sqlx::Error> {
        sqlx::query_as::<_, DispatchUnit>(
            r#"
            SELECT *
            FROM dispatch_units
            WHERE ($1::dispatch_status IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(query.status)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await
    }
}
