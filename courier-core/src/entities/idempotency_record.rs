use kanau::processor::Processor;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::framework::DatabaseProcessor;

/// Who is making a request, as established by the authentication gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "actor_kind")]
pub enum ActorKind {
    Service,
    Admin,
    Workflow,
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorKind::Service => write!(f, "service"),
            ActorKind::Admin => write!(f, "admin"),
            ActorKind::Workflow => write!(f, "workflow"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn new(kind: ActorKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Composite identity of a ledger row: `(key, route, actor_kind, actor_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyIdentity {
    pub key: String,
    pub route: String,
    pub actor: Actor,
}

/// A memoized request/response pair.
///
/// `response_status` is `NULL` while the first request is still executing
/// (an in-flight claim). `claim_id` names the execution that currently owns
/// the claim; only that owner may refresh, complete or release it.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub route: String,
    pub actor_kind: ActorKind,
    pub actor_id: String,
    pub request_hash: String,
    pub claim_id: Uuid,
    pub response_status: Option<i32>,
    pub response_body: Option<Json<serde_json::Value>>,
    pub claimed_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl IdempotencyRecord {
    pub fn is_completed(&self) -> bool {
        self.response_status.is_some()
    }
}

#[derive(Debug, Clone)]
/// Insert an in-flight claim unless the identity already exists.
///
/// Returns the new row when this caller won the claim, `None` otherwise.
pub struct ClaimIdempotencyRecord {
    pub identity: IdempotencyIdentity,
    pub request_hash: String,
    pub claim_id: Uuid,
    pub now: OffsetDateTime,
}

impl Processor<ClaimIdempotencyRecord> for DatabaseProcessor {
    type Output = Option<IdempotencyRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimIdempotencyRecord")]
    async fn process(
        &self,
        cmd: ClaimIdempotencyRecord,
    ) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
        let ClaimIdempotencyRecord {
            identity,
            request_hash,
            claim_id,
            now,
        } = cmd;
        sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            INSERT INTO idempotency_records
                (idempotency_key, route, actor_kind, actor_id, request_hash, claim_id, claimed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (idempotency_key, route, actor_kind, actor_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(identity.key)
        .bind(identity.route)
        .bind(identity.actor.kind)
        .bind(identity.actor.id)
        .bind(request_hash)
        .bind(claim_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct GetIdempotencyRecord {
    pub identity: IdempotencyIdentity,
}

impl Processor<GetIdempotencyRecord> for DatabaseProcessor {
    type Output = Option<IdempotencyRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetIdempotencyRecord")]
    async fn process(
        &self,
        query: GetIdempotencyRecord,
    ) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
        let identity = query.identity;
        sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT *
            FROM idempotency_records
            WHERE idempotency_key = $1 AND route = $2 AND actor_kind = $3 AND actor_id = $4
            "#,
        )
        .bind(identity.key)
        .bind(identity.route)
        .bind(identity.actor.kind)
        .bind(identity.actor.id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Take over an in-flight claim whose owner stopped making progress.
///
/// Succeeds only if the claim is still unfinished, carries the same
/// request hash, and was last refreshed before `stale_before`. The claim
/// then belongs to `claim_id`.
pub struct TakeOverIdempotencyClaim {
    pub identity: IdempotencyIdentity,
    pub request_hash: String,
    pub claim_id: Uuid,
    pub stale_before: OffsetDateTime,
    pub now: OffsetDateTime,
}

impl Processor<TakeOverIdempotencyClaim> for DatabaseProcessor {
    type Output = Option<IdempotencyRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:TakeOverIdempotencyClaim")]
    async fn process(
        &self,
        cmd: TakeOverIdempotencyClaim,
    ) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
        let TakeOverIdempotencyClaim {
            identity,
            request_hash,
            claim_id,
            stale_before,
            now,
        } = cmd;
        sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            UPDATE idempotency_records
            SET claimed_at = $7, claim_id = $8
            WHERE idempotency_key = $1 AND route = $2 AND actor_kind = $3 AND actor_id = $4
              AND request_hash = $5
              AND response_status IS NULL
              AND claimed_at < $6
            RETURNING *
            "#,
        )
        .bind(identity.key)
        .bind(identity.route)
        .bind(identity.actor.kind)
        .bind(identity.actor.id)
        .bind(request_hash)
        .bind(stale_before)
        .bind(now)
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Heartbeat of a running execution: push `claimed_at` forward so the
/// claim is not mistaken for an abandoned one.
///
/// Returns the number of rows touched; `0` means the claim is gone or
/// belongs to someone else now.
pub struct RefreshIdempotencyClaim {
    pub identity: IdempotencyIdentity,
    pub claim_id: Uuid,
    pub now: OffsetDateTime,
}

impl Processor<RefreshIdempotencyClaim> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RefreshIdempotencyClaim")]
    async fn process(&self, cmd: RefreshIdempotencyClaim) -> Result<u64, sqlx::Error> {
        let RefreshIdempotencyClaim {
            identity,
            claim_id,
            now,
        } = cmd;
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET claimed_at = $6
            WHERE idempotency_key = $1 AND route = $2 AND actor_kind = $3 AND actor_id = $4
              AND claim_id = $5
              AND response_status IS NULL
            "#,
        )
        .bind(identity.key)
        .bind(identity.route)
        .bind(identity.actor.kind)
        .bind(identity.actor.id)
        .bind(claim_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Store the response of a finished execution on its claim.
///
/// Returns `0` when `claim_id` no longer owns the claim.
pub struct CompleteIdempotencyRecord {
    pub identity: IdempotencyIdentity,
    pub claim_id: Uuid,
    pub response_status: i32,
    pub response_body: serde_json::Value,
    pub now: OffsetDateTime,
}

impl Processor<CompleteIdempotencyRecord> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CompleteIdempotencyRecord")]
    async fn process(&self, cmd: CompleteIdempotencyRecord) -> Result<u64, sqlx::Error> {
        let CompleteIdempotencyRecord {
            identity,
            claim_id,
            response_status,
            response_body,
            now,
        } = cmd;
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET response_status = $5, response_body = $6, completed_at = $7
            WHERE idempotency_key = $1 AND route = $2 AND actor_kind = $3 AND actor_id = $4
              AND claim_id = $8
              AND response_status IS NULL
            "#,
        )
        .bind(identity.key)
        .bind(identity.route)
        .bind(identity.actor.kind)
        .bind(identity.actor.id)
        .bind(response_status)
        .bind(Json(response_body))
        .bind(now)
        .bind(claim_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Drop an unfinished claim after its operation failed, so the caller may
/// retry with the same key. Only the owning `claim_id` can release it.
pub struct ReleaseIdempotencyClaim {
    pub identity: IdempotencyIdentity,
    pub claim_id: Uuid,
}

impl Processor<ReleaseIdempotencyClaim> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ReleaseIdempotencyClaim")]
    async fn process(&self, cmd: ReleaseIdempotencyClaim) -> Result<u64, sqlx::Error> {
        let ReleaseIdempotencyClaim { identity, claim_id } = cmd;
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE idempotency_key = $1 AND route = $2 AND actor_kind = $3 AND actor_id = $4
              AND claim_id = $5
              AND response_status IS NULL
            "#,
        )
        .bind(identity.key)
        .bind(identity.route)
        .bind(identity.actor.kind)
        .bind(identity.actor.id)
        .bind(claim_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Delete completed records created before `older_than`. In-flight
/// claims are left to their owner or to a takeover.
pub struct ReapIdempotencyRecords {
    pub older_than: OffsetDateTime,
}

impl Processor<ReapIdempotencyRecords> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ReapIdempotencyRecords")]
    async fn process(&self, cmd: ReapIdempotencyRecords) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE created_at < $1
              AND response_status IS NOT NULL
            "#,
        )
        .bind(cmd.older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
