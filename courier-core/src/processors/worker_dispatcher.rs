//! Batch and immediate dispatch of units to the workflow engine.
//!
//! For each unit: render its template, claim it with a compare-and-set to
//! `DISPATCHED`, hand the render job to the channel, and record the
//! outcome. Per-unit failures are counted; only storage failures abort a
//! batch.

use courier_sdk::objects::{BatchSummary, RenderJob};
use kanau::processor::Processor;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Templates;
use crate::entities::DispatchStatus;
use crate::entities::dispatch_unit::{DispatchUnit, GetDispatchUnitById, ListDueDispatchUnits};
use crate::events::{BATCH_COMPLETED, LiveEventBus};
use crate::framework::UnitStore;
use crate::processors::workflow_channel::{JobSink, TransportError};
use crate::transitions::{self, BackoffPolicy, Plan, Transition, TransitionError};
use crate::utils::{RenderError, render};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unit not found: {0}")]
    NotFound(Uuid),
    #[error("unit {unit_id} is not due before {next_attempt_at}")]
    NotDue {
        unit_id: Uuid,
        next_attempt_at: OffsetDateTime,
    },
    #[error("unit {0} is being dispatched by another request")]
    Busy(Uuid),
    #[error("workflow rate limited the send; unit {0} will be retried")]
    RateLimited(Uuid),
    #[error(transparent)]
    Transition(TransitionError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<TransitionError> for DispatchError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Database(e) => DispatchError::Database(e),
            TransitionError::NotFound(id) => DispatchError::NotFound(id),
            other => DispatchError::Transition(other),
        }
    }
}

/// Parameters of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Already clamped to the allowed range.
    pub limit: u32,
    pub retry_failed_only: bool,
    pub dry_run: bool,
}

/// What happened to a single unit.
#[derive(Debug)]
enum UnitOutcome {
    /// Handed off; the unit stays `DISPATCHED` until the callback.
    Sent(DispatchUnit),
    Skipped(DispatchUnit),
    Failed(DispatchUnit),
    RateLimited(DispatchUnit),
    /// Another writer claimed the unit first.
    Lost,
}

pub struct WorkerDispatcher<S, C> {
    store: S,
    channel: C,
    bus: LiveEventBus,
}

impl<S: UnitStore, C: JobSink> WorkerDispatcher<S, C> {
    pub fn new(store: S, channel: C, bus: LiveEventBus) -> Self {
        Self {
            store,
            channel,
            bus,
        }
    }

    /// Dispatch up to `options.limit` due units, oldest first.
    pub async fn run_batch(
        &self,
        options: BatchOptions,
        templates: &Templates,
        policy: &BackoffPolicy,
    ) -> Result<BatchSummary, DispatchError> {
        let units = self
            .store
            .process(ListDueDispatchUnits {
                limit: i64::from(options.limit),
                retry_failed_only: options.retry_failed_only,
                now: OffsetDateTime::now_utc(),
            })
            .await?;

        let mut summary = BatchSummary::default();

        if options.dry_run {
            for unit in &units {
                summary.processed += 1;
                if let Err(e) = render_unit(unit, templates) {
                    info!(unit_id = %unit.id, error = %e, "Dry run: unit would be skipped");
                    summary.skipped += 1;
                }
            }
            return Ok(summary);
        }

        for unit in units {
            let unit_id = unit.id;
            let outcome = match self.process_unit(unit, templates, policy).await {
                Ok(outcome) => outcome,
                Err(TransitionError::Database(e)) => {
                    error!(unit_id = %unit_id, error = %e, "Batch aborted by storage failure");
                    return Err(DispatchError::Database(e));
                }
                Err(e) => {
                    warn!(unit_id = %unit_id, error = %e, "Unit left untouched");
                    continue;
                }
            };

            match outcome {
                UnitOutcome::Lost => continue,
                UnitOutcome::Sent(_) => summary.sent += 1,
                UnitOutcome::Skipped(_) => summary.skipped += 1,
                UnitOutcome::Failed(_) => summary.failed += 1,
                UnitOutcome::RateLimited(_) => {
                    summary.processed += 1;
                    summary.failed += 1;
                    summary.rate_limited += 1;
                    warn!("Rate limited by workflow, stopping batch early");
                    break;
                }
            }
            summary.processed += 1;
        }

        info!(
            processed = summary.processed,
            sent = summary.sent,
            skipped = summary.skipped,
            failed = summary.failed,
            rate_limited = summary.rate_limited,
            "Batch completed"
        );
        self.bus.publish(
            BATCH_COMPLETED,
            json!({
                "processed": summary.processed,
                "sent": summary.sent,
                "skipped": summary.skipped,
                "failed": summary.failed,
                "rate_limited": summary.rate_limited,
            }),
        );
        Ok(summary)
    }

    /// Send one unit now.
    ///
    /// A `FAILED` unit is only re-sent before its `next_attempt_at` when
    /// `force` is set. Terminal units are returned unchanged.
    pub async fn dispatch_one(
        &self,
        unit_id: Uuid,
        force: bool,
        templates: &Templates,
        policy: &BackoffPolicy,
    ) -> Result<DispatchUnit, DispatchError> {
        let now = OffsetDateTime::now_utc();
        let unit = self
            .store
            .process(GetDispatchUnitById { id: unit_id })
            .await?
            .ok_or(DispatchError::NotFound(unit_id))?;

        if unit.status.is_terminal() {
            info!(unit_id = %unit_id, status = %unit.status, "Send requested for settled unit");
            return Ok(unit);
        }
        if unit.status == DispatchStatus::Failed
            && !force
            && let Some(next_attempt_at) = unit.next_attempt_at
            && next_attempt_at > now
        {
            return Err(DispatchError::NotDue {
                unit_id,
                next_attempt_at,
            });
        }

        match self.process_unit(unit, templates, policy).await? {
            UnitOutcome::Sent(unit) | UnitOutcome::Skipped(unit) | UnitOutcome::Failed(unit) => {
                Ok(unit)
            }
            UnitOutcome::RateLimited(_) => Err(DispatchError::RateLimited(unit_id)),
            UnitOutcome::Lost => Err(DispatchError::Busy(unit_id)),
        }
    }

    async fn process_unit(
        &self,
        unit: DispatchUnit,
        templates: &Templates,
        policy: &BackoffPolicy,
    ) -> Result<UnitOutcome, TransitionError> {
        // Hand-offs can take up to the channel timeout, so every unit reads
        // the clock for itself.
        let now = OffsetDateTime::now_utc();
        let body = match render_unit(&unit, templates) {
            Ok(body) => body,
            Err(e) => {
                warn!(unit_id = %unit.id, error = %e, "Render failed, skipping unit");
                let applied = transitions::apply(
                    &self.store,
                    policy,
                    unit.id,
                    &Transition::Skip {
                        reason: Some(e.to_string()),
                    },
                    now,
                )
                .await?;
                if !applied.changed {
                    return Ok(UnitOutcome::Lost);
                }
                self.bus.publish_unit(&applied.unit);
                return Ok(UnitOutcome::Skipped(applied.unit));
            }
        };

        let transition = Transition::Dispatch {
            rendered_payload: body.clone(),
        };
        let Plan::Apply(change) = policy.plan(&unit, &transition, now)? else {
            return Ok(UnitOutcome::Lost);
        };
        let Some(dispatched) = transitions::write_change(&self.store, &unit, change).await? else {
            info!(unit_id = %unit.id, "Unit claimed by a concurrent dispatch");
            return Ok(UnitOutcome::Lost);
        };
        self.bus.publish_unit(&dispatched);

        let job = RenderJob {
            unit_id: dispatched.id,
            kind: dispatched.kind.into(),
            channel: dispatched.channel.into(),
            recipient: dispatched.recipient.clone(),
            template_key: dispatched.template_key.clone(),
            body,
            correlation_ids: dispatched.correlation_ids.0.clone(),
        };

        match self.channel.process(job).await {
            Ok(accepted) => {
                info!(
                    unit_id = %dispatched.id,
                    execution_id = accepted.execution_id.as_deref().unwrap_or("-"),
                    "Unit handed off to workflow"
                );
                Ok(UnitOutcome::Sent(dispatched))
            }
            Err(e) => {
                warn!(unit_id = %dispatched.id, error = %e, "Hand-off to workflow failed");
                let failed = self.record_failure(&dispatched, &e, policy).await?;
                if e.is_rate_limited() {
                    Ok(UnitOutcome::RateLimited(failed))
                } else {
                    Ok(UnitOutcome::Failed(failed))
                }
            }
        }
    }

    /// Backoff is measured from the moment the hand-off failed.
    async fn record_failure(
        &self,
        unit: &DispatchUnit,
        error: &TransportError,
        policy: &BackoffPolicy,
    ) -> Result<DispatchUnit, TransitionError> {
        let applied = transitions::apply(
            &self.store,
            policy,
            unit.id,
            &Transition::Fail {
                error: error.to_string(),
            },
            OffsetDateTime::now_utc(),
        )
        .await?;
        if applied.changed {
            self.bus.publish_unit(&applied.unit);
        }
        Ok(applied.unit)
    }
}

fn render_unit(unit: &DispatchUnit, templates: &Templates) -> Result<String, RenderError> {
    let template = templates
        .get(&unit.template_key)
        .ok_or_else(|| RenderError::UnknownTemplate(unit.template_key.clone()))?;
    render(template, &unit.variables.0)
}
