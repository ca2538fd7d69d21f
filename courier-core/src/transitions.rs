//! Dispatch unit lifecycle.
//!
//! ```text
//! QUEUED ──► DISPATCHED ──► SENT
//!   │          │   ▲  │
//!   │          │   │  └──► DONE      (jobs only)
//!   │          ▼   │
//!   │        FAILED ──► SENT        (late success callback)
//!   │          │
//!   └──────────┴──► SKIPPED         (from any non-terminal state)
//! ```
//!
//! [`BackoffPolicy::plan`] is a pure function from the current row and a
//! requested [`Transition`] to the full set of column changes. [`apply`]
//! writes that plan with a compare-and-set update, re-reading and
//! re-planning when a concurrent writer moved the row first.

use kanau::processor::Processor;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::dispatch_unit::{
    DispatchUnit, GetDispatchUnitById, TransitionDispatchUnit, UnitChange,
};
use crate::entities::{DispatchStatus, UnitKind};
use crate::framework::UnitStore;
use crate::utils::retry_delay;

/// Attempts made by [`apply`] before giving up on a contended row.
pub const MAX_CAS_ATTEMPTS: usize = 3;

/// Default number of failures a unit may accumulate before it is skipped.
pub const DEFAULT_MAX_RETRIES: i32 = 10;

/// A requested state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Hand-off to the workflow engine is starting.
    Dispatch { rendered_payload: String },
    /// The message was delivered.
    Deliver {
        provider_message_id: Option<String>,
        at: OffsetDateTime,
    },
    /// Hand-off or delivery failed; schedule a retry.
    Fail { error: String },
    /// Do not send this unit.
    Skip { reason: Option<String> },
    /// Business completion of a job.
    Complete,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Dispatch { .. } => "dispatch",
            Transition::Deliver { .. } => "deliver",
            Transition::Fail { .. } => "fail",
            Transition::Skip { .. } => "skip",
            Transition::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Apply(UnitChange),
    /// The unit is already where the transition would take it, or terminal.
    NoOp,
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("cannot {transition} a unit in status {from}")]
    Invalid {
        from: DispatchStatus,
        transition: &'static str,
    },
    #[error("unit {0} is not a job and cannot be completed")]
    NotAJob(Uuid),
    #[error("unit not found: {0}")]
    NotFound(Uuid),
    #[error("unit {0} kept changing concurrently")]
    Contended(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Retry budget applied to failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: i32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_retries: i32) -> Self {
        Self { max_retries }
    }

    /// Compute the change `transition` makes to `unit` at time `now`.
    pub fn plan(
        &self,
        unit: &DispatchUnit,
        transition: &Transition,
        now: OffsetDateTime,
    ) -> Result<Plan, TransitionError> {
        use DispatchStatus::*;

        if unit.status.is_terminal() {
            return Ok(Plan::NoOp);
        }

        let mut change = unit.current_change();
        let invalid = || TransitionError::Invalid {
            from: unit.status,
            transition: transition.name(),
        };

        match transition {
            Transition::Dispatch { rendered_payload } => {
                if !matches!(unit.status, Queued | Failed) {
                    return Err(invalid());
                }
                change.status = Dispatched;
                change.rendered_payload = Some(rendered_payload.clone());
                change.next_attempt_at = None;
            }
            Transition::Deliver {
                provider_message_id,
                at,
            } => {
                if !matches!(unit.status, Dispatched | Failed) {
                    return Err(invalid());
                }
                change.status = Sent;
                change.sent_at = Some(*at);
                if provider_message_id.is_some() {
                    change.provider_message_id = provider_message_id.clone();
                }
                change.next_attempt_at = None;
                change.last_error = None;
            }
            Transition::Fail { error } => match unit.status {
                Failed => return Ok(Plan::NoOp),
                Dispatched => {
                    change.retry_count = unit.retry_count.saturating_add(1);
                    change.last_error = Some(error.clone());
                    if change.retry_count > self.max_retries {
                        change.status = Skipped;
                        change.next_attempt_at = None;
                    } else {
                        change.status = Failed;
                        change.next_attempt_at = Some(now + retry_delay(change.retry_count));
                    }
                }
                _ => return Err(invalid()),
            },
            Transition::Skip { reason } => {
                change.status = Skipped;
                change.next_attempt_at = None;
                if reason.is_some() {
                    change.last_error = reason.clone();
                }
            }
            Transition::Complete => {
                if unit.kind != UnitKind::Job {
                    return Err(TransitionError::NotAJob(unit.id));
                }
                if unit.status != Dispatched {
                    return Err(invalid());
                }
                change.status = Done;
                change.next_attempt_at = None;
            }
        }

        Ok(Plan::Apply(change))
    }
}

/// Result of [`apply`].
#[derive(Debug, Clone)]
pub struct Applied {
    /// The unit after the transition (or as found, for a no-op).
    pub unit: DispatchUnit,
    /// Whether a row was actually written.
    pub changed: bool,
}

/// Write a single CAS attempt for a plan computed from `unit`.
///
/// Returns `None` when the row no longer matches `unit`'s status and version.
pub async fn write_change<S: UnitStore>(
    store: &S,
    unit: &DispatchUnit,
    change: UnitChange,
) -> Result<Option<DispatchUnit>, sqlx::Error> {
    store
        .process(TransitionDispatchUnit {
            id: unit.id,
            expected_status: unit.status,
            expected_version: unit.version,
            change,
        })
        .await
}

/// Apply `transition` to the unit with `unit_id`.
///
/// Re-reads and re-plans up to [`MAX_CAS_ATTEMPTS`] times when the
/// conditional update loses to another writer.
pub async fn apply<S: UnitStore>(
    store: &S,
    policy: &BackoffPolicy,
    unit_id: Uuid,
    transition: &Transition,
    now: OffsetDateTime,
) -> Result<Applied, TransitionError> {
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let unit = store
            .process(GetDispatchUnitById { id: unit_id })
            .await?
            .ok_or(TransitionError::NotFound(unit_id))?;

        let change = match policy.plan(&unit, transition, now)? {
            Plan::NoOp => {
                debug!(
                    unit_id = %unit_id,
                    status = %unit.status,
                    transition = transition.name(),
                    "Transition is a no-op"
                );
                return Ok(Applied {
                    unit,
                    changed: false,
                });
            }
            Plan::Apply(change) => change,
        };

        if let Some(updated) = write_change(store, &unit, change).await? {
            debug!(
                unit_id = %unit_id,
                from = %unit.status,
                to = %updated.status,
                transition = transition.name(),
                "Transition applied"
            );
            return Ok(Applied {
                unit: updated,
                changed: true,
            });
        }

        warn!(unit_id = %unit_id, attempt, "Concurrent update on unit, re-reading");
    }

    Err(TransitionError::Contended(unit_id))
}
