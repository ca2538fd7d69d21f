//! Caller-initiated unit operations: create, look up, skip.

use courier_sdk::objects::CreateDispatchUnit;
use kanau::processor::Processor;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::entities::dispatch_unit::{DispatchUnit, GetDispatchUnitById, InsertDispatchUnit};
use crate::events::LiveEventBus;
use crate::framework::UnitStore;
use crate::transitions::{self, BackoffPolicy, Transition, TransitionError};

/// Longest accepted recipient or template key.
const MAX_FIELD_LENGTH: usize = 255;

#[derive(Debug, Error)]
pub enum UnitCommandError {
    #[error("invalid unit: {0}")]
    Validation(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn require(field: &str, value: &str) -> Result<(), UnitCommandError> {
    if value.trim().is_empty() {
        return Err(UnitCommandError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_FIELD_LENGTH {
        return Err(UnitCommandError::Validation(format!(
            "{field} must be at most {MAX_FIELD_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Insert a new `QUEUED` unit.
pub async fn create_unit<S: UnitStore>(
    store: &S,
    bus: &LiveEventBus,
    request: CreateDispatchUnit,
) -> Result<DispatchUnit, UnitCommandError> {
    require("recipient", &request.recipient)?;
    require("template_key", &request.template_key)?;

    let unit = store
        .process(InsertDispatchUnit {
            kind: request.kind.into(),
            channel: request.channel.into(),
            recipient: request.recipient,
            template_key: request.template_key,
            variables: request.variables,
            correlation_ids: request.correlation_ids,
        })
        .await?;

    info!(unit_id = %unit.id, template_key = %unit.template_key, "Dispatch unit created");
    bus.publish_unit(&unit);
    Ok(unit)
}

pub async fn get_unit<S: UnitStore>(store: &S, unit_id: Uuid) -> Result<DispatchUnit, UnitCommandError> {
    store
        .process(GetDispatchUnitById { id: unit_id })
        .await?
        .ok_or(UnitCommandError::Transition(TransitionError::NotFound(unit_id)))
}

/// Mark a unit as not to be sent. A terminal unit is returned unchanged.
pub async fn skip_unit<S: UnitStore>(
    store: &S,
    bus: &LiveEventBus,
    policy: &BackoffPolicy,
    unit_id: Uuid,
    reason: Option<String>,
) -> Result<DispatchUnit, UnitCommandError> {
    let applied = transitions::apply(
        store,
        policy,
        unit_id,
        &Transition::Skip { reason },
        OffsetDateTime::now_utc(),
    )
    .await?;
    if applied.changed {
        info!(unit_id = %unit_id, "Dispatch unit skipped");
        bus.publish_unit(&applied.unit);
    }
    Ok(applied.unit)
}
