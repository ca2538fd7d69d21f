use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use courier_core::processors::unit_commands;
use courier_sdk::objects::SkipUnitRequest;
use courier_sdk::objects::admin::AdminSkipRequest;
use uuid::Uuid;

use super::optional_body;
use crate::api::error::ApiError;
use crate::api::extractors::{AdminAuth, IdempotencyKey};
use crate::api::{idempotent, produce, request_value};
use crate::state::AppState;

/// `POST /units/{unit_id}/skip`: body `{"reason": "..."}` is optional.
pub async fn skip_unit(
    State(state): State<AppState>,
    auth: AdminAuth,
    key: IdempotencyKey,
    Path(unit_id): Path<Uuid>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key = key.required()?;
    let AdminSkipRequest { reason } = optional_body(&body)?;
    let request = request_value(&SkipUnitRequest {
        unit_id,
        reason: reason.clone(),
    })?;
    let state = &state;

    idempotent(
        state,
        key,
        "POST /api/v1/admin/units/{unit_id}/skip",
        &auth.actor(),
        &request,
        move || async move {
            let policy = state.backoff_policy().await;
            let unit = unit_commands::skip_unit(
                &state.processor(),
                &state.bus,
                &policy,
                unit_id,
                reason,
            )
            .await?;
            produce(StatusCode::OK, &unit.to_response())
        },
    )
    .await
}
