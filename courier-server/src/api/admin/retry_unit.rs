use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use courier_sdk::objects::SendUnitRequest;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::extractors::{AdminAuth, IdempotencyKey};
use crate::api::{idempotent, produce, request_value};
use crate::state::AppState;

/// `POST /units/{unit_id}/retry`: send a unit now, even if its scheduled
/// retry time has not come yet.
pub async fn retry_unit(
    State(state): State<AppState>,
    auth: AdminAuth,
    key: IdempotencyKey,
    Path(unit_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let key = key.required()?;
    let request = request_value(&SendUnitRequest {
        unit_id,
        force: true,
    })?;
    let state = &state;

    idempotent(
        state,
        key,
        "POST /api/v1/admin/units/{unit_id}/retry",
        &auth.actor(),
        &request,
        move || async move {
            let templates = state.templates().await;
            let policy = state.backoff_policy().await;
            let unit = state
                .dispatcher()
                .dispatch_one(unit_id, true, &templates, &policy)
                .await?;
            tracing::info!(unit_id = %unit_id, status = %unit.status, "Admin forced a retry");
            produce(StatusCode::OK, &unit.to_response())
        },
    )
    .await
}
