use axum::{body::Bytes, extract::State, http::StatusCode, response::Response};
use courier_sdk::objects::RunBatchRequest;

use super::optional_body;
use crate::api::error::ApiError;
use crate::api::extractors::{AdminAuth, IdempotencyKey};
use crate::api::{idempotent, produce, request_value};
use crate::state::AppState;

/// `POST /batches`: the dashboard's "dispatch now" button.
pub async fn run_batch(
    State(state): State<AppState>,
    auth: AdminAuth,
    key: IdempotencyKey,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key = key.required()?;
    let batch: RunBatchRequest = optional_body(&body)?;
    let request = request_value(&batch)?;
    let state = &state;

    idempotent(
        state,
        key,
        "POST /api/v1/admin/batches",
        &auth.actor(),
        &request,
        move || async move {
            let summary = crate::api::run_batch(state, batch).await?;
            produce(StatusCode::OK, &summary)
        },
    )
    .await
}
