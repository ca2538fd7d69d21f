//! Service API handlers.
//!
//! These endpoints are called by application backends and require a body
//! signed with the caller's client secret. Every mutating endpoint requires
//! an `Idempotency-Key` and is memoized per client.
//!
//! # Endpoints
//!
//! - `POST /units`        – create a queued unit
//! - `POST /units/status` – fetch a unit
//! - `POST /units/send`   – send one unit now
//! - `POST /units/skip`   – mark a unit as not-to-be-sent
//! - `POST /batches`      – dispatch a batch of due units

use axum::{Json, Router, extract::State, http::StatusCode, response::Response, routing::post};
use courier_core::processors::unit_commands;
use courier_sdk::objects::{
    CreateDispatchUnit, DispatchUnitResponse, RunBatchRequest, SendUnitRequest, SkipUnitRequest,
    UnitRef,
};

use super::error::ApiError;
use super::extractors::{IdempotencyKey, SignedBody};
use super::{idempotent, produce, request_value, run_batch};
use crate::state::AppState;

/// Build the Service API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/units", post(create_unit))
        .route("/units/status", post(get_unit_status))
        .route("/units/send", post(send_unit))
        .route("/units/skip", post(skip_unit))
        .route("/batches", post(trigger_batch))
}

/// `POST /units`: create a new `QUEUED` unit. Answers `201`.
async fn create_unit(
    State(state): State<AppState>,
    key: IdempotencyKey,
    signed: SignedBody<CreateDispatchUnit>,
) -> Result<Response, ApiError> {
    let key = key.required()?;
    let actor = signed.actor();
    let request = request_value(&signed.body)?;
    let state = &state;
    let payload = signed.body;

    idempotent(
        state,
        key,
        "POST /api/v1/service/units",
        &actor,
        &request,
        move || async move {
            let unit =
                unit_commands::create_unit(&state.processor(), &state.bus, payload).await?;
            produce(StatusCode::CREATED, &unit.to_response())
        },
    )
    .await
}

/// `POST /units/status`: read-only, so not memoized.
async fn get_unit_status(
    State(state): State<AppState>,
    signed: SignedBody<UnitRef>,
) -> Result<Json<DispatchUnitResponse>, ApiError> {
    let unit = unit_commands::get_unit(&state.processor(), signed.body.unit_id).await?;
    Ok(Json(unit.to_response()))
}

/// `POST /units/send`: hand one unit to the workflow now.
///
/// A rate-limited hand-off answers `429`; the unit is `FAILED` with a
/// scheduled retry either way.
async fn send_unit(
    State(state): State<AppState>,
    key: IdempotencyKey,
    signed: SignedBody<SendUnitRequest>,
) -> Result<Response, ApiError> {
    let key = key.required()?;
    let actor = signed.actor();
    let request = request_value(&signed.body)?;
    let state = &state;
    let SendUnitRequest { unit_id, force } = signed.body;

    idempotent(
        state,
        key,
        "POST /api/v1/service/units/send",
        &actor,
        &request,
        move || async move {
            let templates = state.templates().await;
            let policy = state.backoff_policy().await;
            let unit = state
                .dispatcher()
                .dispatch_one(unit_id, force, &templates, &policy)
                .await?;
            produce(StatusCode::OK, &unit.to_response())
        },
    )
    .await
}

/// `POST /units/skip`
async fn skip_unit(
    State(state): State<AppState>,
    key: IdempotencyKey,
    signed: SignedBody<SkipUnitRequest>,
) -> Result<Response, ApiError> {
    let key = key.required()?;
    let actor = signed.actor();
    let request = request_value(&signed.body)?;
    let state = &state;
    let SkipUnitRequest { unit_id, reason } = signed.body;

    idempotent(
        state,
        key,
        "POST /api/v1/service/units/skip",
        &actor,
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

/// `POST /batches`: a repeated trigger with the same key replays the first
/// run's counters instead of sending again.
async fn trigger_batch(
    State(state): State<AppState>,
    key: IdempotencyKey,
    signed: SignedBody<RunBatchRequest>,
) -> Result<Response, ApiError> {
    let key = key.required()?;
    let actor = signed.actor();
    let request = request_value(&signed.body)?;
    let state = &state;
    let batch = signed.body;

    idempotent(
        state,
        key,
        "POST /api/v1/service/batches",
        &actor,
        &request,
        move || async move {
            let summary = run_batch(state, batch).await?;
            produce(StatusCode::OK, &summary)
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::test_state;
    use axum::body::Body;
    use courier_sdk::signature::{CLIENT_HEADER, SIGNATURE_HEADER, SignedObject};
    use courier_sdk::objects::ErrorBody;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_mutations_require_idempotency_key() {
        let signed = SignedObject::new(
            SkipUnitRequest {
                unit_id: Uuid::now_v7(),
                reason: None,
            },
            b"crm-secret",
        )
        .unwrap();
        let request = axum::http::Request::post("/units/skip")
            .header(SIGNATURE_HEADER, signed.to_header())
            .header(CLIENT_HEADER, "crm")
            .body(Body::from(signed.json))
            .unwrap();

        let response = router()
            .with_state(test_state())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "validation");
        assert!(body.message.contains("Idempotency-Key"));
    }
}
