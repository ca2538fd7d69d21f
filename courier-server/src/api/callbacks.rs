//! Callback API: outcome reports from the sending workflow.
//!
//! # Endpoints
//!
//! - `POST /dispatch` – report the outcome of a hand-off
//!
//! Delivery is at-least-once. When the workflow sends an `Idempotency-Key`
//! (typically its own delivery id) the report is memoized under the
//! `workflow:callback` actor and a redelivery is answered from the ledger.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use courier_sdk::objects::DispatchCallback;

use super::error::ApiError;
use super::extractors::{CallbackAuth, IdempotencyKey};
use super::{idempotent, produce, request_value};
use crate::state::AppState;

const ROUTE: &str = "POST /api/v1/callbacks/dispatch";

pub fn router() -> Router<AppState> {
    Router::new().route("/dispatch", post(dispatch_callback))
}

async fn dispatch_callback(
    State(state): State<AppState>,
    auth: CallbackAuth,
    key: IdempotencyKey,
    payload: Result<Json<DispatchCallback>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(callback) = payload?;
    tracing::debug!(unit_id = %callback.unit_id, status = ?callback.status, "Callback received");

    let Some(key) = key.0 else {
        let response = ingest(&state, &callback).await?;
        return Ok((StatusCode::OK, Json(response)).into_response());
    };

    let request = request_value(&callback)?;
    let state = &state;
    let callback = &callback;
    idempotent(
        state,
        &key,
        ROUTE,
        &auth.actor(),
        &request,
        move || async move {
            let response = ingest(state, callback).await?;
            produce(StatusCode::OK, &response)
        },
    )
    .await
}

async fn ingest(
    state: &AppState,
    callback: &DispatchCallback,
) -> Result<courier_sdk::objects::CallbackResponse, ApiError> {
    let policy = state.backoff_policy().await;
    Ok(state.ingestor().ingest(callback, &policy).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{TEST_CALLBACK_SECRET, test_state};
    use axum::body::Body;
    use courier_sdk::objects::ErrorBody;
    use courier_sdk::signature::CALLBACK_SECRET_HEADER;
    use tower::ServiceExt;

    async fn post(secret: &str, body: &'static str) -> (StatusCode, ErrorBody) {
        let request = axum::http::Request::post("/dispatch")
            .header(CALLBACK_SECRET_HEADER, secret)
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router()
            .with_state(test_state())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_unknown_status_is_a_validation_error() {
        let (status, body) = post(
            TEST_CALLBACK_SECRET,
            r#"{"unitId":"0190f0a0-0000-7000-8000-000000000000","status":"DELIVERED"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "validation");
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected_before_parsing() {
        let (status, body) = post("nope", "not json").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.error, "unauthorized");
    }
}
