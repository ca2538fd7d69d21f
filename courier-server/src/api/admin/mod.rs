//! Admin API handlers.
//!
//! These endpoints are called by the admin dashboard frontend and require
//! the `Courier-Admin-Authorization` header with the plaintext admin secret.
//!
//! # Endpoints
//!
//! - `GET  /units`              – list units (paginated, filterable by status)
//! - `POST /units/{id}/retry`   – force a re-send now
//! - `POST /units/{id}/skip`    – mark a unit as not-to-be-sent
//! - `POST /batches`            – dispatch a batch of due units
//! - `GET  /live`               – Server-Sent Events stream of pipeline events

use axum::{
    Router,
    body::Bytes,
    routing::{get, post},
};
use serde::de::DeserializeOwned;

use super::error::ApiError;
use crate::state::AppState;

mod list_units;
mod live;
mod retry_unit;
mod run_batch;
mod skip_unit;

/// Build the Admin API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/units", get(list_units::list_units))
        .route("/units/{unit_id}/retry", post(retry_unit::retry_unit))
        .route("/units/{unit_id}/skip", post(skip_unit::skip_unit))
        .route("/batches", post(run_batch::run_batch))
        .route("/live", get(live::live_events))
}

/// Parse a JSON body the dashboard may omit entirely.
pub(crate) fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}
