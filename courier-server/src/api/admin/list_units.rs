use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use courier_core::entities::dispatch_unit::ListDispatchUnits;
use courier_sdk::objects::DispatchUnitResponse;
use courier_sdk::objects::admin::{ListUnitsQuery, clamp_pagination};
use kanau::processor::Processor;

use crate::api::error::ApiError;
use crate::api::extractors::AdminAuth;
use crate::state::AppState;

/// `GET /units`: list units newest first, with pagination and an optional
/// status filter.
pub async fn list_units(
    State(state): State<AppState>,
    _auth: AdminAuth,
    query: Result<Query<ListUnitsQuery>, QueryRejection>,
) -> Result<Json<Vec<DispatchUnitResponse>>, ApiError> {
    let Query(query) = query?;
    let (limit, offset) = clamp_pagination(query.limit, query.offset);

    let units = state
        .processor()
        .process(ListDispatchUnits {
            limit,
            offset,
            status: query.status.map(Into::into),
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(units.iter().map(|u| u.to_response()).collect()))
}
