//! HTTP API, mounted under `/api/v1`.
//!
//! - `/service/*`: application backends, signed bodies.
//! - `/callbacks/*`: the sending workflow, shared secret.
//! - `/admin/*`: the admin dashboard, admin secret.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_core::entities::idempotency_record::Actor;
use courier_core::processors::{BatchOptions, LedgerOutcome};
use courier_sdk::objects::{BatchSummary, RunBatchRequest};
use courier_sdk::signature::IDEMPOTENT_REPLAYED_HEADER;
use serde::Serialize;
use serde_json::Value;

use crate::state::AppState;

pub mod admin;
mod callbacks;
pub mod error;
pub mod extractors;
mod service;

use error::ApiError;

/// Build the `/api/v1` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/service", service::router())
        .nest("/callbacks", callbacks::router())
        .nest("/admin", admin::router())
}

/// Status and JSON body an operation produces, ready to be memoized.
type Produced = Result<(u16, Value), ApiError>;

fn produce<T: Serialize>(status: StatusCode, body: &T) -> Produced {
    let value = serde_json::to_value(body)
        .map_err(|e| ApiError::Internal(format!("failed to encode response: {e}")))?;
    Ok((status.as_u16(), value))
}

/// Run `operation` through the idempotency ledger and turn the (possibly
/// replayed) outcome into a response.
async fn idempotent<F, Fut>(
    state: &AppState,
    key: &str,
    route: &str,
    actor: &Actor,
    request: &Value,
    operation: F,
) -> Result<Response, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Produced>,
{
    let outcome = state
        .ledger()
        .execute(key, route, actor, request, operation)
        .await?;
    Ok(respond(outcome))
}

fn respond(outcome: LedgerOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);
    if outcome.replayed {
        (
            status,
            [(IDEMPOTENT_REPLAYED_HEADER, "true")],
            Json(outcome.body),
        )
            .into_response()
    } else {
        (status, Json(outcome.body)).into_response()
    }
}

/// Request value the ledger hashes; includes path parameters.
fn request_value<T: Serialize>(request: &T) -> Result<Value, ApiError> {
    serde_json::to_value(request)
        .map_err(|e| ApiError::Internal(format!("failed to encode request: {e}")))
}

/// Shared by the service and admin batch triggers.
async fn run_batch(state: &AppState, request: RunBatchRequest) -> Result<BatchSummary, ApiError> {
    let limit = state.config.dispatch.read().await.batch_limit(request.limit);
    let options = BatchOptions {
        limit,
        retry_failed_only: request.retry_failed_only,
        dry_run: request.dry_run,
    };
    let templates = state.templates().await;
    let policy = state.backoff_policy().await;
    Ok(state
        .dispatcher()
        .run_batch(options, &templates, &policy)
        .await?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version};
    use argon2::password_hash::{SaltString, rand_core::OsRng};
    use courier_core::framework::MemoryProcessor;
    use tokio::sync::{RwLock, watch};

    use crate::config::runtime::{
        AdminConfig, ClientConfig, DispatchConfig, LedgerConfig, LiveConfig, ServerConfig,
        SharedConfig, WorkflowConfig,
    };
    use crate::state::AppState;

    pub const TEST_ADMIN_SECRET: &str = "admin-secret";
    pub const TEST_CALLBACK_SECRET: &str = "callback-secret";

    pub fn test_state() -> AppState {
        test_state_with(MemoryProcessor::default())
    }

    /// State over `store`, so a test can seed and inspect the tables.
    pub fn test_state_with(store: MemoryProcessor) -> AppState {
        let params = Params::new(8, 1, 1, None).unwrap();
        let hash = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(TEST_ADMIN_SECRET.as_bytes(), &SaltString::generate(&mut OsRng))
            .unwrap()
            .to_string();

        let clients = HashMap::from([(
            "crm".to_string(),
            ClientConfig::new("crm".to_string(), b"crm-secret".to_vec()),
        )]);

        let config = SharedConfig {
            server: Arc::new(RwLock::new(ServerConfig {
                listen: "127.0.0.1:0".parse().unwrap(),
            })),
            admin: Arc::new(RwLock::new(AdminConfig::new(hash))),
            clients: Arc::new(RwLock::new(clients)),
            workflow: Arc::new(RwLock::new(WorkflowConfig {
                url: "http://127.0.0.1:9/render".parse().unwrap(),
                secret: b"workflow-secret".to_vec().into_boxed_slice(),
                callback_secret: TEST_CALLBACK_SECRET.to_string(),
                timeout: Duration::from_secs(1),
            })),
            dispatch: Arc::new(RwLock::new(DispatchConfig::default())),
            templates: Arc::new(RwLock::new(HashMap::new())),
            ledger: LedgerConfig::default(),
            live: LiveConfig::default(),
        };

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        AppState::new(store, config, shutdown_rx)
    }
}
