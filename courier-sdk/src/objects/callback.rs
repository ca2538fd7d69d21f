//! Delivery callbacks posted by the workflow engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dispatch::DispatchUnitResponse;

/// Outcome reported by the workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackStatus {
    Sent,
    Failed,
    Skipped,
    /// Final business completion of a job-kind unit.
    Done,
}

/// Callback body: `{ unitId, status, providerMessageId?, error?, occurredAt? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchCallback {
    pub unit_id: Uuid,
    pub status: CallbackStatus,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Unix timestamp at which the outcome happened on the provider side.
    #[serde(default)]
    pub occurred_at: Option<i64>,
}

/// Response to a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackResponse {
    /// `false` when the unit was already in a state the callback could not
    /// change (e.g. a duplicate `SENT`).
    pub applied: bool,
    pub unit: DispatchUnitResponse,
}
