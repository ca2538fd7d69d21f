//! Dispatch unit request and response types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Signature;

/// Lifecycle status of a dispatch unit.
///
/// This is the API/DTO version without sqlx::Type.
/// For database operations, use the version in `courier-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Queued,
    Dispatched,
    Sent,
    Failed,
    Skipped,
    Done,
}

impl DispatchStatus {
    /// `SENT`, `SKIPPED` and `DONE` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchStatus::Sent | DispatchStatus::Skipped | DispatchStatus::Done
        )
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchStatus::Queued => write!(f, "QUEUED"),
            DispatchStatus::Dispatched => write!(f, "DISPATCHED"),
            DispatchStatus::Sent => write!(f, "SENT"),
            DispatchStatus::Failed => write!(f, "FAILED"),
            DispatchStatus::Skipped => write!(f, "SKIPPED"),
            DispatchStatus::Done => write!(f, "DONE"),
        }
    }
}

/// Whether a unit is an outbound message or a background job.
///
/// Only jobs can reach `DONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Message,
    Job,
}

/// Delivery channel the workflow engine should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Email,
    Sms,
}

/// Weak references to the business records a unit originated from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<Uuid>,
}

/// Request payload for creating a new dispatch unit.
///
/// Sent by the application backend to the Service API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDispatchUnit {
    #[serde(default = "default_kind")]
    pub kind: UnitKind,
    pub channel: Channel,
    pub recipient: String,
    pub template_key: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub correlation_ids: CorrelationIds,
}

fn default_kind() -> UnitKind {
    UnitKind::Message
}

impl Signature for CreateDispatchUnit {}

/// Reference to an existing unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitRef {
    pub unit_id: Uuid,
}

impl Signature for UnitRef {}

/// Request payload for sending one unit immediately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SendUnitRequest {
    pub unit_id: Uuid,
    /// Re-send a `FAILED` unit before its scheduled retry time.
    #[serde(default)]
    pub force: bool,
}

impl Signature for SendUnitRequest {}

/// Request payload for marking a unit as not-to-be-sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkipUnitRequest {
    pub unit_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Signature for SkipUnitRequest {}

/// Full dispatch unit state as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchUnitResponse {
    pub unit_id: Uuid,
    pub kind: UnitKind,
    pub channel: Channel,
    pub recipient: String,
    pub template_key: String,
    pub rendered_payload: Option<String>,
    pub status: DispatchStatus,
    pub retry_count: i32,
    /// Unix timestamp of the next scheduled retry (only for `FAILED`).
    pub next_attempt_at: Option<i64>,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub correlation_ids: CorrelationIds,
    pub created_at: i64,
    pub sent_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&DispatchStatus::Dispatched).unwrap(),
            "\"DISPATCHED\""
        );
        let parsed: DispatchStatus = serde_json::from_str("\"SKIPPED\"").unwrap();
        assert_eq!(parsed, DispatchStatus::Skipped);
    }

    #[test]
    fn test_create_defaults_to_message_kind() {
        let json = r#"{"channel":"whatsapp","recipient":"+10000000","template_key":"remind_schedule"}"#;
        let create: CreateDispatchUnit = serde_json::from_str(json).unwrap();
        assert_eq!(create.kind, UnitKind::Message);
        assert!(create.variables.is_empty());
        assert_eq!(create.correlation_ids, CorrelationIds::default());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(DispatchStatus::Sent.is_terminal());
        assert!(DispatchStatus::Done.is_terminal());
        assert!(DispatchStatus::Skipped.is_terminal());
        assert!(!DispatchStatus::Failed.is_terminal());
        assert!(!DispatchStatus::Queued.is_terminal());
    }
}
