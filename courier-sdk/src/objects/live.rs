//! Live event frames pushed to dashboard clients.
//!
//! The `GET /api/v1/admin/live` endpoint streams these as Server-Sent
//! Events. The SSE `id` field carries [`LiveEvent::id`] so browsers send it
//! back in `Last-Event-ID` when they reconnect, and the SSE `event` field
//! carries [`LiveEvent::event_type`].

use serde::{Deserialize, Serialize};

/// A unit changed status (created, dispatched, failed, delivered, ...).
pub const DISPATCH_UPDATED: &str = "dispatch.updated";

/// A batch run finished; `data` holds its counters.
pub const BATCH_COMPLETED: &str = "dispatch.batch_completed";

/// One event delivered to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    /// Monotonic per-process counter.
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    /// Unix timestamp of publication.
    pub timestamp: i64,
}
