use serde::{Deserialize, Serialize};

use super::Signature;

/// Request payload for triggering one dispatch batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunBatchRequest {
    /// Maximum number of units to pick up. Server default when absent.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Only pick up `FAILED` units whose retry time has passed.
    #[serde(default)]
    pub retry_failed_only: bool,
    /// Render and count without sending or persisting anything.
    #[serde(default)]
    pub dry_run: bool,
}

impl Signature for RunBatchRequest {}

/// Aggregate counters of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: u32,
    pub sent: u32,
    pub skipped: u32,
    pub failed: u32,
    pub rate_limited: u32,
}
