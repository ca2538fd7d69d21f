//! Render job handed to the external workflow engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Signature;
use super::dispatch::{Channel, CorrelationIds, UnitKind};

/// Body of the signed `POST` to the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderJob {
    pub unit_id: Uuid,
    pub kind: UnitKind,
    pub channel: Channel,
    pub recipient: String,
    pub template_key: String,
    /// Template body with all variables substituted.
    pub body: String,
    pub correlation_ids: CorrelationIds,
}

impl Signature for RenderJob {}

/// Optional acknowledgement body returned by the workflow engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderJobAccepted {
    #[serde(default)]
    pub execution_id: Option<String>,
}
