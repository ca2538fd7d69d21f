pub mod admin;
pub mod batch;
pub mod callback;
pub mod dispatch;
pub mod live;
pub mod render_job;

pub use crate::signature::Signature;

pub use batch::{BatchSummary, RunBatchRequest};
pub use callback::{CallbackResponse, CallbackStatus, DispatchCallback};
pub use dispatch::{
    Channel, CorrelationIds, CreateDispatchUnit, DispatchStatus, DispatchUnitResponse,
    SendUnitRequest, SkipUnitRequest, UnitKind, UnitRef,
};
pub use live::LiveEvent;
pub use render_job::{RenderJob, RenderJobAccepted};

use serde::{Deserialize, Serialize};

/// JSON body returned for every non-2xx API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code (`validation`, `conflict`, ...).
    pub error: String,
    /// Human-readable message.
    pub message: String,
}
