use std::time::Duration;

use url::Url;

/// Default bound on a single hand-off to the workflow engine.
pub const DEFAULT_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection to the external message-sending workflow.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Endpoint that accepts render jobs.
    pub url: Url,
    /// Key for signing outbound render jobs.
    pub secret: Box<[u8]>,
    /// Shared secret the workflow presents on callbacks.
    pub callback_secret: String,
    pub timeout: Duration,
}

impl WorkflowConfig {
    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }
}
