//! Application state shared across all request handlers.

use courier_core::events::LiveEventBus;
use courier_core::framework::Store;
use courier_core::processors::{
    CallbackIngestor, IdempotencyLedger, WorkerDispatcher, WorkflowChannel,
};
use courier_core::transitions::BackoffPolicy;
use tokio::sync::watch;

use crate::config::runtime::{SharedConfig, Templates};

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Storage backend; PostgreSQL in production.
    pub store: Store,
    /// Runtime configuration (reloadable sections can change on SIGHUP).
    pub config: SharedConfig,
    /// Live event bus feeding the admin SSE stream.
    pub bus: LiveEventBus,
    /// Outbound channel to the workflow engine.
    pub channel: WorkflowChannel,
    /// Flips to `true` once shutdown starts, ending long-lived streams.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        store: impl Into<Store>,
        config: SharedConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let bus = LiveEventBus::new(config.live);
        let channel = WorkflowChannel::new(reqwest::Client::new(), config.workflow.clone());
        Self {
            store: store.into(),
            config,
            bus,
            channel,
            shutdown,
        }
    }

    pub fn processor(&self) -> Store {
        self.store.clone()
    }

    pub fn ledger(&self) -> IdempotencyLedger<Store> {
        IdempotencyLedger::new(self.processor(), self.config.ledger)
    }

    pub fn dispatcher(&self) -> WorkerDispatcher<Store, WorkflowChannel> {
        WorkerDispatcher::new(self.processor(), self.channel.clone(), self.bus.clone())
    }

    pub fn ingestor(&self) -> CallbackIngestor<Store> {
        CallbackIngestor::new(self.processor(), self.bus.clone())
    }

    /// Retry policy from the current `[dispatch]` section.
    pub async fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.config.dispatch.read().await.max_retries)
    }

    /// Snapshot of the template table, so no lock is held across a batch.
    pub async fn templates(&self) -> Templates {
        self.config.templates.read().await.clone()
    }
}
