//! Runtime configuration types.
//!
//! These are the validated sections the server builds from its TOML file.
//! Reloadable sections sit behind their own `RwLock` so a SIGHUP reload of
//! one section never blocks readers of another.

mod admin;
mod client;
mod tuning;
mod workflow;

pub use admin::AdminConfig;
pub use client::ClientConfig;
pub use tuning::{DispatchConfig, LedgerConfig, LiveConfig};
pub use workflow::{DEFAULT_WORKFLOW_TIMEOUT, WorkflowConfig};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Server configuration (listen address).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

/// Message template bodies keyed by template key.
pub type Templates = HashMap<String, String>;

/// Shared configuration state with separate locks for each section.
#[derive(Clone)]
pub struct SharedConfig {
    pub server: Arc<RwLock<ServerConfig>>,
    pub admin: Arc<RwLock<AdminConfig>>,
    /// Service API clients indexed by name.
    pub clients: Arc<RwLock<HashMap<String, ClientConfig>>>,
    pub workflow: Arc<RwLock<WorkflowConfig>>,
    pub dispatch: Arc<RwLock<DispatchConfig>>,
    pub templates: Arc<RwLock<Templates>>,
    /// Fixed at startup.
    pub ledger: LedgerConfig,
    /// Fixed at startup.
    pub live: LiveConfig,
}
