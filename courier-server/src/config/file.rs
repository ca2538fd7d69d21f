//! TOML file configuration structures.
//!
//! These structs directly map to the `courier-config.toml` file format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateConfig>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Admin configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// The admin secret. If this is plaintext (doesn't start with `$argon2`),
    /// it will be hashed and the config file will be rewritten.
    pub secret: String,
}

/// A Service API caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Sent by the caller in the `Courier-Client` header.
    pub name: String,
    /// Secret key for signing API requests.
    pub secret: String,
}

/// The external workflow that renders and sends messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub url: Url,
    /// Key for signing outbound render jobs.
    pub secret: String,
    /// Value the workflow sends in `Courier-Callback-Secret`.
    pub callback_secret: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_batch_limit")]
    pub default_batch_limit: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            default_batch_limit: default_batch_limit(),
        }
    }
}

fn default_max_retries() -> i32 {
    10
}

fn default_batch_limit() -> u32 {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_reap_probability")]
    pub reap_probability: f64,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            reap_probability: default_reap_probability(),
            wait_timeout_ms: default_wait_timeout_ms(),
            stale_claim_secs: default_stale_claim_secs(),
        }
    }
}

fn default_retention_hours() -> u64 {
    24
}

fn default_reap_probability() -> f64 {
    0.01
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

fn default_stale_claim_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Events buffered per subscriber.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            keepalive_secs: default_keepalive_secs(),
            buffer: default_buffer(),
        }
    }
}

fn default_throttle_ms() -> u64 {
    1000
}

fn default_keepalive_secs() -> u64 {
    15
}

fn default_buffer() -> usize {
    256
}

/// `[templates.<key>]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub body: String,
}

impl FileConfig {
    /// Check if the admin secret is already hashed (argon2 format).
    pub fn is_admin_secret_hashed(&self) -> bool {
        self.admin.secret.starts_with("$argon2")
    }
}
