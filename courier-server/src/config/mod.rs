//! Configuration module for courier-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables. Also handles admin secret hashing.

pub mod file;
pub mod runtime;

use crate::config::file::FileConfig;
use crate::config::runtime::{
    AdminConfig, ClientConfig, DispatchConfig, LedgerConfig, LiveConfig, ServerConfig,
    SharedConfig, Templates, WorkflowConfig,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("password hashing error: {0}")]
    HashError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub clients: HashMap<String, ClientConfig>,
    pub workflow: WorkflowConfig,
    pub dispatch: DispatchConfig,
    pub templates: Templates,
    pub ledger: LedgerConfig,
    pub live: LiveConfig,
}

impl LoadedConfig {
    /// Convert into a SharedConfig with Arc<RwLock<T>> wrappers.
    pub fn into_shared(self) -> SharedConfig {
        SharedConfig {
            server: Arc::new(RwLock::new(self.server)),
            admin: Arc::new(RwLock::new(self.admin)),
            clients: Arc::new(RwLock::new(self.clients)),
            workflow: Arc::new(RwLock::new(self.workflow)),
            dispatch: Arc::new(RwLock::new(self.dispatch)),
            templates: Arc::new(RwLock::new(self.templates)),
            ledger: self.ledger,
            live: self.live,
        }
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Validate the configuration
    /// 3. Hash the admin secret if it's plaintext (and rewrite the file)
    /// 4. Apply CLI overrides
    /// 5. Build the loaded configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        validate(&file_config)?;

        let secret_hash = if file_config.is_admin_secret_hashed() {
            file_config.admin.secret.clone()
        } else {
            let hash = hash_secret(&file_config.admin.secret)?;
            file_config.admin.secret = hash.clone();
            // Written before the listen override so the flag never lands in the file.
            self.rewrite_config(&file_config)?;
            tracing::info!("Admin secret hashed and config file updated");
            hash
        };

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        Ok(build_loaded_config(file_config, secret_hash))
    }

    /// Reload the configuration (used during SIGHUP).
    ///
    /// Returns a LoadedConfig that can be used to update individual parts
    /// of a SharedConfig.
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // Write atomically: write to temp file, then rename
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let invalid = |msg: String| -> Result<(), ConfigError> {
        Err(ConfigError::ValidationError(msg))
    };

    if config.admin.secret.is_empty() {
        return invalid("admin secret must not be empty".to_string());
    }

    let mut names = std::collections::HashSet::new();
    for client in &config.clients {
        if client.name.is_empty() || client.secret.is_empty() {
            return invalid("clients need a non-empty name and secret".to_string());
        }
        if !names.insert(client.name.as_str()) {
            return invalid(format!("client {} is configured twice", client.name));
        }
    }

    if config.workflow.secret.is_empty() || config.workflow.callback_secret.is_empty() {
        return invalid("workflow secret and callback_secret must not be empty".to_string());
    }
    if config.workflow.timeout_secs == 0 {
        return invalid("workflow timeout_secs must be positive".to_string());
    }

    if config.dispatch.max_retries < 0 {
        return invalid("dispatch max_retries must not be negative".to_string());
    }
    if config.dispatch.default_batch_limit == 0 {
        return invalid("dispatch default_batch_limit must be positive".to_string());
    }

    let idempotency = &config.idempotency;
    if !(0.0..=1.0).contains(&idempotency.reap_probability) {
        return invalid(format!(
            "idempotency reap_probability must be within 0..=1, got {}",
            idempotency.reap_probability
        ));
    }
    if idempotency.retention_hours == 0 {
        return invalid("idempotency retention_hours must be positive".to_string());
    }

    if config.live.buffer == 0 {
        return invalid("live buffer must be positive".to_string());
    }

    for (key, template) in &config.templates {
        if template.body.is_empty() {
            return invalid(format!("template {key} has an empty body"));
        }
    }
    Ok(())
}

fn hash_secret(plaintext: &str) -> Result<String, ConfigError> {
    use argon2::{
        Argon2, PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    };

    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConfigError::HashError(e.to_string()))
}

fn build_loaded_config(file_config: FileConfig, secret_hash: String) -> LoadedConfig {
    let clients = file_config
        .clients
        .into_iter()
        .map(|c| {
            let client = ClientConfig::new(c.name.clone(), c.secret.into_bytes());
            (c.name, client)
        })
        .collect();

    let workflow = file_config.workflow;
    let idempotency = file_config.idempotency;
    let live = file_config.live;

    LoadedConfig {
        server: ServerConfig {
            listen: file_config.server.listen,
        },
        admin: AdminConfig::new(secret_hash),
        clients,
        workflow: WorkflowConfig {
            url: workflow.url,
            secret: workflow.secret.into_bytes().into_boxed_slice(),
            callback_secret: workflow.callback_secret,
            timeout: Duration::from_secs(workflow.timeout_secs),
        },
        dispatch: DispatchConfig {
            max_retries: file_config.dispatch.max_retries,
            default_batch_limit: file_config.dispatch.default_batch_limit,
        },
        templates: file_config
            .templates
            .into_iter()
            .map(|(key, template)| (key, template.body))
            .collect(),
        ledger: LedgerConfig {
            retention: Duration::from_secs(idempotency.retention_hours * 60 * 60),
            reap_probability: idempotency.reap_probability,
            wait_timeout: Duration::from_millis(idempotency.wait_timeout_ms),
            stale_claim: Duration::from_secs(idempotency.stale_claim_secs),
            ..LedgerConfig::default()
        },
        live: LiveConfig {
            throttle: Duration::from_millis(live.throttle_ms),
            keepalive: Duration::from_secs(live.keepalive_secs),
            buffer: live.buffer,
        },
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[server]
listen = "127.0.0.1:3000"

[admin]
secret = "let-me-in"

[[clients]]
name = "crm"
secret = "crm-secret"

[workflow]
url = "http://localhost:5678/render"
secret = "workflow-secret"
callback_secret = "callback-secret"

[templates.remind_schedule]
body = "See you at {{ time }}"
"#;

    fn temp_config(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("courier-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_hashes_admin_secret_and_rewrites_file() {
        let path = temp_config(CONFIG);
        let loader = ConfigLoader::new(&path, Some("0.0.0.0:9999".parse().unwrap()));

        let loaded = loader.load().unwrap();
        assert!(loaded.admin.verify_secret("let-me-in"));
        assert!(!loaded.admin.verify_secret("wrong"));
        assert_eq!(loaded.server.listen.port(), 9999);
        assert_eq!(loaded.clients["crm"].secret_bytes(), b"crm-secret");
        assert_eq!(loaded.templates["remind_schedule"], "See you at {{ time }}");
        assert_eq!(loaded.workflow.timeout, Duration::from_secs(10));

        let rewritten: FileConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(rewritten.is_admin_secret_hashed());
        assert_eq!(rewritten.server.listen.port(), 3000);

        // A second load keeps the stored hash.
        let reloaded = loader.reload().unwrap();
        assert_eq!(reloaded.admin.secret_hash, rewritten.admin.secret);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_reap_probability() {
        let path = temp_config(&format!("{CONFIG}\n[idempotency]\nreap_probability = 1.5\n"));
        let err = ConfigLoader::new(&path, None).load().err().unwrap();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_validation_rejects_duplicate_client() {
        let path = temp_config(&CONFIG.replace(
            "[workflow]",
            "[[clients]]\nname = \"crm\"\nsecret = \"again\"\n\n[workflow]",
        ));
        let err = ConfigLoader::new(&path, None).load().err().unwrap();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("crm")));
        std::fs::remove_file(&path).unwrap();
    }
}
