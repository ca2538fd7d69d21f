//! Runtime configuration types.
//!
//! The validated sections live in `courier_core::config` so the pipeline
//! components can read them directly; this module re-exports them for the
//! server.

pub use courier_core::config::{
    AdminConfig, ClientConfig, DispatchConfig, LedgerConfig, LiveConfig, ServerConfig,
    SharedConfig, Templates, WorkflowConfig,
};
