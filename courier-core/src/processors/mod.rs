//! Pipeline components.
//!
//! - `IdempotencyLedger`: memoizes responses of mutating requests
//! - `WorkerDispatcher`: renders units and hands them to the workflow
//! - `CallbackIngestor`: applies delivery outcomes reported back
//! - `WorkflowChannel`: HTTP client for the workflow engine
//! - `unit_commands`: create, look up, and skip units

pub mod callback_ingestor;
pub mod idempotency_ledger;
pub mod unit_commands;
pub mod worker_dispatcher;
pub mod workflow_channel;

pub use callback_ingestor::{CallbackIngestor, IngestError};
pub use idempotency_ledger::{IdempotencyLedger, LedgerError, LedgerOutcome};
pub use unit_commands::UnitCommandError;
pub use worker_dispatcher::{BatchOptions, DispatchError, WorkerDispatcher};
pub use workflow_channel::{JobSink, TransportError, WorkflowChannel};
