//! Faucet drip orchestration
//!
//! Owns the attempt state machine and sequences the transaction stages
//! through it.

mod engine;
mod registry;
mod state;

pub use engine::{CancelRequest, OrchestratorConfig, TransactionOrchestrator, TriggerError};
pub use registry::OrchestratorRegistry;
pub use state::{AttemptState, Outcome, Phase};
