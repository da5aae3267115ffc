//! Faucet Drip - single-flight orchestration of a faucet claim transaction
//!
//! Dry-runs the faucet call, hands it to a wallet for signing and broadcast,
//! tracks it to confirmation, and reports every step as a human-readable
//! status snapshot with failures resolved to a closed error taxonomy.

pub mod abi;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod tx;
pub mod wallet;

pub use error::{DripError, DripResult, FaucetError, FaucetErrorKind};
pub use orchestrator::{Outcome, TransactionOrchestrator, TriggerError};
