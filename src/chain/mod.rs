//! Chain module - the read side of the network
//!
//! This module provides:
//! - The [`ChainRpc`] capability the lifecycle stages depend on
//! - A multi-RPC provider with automatic failover implementing it

pub mod provider;

pub use provider::{ChainProvider, GasPrice};

use crate::tx::CallDescription;

use async_trait::async_trait;
use ethers::types::{Bytes, H256, U256};
use thiserror::Error;

/// Failure of a single RPC request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcCallError {
    /// The node executed the call and it reverted; carries the raw revert data
    #[error("execution reverted")]
    Reverted(Bytes),

    /// The node could not be reached or answered with a non-revert error
    #[error("transport error: {0}")]
    Transport(String),
}

/// The subset of a transaction receipt the confirmation stage needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub block_number: Option<u64>,
    pub success: bool,
}

/// Chain-RPC collaborator.
///
/// Connection pooling and node failover are the implementor's concern; the
/// orchestrator only ever sees [`RpcCallError`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Execute `call` read-only against the current head
    async fn call(&self, call: &CallDescription) -> Result<Bytes, RpcCallError>;

    /// Estimate gas for `call` against the current head
    async fn estimate_gas(&self, call: &CallDescription) -> Result<U256, RpcCallError>;

    /// Fetch the receipt for a transaction, if it has been mined
    async fn get_receipt(&self, hash: H256) -> Result<Option<Receipt>, RpcCallError>;

    /// Current head block number
    async fn block_number(&self) -> Result<u64, RpcCallError>;
}
