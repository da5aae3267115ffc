//! Wallet module - the signing side of the network
//!
//! The orchestrator treats the wallet as an opaque capability: it asks for a
//! signature and broadcast and gets back a transaction hash or a rejection.
//! Key material never leaves the implementor.

mod gas;
mod local;

pub use gas::GasEstimator;
pub use local::LocalSigner;

use crate::tx::CallDescription;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use thiserror::Error;

/// Connection state reported by the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletStatus {
    pub address: Address,
    pub connected: bool,
}

/// What the wallet is asked to sign and broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureRequest {
    pub call: CallDescription,
    /// Gas limit derived from the dry run
    pub gas_limit: U256,
}

/// Reasons a signature request did not produce a broadcast transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("user rejected the signature request")]
    UserRejected,

    #[error("wallet disconnected: {0}")]
    Disconnected(String),

    /// Signed, but the node refused the raw transaction
    #[error("broadcast rejected: {0}")]
    Broadcast(String),
}

/// Wallet collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Active account and whether the wallet can currently sign
    async fn connect_status(&self) -> WalletStatus;

    /// Ask for approval, sign and broadcast. May suspend until the user decides.
    async fn request_signature_and_broadcast(
        &self,
        request: &SignatureRequest,
    ) -> Result<H256, WalletError>;
}
