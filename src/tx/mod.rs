//! Transaction lifecycle stages: dry run, signature and broadcast, confirmation,
//! and translation of their failures into user-facing outcomes

mod simulator;
mod submitter;
mod tracker;
mod translate;

pub use simulator::RequestSimulator;
pub use submitter::{SubmissionError, TransactionSubmitter};
pub use tracker::ConfirmationTracker;
pub use translate::{ErrorTranslator, Failure, Stage};

use crate::abi::FunctionSelector;

use chrono::{DateTime, Utc};
use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;
use std::fmt;

/// An intended contract call. Built once per attempt and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct CallDescription {
    pub contract: Address,
    pub function: FunctionSelector,
    pub args: Vec<Token>,
    pub caller: Address,
}

impl CallDescription {
    pub fn new(
        contract: Address,
        function: FunctionSelector,
        args: Vec<Token>,
        caller: Address,
    ) -> Self {
        Self {
            contract,
            function,
            args,
            caller,
        }
    }

    /// ABI-encoded call data: selector followed by the encoded arguments
    pub fn calldata(&self) -> Bytes {
        let mut data = self.function.selector.to_vec();
        data.extend(abi::encode(&self.args));
        Bytes::from(data)
    }
}

/// Outcome of a dry run against the current chain head
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationResult {
    Ok { estimated_gas: U256 },
    Reverted { raw_payload: Bytes },
    RpcFailure { cause: String },
}

impl SimulationResult {
    /// The gas estimate, or the failure a non-`Ok` result stands for
    pub fn into_result(self) -> Result<U256, Failure> {
        match self {
            SimulationResult::Ok { estimated_gas } => Ok(estimated_gas),
            SimulationResult::Reverted { raw_payload } => Err(Failure::Reverted { raw_payload }),
            SimulationResult::RpcFailure { cause } if cause == "timeout" => Err(Failure::Timeout),
            SimulationResult::RpcFailure { cause } => Err(Failure::Rpc { cause }),
        }
    }
}

/// A broadcast transaction and the call it came from
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionHandle {
    pub hash: H256,
    pub call: CallDescription,
    pub submitted_at: DateTime<Utc>,
    /// Strictly increasing per submitter
    pub sequence: u64,
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.hash)
    }
}

/// Confirmation state of a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending { confirmations: u64 },
    Confirmed { block_number: u64 },
    TimedOut,
    Failed { reason: String },
}

impl ConfirmationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationStatus::Pending { .. })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::abi::ContractAbi;
    use crate::error::FaucetErrorKind;

    pub fn caller() -> Address {
        Address::repeat_byte(0xaa)
    }

    pub fn abi() -> ContractAbi {
        ContractAbi::new(Address::repeat_byte(0x11), "getFaucetAssets()")
            .with_error("CooldownActive(uint256)", FaucetErrorKind::CooldownActive)
            .with_error("AllocationExhausted()", FaucetErrorKind::AllocationExhausted)
            .with_reason("already claimed", FaucetErrorKind::AlreadyClaimed)
    }

    pub fn call() -> CallDescription {
        abi().faucet_call(caller())
    }

    pub fn handle(hash_byte: u8) -> TransactionHandle {
        TransactionHandle {
            hash: H256::repeat_byte(hash_byte),
            call: call(),
            submitted_at: Utc::now(),
            sequence: 1,
        }
    }
}
