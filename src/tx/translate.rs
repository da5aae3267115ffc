//! Translation of low-level stage failures into [`FaucetError`]s
//!
//! Total over its input: anything unrecognized becomes
//! [`FaucetErrorKind::Unknown`]. Raw revert bytes never end up in the result.

use super::{ConfirmationStatus, SimulationResult, SubmissionError};
use crate::abi::{ContractAbi, DecodedRevert};
use crate::error::{FaucetError, FaucetErrorKind};

use ethers::types::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle stage a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Simulation,
    Signature,
    Confirmation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Simulation => "simulation",
            Stage::Signature => "signature",
            Stage::Confirmation => "confirmation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure shape a stage can produce
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The dry run reverted
    Reverted { raw_payload: Bytes },
    /// The node could not answer
    Rpc { cause: String },
    /// The wallet did not broadcast
    Wallet(SubmissionError),
    /// Mined, but execution failed
    ExecutionFailed { reason: String },
    /// The stage deadline elapsed
    Timeout,
}

impl Failure {
    /// The failure a simulation result stands for, if any
    pub fn from_simulation(result: SimulationResult) -> Option<Self> {
        result.into_result().err()
    }

    /// The failure a terminal confirmation status stands for, if any
    pub fn from_confirmation(status: ConfirmationStatus) -> Option<Self> {
        match status {
            ConfirmationStatus::Pending { .. } | ConfirmationStatus::Confirmed { .. } => None,
            ConfirmationStatus::TimedOut => Some(Failure::Timeout),
            ConfirmationStatus::Failed { reason } => Some(Failure::ExecutionFailed { reason }),
        }
    }
}

impl From<SubmissionError> for Failure {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Timeout => Failure::Timeout,
            other => Failure::Wallet(other),
        }
    }
}

/// Maps stage failures to the closed [`FaucetErrorKind`] set
#[derive(Clone)]
pub struct ErrorTranslator {
    abi: Arc<ContractAbi>,
}

impl ErrorTranslator {
    pub fn new(abi: Arc<ContractAbi>) -> Self {
        Self { abi }
    }

    pub fn translate(&self, stage: Stage, failure: &Failure) -> FaucetError {
        let translated = match failure {
            Failure::Reverted { raw_payload } => self.translate_revert(raw_payload),
            Failure::Rpc { cause } => {
                debug!("RPC failure during {}: {}", stage, cause);
                FaucetError::new(FaucetErrorKind::NetworkUnavailable)
            }
            Failure::Wallet(err) => translate_wallet(err),
            Failure::ExecutionFailed { reason } => {
                FaucetError::with_detail(FaucetErrorKind::Unknown, reason.clone())
            }
            Failure::Timeout => match stage {
                Stage::Simulation => FaucetError::new(FaucetErrorKind::NetworkUnavailable),
                Stage::Signature => {
                    FaucetError::with_detail(FaucetErrorKind::Unknown, "wallet did not respond")
                }
                Stage::Confirmation => {
                    FaucetError::new(FaucetErrorKind::TimedOutAwaitingConfirmation)
                }
            },
        };

        debug!("Translated {} failure to {}", stage, translated.kind);
        translated
    }

    fn translate_revert(&self, raw_payload: &Bytes) -> FaucetError {
        match self.abi.decode_revert(raw_payload) {
            DecodedRevert::Custom { signature, kind } => {
                debug!("Revert decoded as {}", signature);
                FaucetError::new(kind)
            }
            DecodedRevert::Reason(reason) => match self.abi.classify_reason(&reason) {
                Some(kind) => FaucetError::new(kind),
                None if reason.trim().is_empty() => FaucetError::new(FaucetErrorKind::Unknown),
                None => FaucetError::with_detail(FaucetErrorKind::Unknown, reason),
            },
            DecodedRevert::Panic(code) => FaucetError::with_detail(
                FaucetErrorKind::Unknown,
                format!("contract panicked with code {:#x}", code),
            ),
            DecodedRevert::Empty | DecodedRevert::Undecodable { .. } => {
                FaucetError::new(FaucetErrorKind::Unknown)
            }
        }
    }
}

fn translate_wallet(err: &SubmissionError) -> FaucetError {
    match err {
        SubmissionError::UserRejected => FaucetError::new(FaucetErrorKind::UserRejectedSignature),
        SubmissionError::Disconnected(_) => FaucetError::new(FaucetErrorKind::WalletDisconnected),
        SubmissionError::Broadcast(message) => {
            FaucetError::with_detail(FaucetErrorKind::Unknown, describe_node_rejection(message))
        }
        SubmissionError::Timeout => {
            FaucetError::with_detail(FaucetErrorKind::Unknown, "wallet did not respond")
        }
    }
}

/// Common node rejection messages, reworded for display
fn describe_node_rejection(message: &str) -> &'static str {
    let message = message.to_lowercase();
    if message.contains("insufficient funds") {
        "Insufficient funds for gas. Please fund the account."
    } else if message.contains("replacement transaction underpriced") {
        "Transaction underpriced. A pending transaction may be blocking."
    } else if message.contains("nonce too low") {
        "Nonce too low. A transaction may have been confirmed already."
    } else {
        "The network rejected the transaction."
    }
}
