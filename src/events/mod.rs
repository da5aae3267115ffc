//! Status notifications published by the orchestrator
//!
//! Every snapshot is built from a state transition and carries display text
//! only. Raw revert payloads never reach a subscriber.

mod recent;

pub use recent::{RecentStatus, RecentTransaction, RecentTransactions};

use crate::error::FaucetErrorKind;
use crate::orchestrator::{AttemptState, Outcome, Phase};

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::Serialize;
use uuid::Uuid;

/// One human-readable snapshot of an attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub attempt_id: Uuid,
    pub phase: Phase,
    pub message: String,
    pub tx_hash: Option<H256>,
    pub confirmations: Option<u64>,
    pub error: Option<FaucetErrorKind>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    /// Snapshot for entering `state`
    pub fn for_state(attempt_id: Uuid, state: &AttemptState) -> Self {
        let (message, tx_hash, error) = match state {
            AttemptState::Idle => ("Ready".to_string(), None, None),
            AttemptState::Simulating => ("Checking eligibility...".to_string(), None, None),
            AttemptState::AwaitingSignature => {
                ("Waiting for wallet signature...".to_string(), None, None)
            }
            AttemptState::Submitted(handle) => (
                format!("Transaction hash: {:?}", handle.hash),
                Some(handle.hash),
                None,
            ),
            AttemptState::Confirming(handle) => (
                "Waiting for confirmation...".to_string(),
                Some(handle.hash),
                None,
            ),
            AttemptState::Terminal(Outcome::Succeeded { handle, block_number }) => (
                format!("Faucet drip confirmed in block {}", block_number),
                Some(handle.hash),
                None,
            ),
            AttemptState::Terminal(Outcome::Failed { error, handle }) => (
                error.display_message(),
                handle.as_ref().map(|h| h.hash),
                Some(error.kind),
            ),
        };

        Self {
            attempt_id,
            phase: state.phase(),
            message,
            tx_hash,
            confirmations: None,
            error,
            at: Utc::now(),
        }
    }

    /// Snapshot for a confirmation depth change while confirming
    pub fn progress(attempt_id: Uuid, tx_hash: H256, confirmations: u64, required: u64) -> Self {
        Self {
            attempt_id,
            phase: Phase::Confirming,
            message: format!("Confirmations: {}/{}", confirmations, required),
            tx_hash: Some(tx_hash),
            confirmations: Some(confirmations),
            error: None,
            at: Utc::now(),
        }
    }

    /// Snapshot for an attempt abandoned before a transaction existed
    pub fn cancelled(attempt_id: Uuid) -> Self {
        Self {
            attempt_id,
            phase: Phase::Idle,
            message: "Cancelled".to_string(),
            tx_hash: None,
            confirmations: None,
            error: None,
            at: Utc::now(),
        }
    }
}
