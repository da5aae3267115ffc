//! Attempt state machine
//!
//! `Idle -> Simulating -> AwaitingSignature -> Submitted -> Confirming -> Terminal`,
//! with failure edges into `Terminal` from every waiting stage, cancellation
//! edges back to `Idle` before a transaction exists, and `Terminal -> Idle`
//! on acknowledgment. No edge skips a stage.

use crate::error::FaucetError;
use crate::tx::TransactionHandle;

use serde::Serialize;
use std::fmt;

/// How a finished attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded {
        handle: TransactionHandle,
        block_number: u64,
    },
    Failed {
        error: FaucetError,
        /// Present when the transaction was broadcast, so it can be re-checked
        handle: Option<TransactionHandle>,
    },
}

impl Outcome {
    pub fn handle(&self) -> Option<&TransactionHandle> {
        match self {
            Outcome::Succeeded { handle, .. } => Some(handle),
            Outcome::Failed { handle, .. } => handle.as_ref(),
        }
    }

    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded { .. } => "succeeded",
            Outcome::Failed { error, .. } => error.kind.as_str(),
        }
    }
}

/// State of the single in-flight attempt for one account
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AttemptState {
    #[default]
    Idle,
    Simulating,
    AwaitingSignature,
    Submitted(TransactionHandle),
    Confirming(TransactionHandle),
    Terminal(Outcome),
}

/// Payload-free view of [`AttemptState`] for snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Simulating,
    AwaitingSignature,
    Submitted,
    Confirming,
    Succeeded,
    Failed,
}

impl AttemptState {
    pub fn phase(&self) -> Phase {
        match self {
            AttemptState::Idle => Phase::Idle,
            AttemptState::Simulating => Phase::Simulating,
            AttemptState::AwaitingSignature => Phase::AwaitingSignature,
            AttemptState::Submitted(_) => Phase::Submitted,
            AttemptState::Confirming(_) => Phase::Confirming,
            AttemptState::Terminal(Outcome::Succeeded { .. }) => Phase::Succeeded,
            AttemptState::Terminal(Outcome::Failed { .. }) => Phase::Failed,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, AttemptState::Idle)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptState::Terminal(_))
    }

    /// No transaction exists yet, so the attempt can still be abandoned
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            AttemptState::Simulating | AttemptState::AwaitingSignature
        )
    }

    pub fn can_transition_to(&self, next: &AttemptState) -> bool {
        use AttemptState::*;

        matches!(
            (self, next),
            (Idle, Simulating)
                | (Simulating, AwaitingSignature)
                | (Simulating, Terminal(Outcome::Failed { .. }))
                | (Simulating, Idle)
                | (AwaitingSignature, Submitted(_))
                | (AwaitingSignature, Terminal(Outcome::Failed { .. }))
                | (AwaitingSignature, Idle)
                | (Submitted(_), Confirming(_))
                | (Confirming(_), Terminal(_))
                | (Terminal(_), Idle)
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptState::Idle => "idle",
            AttemptState::Simulating => "simulating",
            AttemptState::AwaitingSignature => "awaiting_signature",
            AttemptState::Submitted(_) => "submitted",
            AttemptState::Confirming(_) => "confirming",
            AttemptState::Terminal(Outcome::Succeeded { .. }) => "terminal(succeeded)",
            AttemptState::Terminal(Outcome::Failed { .. }) => "terminal(failed)",
        };
        f.write_str(name)
    }
}
