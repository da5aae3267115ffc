//! Error types for the faucet drip orchestrator
//!
//! Two layers live here:
//! - [`DripError`]: internal failures of ABI, chain and wallet plumbing.
//! - [`FaucetErrorKind`] / [`FaucetError`]: the closed, user-facing taxonomy every
//!   failed attempt is resolved to before it reaches a notification sink.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Internal error type for ABI, chain and wallet plumbing
#[derive(Error, Debug)]
pub enum DripError {
    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Invalid address {address}: {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Result type for internal operations
pub type DripResult<T> = Result<T, DripError>;

/// Closed set of outcomes a failed faucet attempt resolves to.
///
/// Every kind is terminal for the attempt that produced it. Retrying always
/// means a new, user-triggered attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaucetErrorKind {
    AlreadyClaimed,
    CooldownActive,
    AllocationExhausted,
    UserRejectedSignature,
    WalletDisconnected,
    NetworkUnavailable,
    TimedOutAwaitingConfirmation,
    Unknown,
}

impl FaucetErrorKind {
    pub const ALL: [FaucetErrorKind; 8] = [
        FaucetErrorKind::AlreadyClaimed,
        FaucetErrorKind::CooldownActive,
        FaucetErrorKind::AllocationExhausted,
        FaucetErrorKind::UserRejectedSignature,
        FaucetErrorKind::WalletDisconnected,
        FaucetErrorKind::NetworkUnavailable,
        FaucetErrorKind::TimedOutAwaitingConfirmation,
        FaucetErrorKind::Unknown,
    ];

    /// Whether a fresh attempt can reasonably succeed without the user
    /// waiting for contract state to change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FaucetErrorKind::UserRejectedSignature
                | FaucetErrorKind::WalletDisconnected
                | FaucetErrorKind::NetworkUnavailable
                | FaucetErrorKind::TimedOutAwaitingConfirmation
                | FaucetErrorKind::Unknown
        )
    }

    /// The transaction may still land; callers must not report definite failure.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, FaucetErrorKind::TimedOutAwaitingConfirmation)
    }

    /// Stable label used for metrics and serialized snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            FaucetErrorKind::AlreadyClaimed => "already_claimed",
            FaucetErrorKind::CooldownActive => "cooldown_active",
            FaucetErrorKind::AllocationExhausted => "allocation_exhausted",
            FaucetErrorKind::UserRejectedSignature => "user_rejected_signature",
            FaucetErrorKind::WalletDisconnected => "wallet_disconnected",
            FaucetErrorKind::NetworkUnavailable => "network_unavailable",
            FaucetErrorKind::TimedOutAwaitingConfirmation => "timed_out_awaiting_confirmation",
            FaucetErrorKind::Unknown => "unknown",
        }
    }

    /// Human-readable message suitable for direct display
    pub fn message(&self) -> &'static str {
        match self {
            FaucetErrorKind::AlreadyClaimed => "You have already claimed from the faucet.",
            FaucetErrorKind::CooldownActive => {
                "The faucet cooldown has not elapsed yet. Please try again later."
            }
            FaucetErrorKind::AllocationExhausted => "The faucet allocation has been exhausted.",
            FaucetErrorKind::UserRejectedSignature => "The transaction was rejected in your wallet.",
            FaucetErrorKind::WalletDisconnected => {
                "Your wallet is disconnected. Reconnect it and try again."
            }
            FaucetErrorKind::NetworkUnavailable => {
                "The network is unavailable right now. Please try again."
            }
            FaucetErrorKind::TimedOutAwaitingConfirmation => {
                "The transaction was sent but not confirmed in time. It may still confirm; check again shortly."
            }
            FaucetErrorKind::Unknown => "Failed to get assets from faucet.",
        }
    }
}

impl fmt::Display for FaucetErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A translated failure: a kind plus optional decoded detail.
///
/// `detail` only ever holds decoded, human-oriented text (a revert reason
/// string, a node rejection summary), never raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetError {
    pub kind: FaucetErrorKind,
    pub detail: Option<String>,
}

impl FaucetError {
    pub fn new(kind: FaucetErrorKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: FaucetErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// The single message shown for this outcome
    pub fn display_message(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{} ({})", self.kind.message(), detail),
            None => self.kind.message().to_string(),
        }
    }
}

impl fmt::Display for FaucetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_message())
    }
}

impl std::error::Error for FaucetError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_confirmation_timeout_is_ambiguous() {
        for kind in FaucetErrorKind::ALL {
            assert_eq!(
                kind.is_ambiguous(),
                kind == FaucetErrorKind::TimedOutAwaitingConfirmation
            );
        }
    }

    #[test]
    fn test_eligibility_kinds_are_not_retryable() {
        assert!(!FaucetErrorKind::AlreadyClaimed.is_retryable());
        assert!(!FaucetErrorKind::CooldownActive.is_retryable());
        assert!(!FaucetErrorKind::AllocationExhausted.is_retryable());
        assert!(FaucetErrorKind::NetworkUnavailable.is_retryable());
    }

    #[test]
    fn test_kind_serializes_as_its_label() {
        for kind in FaucetErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_display_message_includes_detail() {
        let err = FaucetError::with_detail(FaucetErrorKind::Unknown, "Faucet: paused");
        assert_eq!(
            err.display_message(),
            "Failed to get assets from faucet. (Faucet: paused)"
        );
    }
}
