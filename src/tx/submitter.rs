//! Hands a dry-run-approved call to the wallet for signing and broadcast

use super::{CallDescription, TransactionHandle};
use crate::wallet::{SignatureRequest, Wallet, WalletError};

use chrono::Utc;
use ethers::types::U256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("user rejected the signature request")]
    UserRejected,

    #[error("wallet disconnected: {0}")]
    Disconnected(String),

    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    #[error("no answer from the wallet within the signature deadline")]
    Timeout,
}

impl From<WalletError> for SubmissionError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::UserRejected => SubmissionError::UserRejected,
            WalletError::Disconnected(reason) => SubmissionError::Disconnected(reason),
            WalletError::Broadcast(reason) => SubmissionError::Broadcast(reason),
        }
    }
}

/// Requests a signature and broadcast from the wallet.
///
/// Trusts its caller to only pass calls whose dry run succeeded, and to
/// call it at most once per attempt.
pub struct TransactionSubmitter {
    wallet: Arc<dyn Wallet>,
    sequence: AtomicU64,
}

impl TransactionSubmitter {
    pub fn new(wallet: Arc<dyn Wallet>) -> Self {
        Self {
            wallet,
            sequence: AtomicU64::new(0),
        }
    }

    /// Submit `call` with the gas its dry run estimated. Returns once the
    /// transaction is in the pending pool.
    pub async fn submit(
        &self,
        call: &CallDescription,
        estimated_gas: U256,
        deadline: Duration,
    ) -> Result<TransactionHandle, SubmissionError> {
        let status = self.wallet.connect_status().await;
        if !status.connected {
            return Err(SubmissionError::Disconnected(
                "wallet is not connected".to_string(),
            ));
        }
        if status.address != call.caller {
            warn!(
                "Wallet account {:?} does not match caller {:?}",
                status.address, call.caller
            );
            return Err(SubmissionError::Disconnected(
                "active wallet account changed".to_string(),
            ));
        }

        let request = SignatureRequest {
            call: call.clone(),
            gas_limit: estimated_gas,
        };

        let hash = match timeout(
            deadline,
            self.wallet.request_signature_and_broadcast(&request),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("No wallet answer within {:?}", deadline);
                return Err(SubmissionError::Timeout);
            }
        };

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Transaction {:?} accepted into the pending pool (submission #{})",
            hash, sequence
        );

        Ok(TransactionHandle {
            hash,
            call: call.clone(),
            submitted_at: Utc::now(),
            sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::fixtures;
    use crate::wallet::{MockWallet, WalletStatus};
    use ethers::types::{Address, H256};

    fn connected_wallet() -> MockWallet {
        let mut wallet = MockWallet::new();
        wallet.expect_connect_status().returning(|| WalletStatus {
            address: fixtures::caller(),
            connected: true,
        });
        wallet
    }

    #[tokio::test]
    async fn test_handles_carry_hash_and_increasing_sequence() {
        let mut wallet = connected_wallet();
        wallet
            .expect_request_signature_and_broadcast()
            .times(2)
            .returning(|request| {
                assert_eq!(request.gas_limit, U256::from(50_000));
                Ok(H256::repeat_byte(0x42))
            });

        let submitter = TransactionSubmitter::new(Arc::new(wallet));
        let call = fixtures::call();

        let first = submitter
            .submit(&call, U256::from(50_000), Duration::from_secs(5))
            .await
            .unwrap();
        let second = submitter
            .submit(&call, U256::from(50_000), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(first.hash, H256::repeat_byte(0x42));
        assert_eq!(first.call, call);
        assert!(second.sequence > first.sequence);
    }

    #[tokio::test]
    async fn test_rejection_is_propagated() {
        let mut wallet = connected_wallet();
        wallet
            .expect_request_signature_and_broadcast()
            .returning(|_| Err(WalletError::UserRejected));

        let submitter = TransactionSubmitter::new(Arc::new(wallet));
        let result = submitter
            .submit(&fixtures::call(), U256::from(1), Duration::from_secs(5))
            .await;

        assert_eq!(result, Err(SubmissionError::UserRejected));
    }

    #[tokio::test]
    async fn test_disconnected_wallet_is_never_asked_to_sign() {
        let mut wallet = MockWallet::new();
        wallet.expect_connect_status().returning(|| WalletStatus {
            address: fixtures::caller(),
            connected: false,
        });
        wallet.expect_request_signature_and_broadcast().never();

        let submitter = TransactionSubmitter::new(Arc::new(wallet));
        let result = submitter
            .submit(&fixtures::call(), U256::from(1), Duration::from_secs(5))
            .await;

        assert!(matches!(result, Err(SubmissionError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_switched_account_counts_as_disconnected() {
        let mut wallet = MockWallet::new();
        wallet.expect_connect_status().returning(|| WalletStatus {
            address: Address::repeat_byte(0xbb),
            connected: true,
        });
        wallet.expect_request_signature_and_broadcast().never();

        let submitter = TransactionSubmitter::new(Arc::new(wallet));
        let result = submitter
            .submit(&fixtures::call(), U256::from(1), Duration::from_secs(5))
            .await;

        assert!(matches!(result, Err(SubmissionError::Disconnected(_))));
    }
}
