//! Confirmation tracking for broadcast transactions
//!
//! A transaction counts as confirmed once its receipt is in a block that has
//! reached the configured depth, where the inclusion block itself counts as
//! the first confirmation. Re-org handling is left to the RPC collaborator.

use super::{ConfirmationStatus, TransactionHandle};
use crate::chain::ChainRpc;

use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Watches a transaction until it is confirmed, fails, or a deadline passes
pub struct ConfirmationTracker {
    /// Chain RPC
    rpc: Arc<dyn ChainRpc>,
    /// Required confirmation blocks
    confirmation_blocks: u64,
    /// Delay between receipt polls
    poll_interval: Duration,
}

impl ConfirmationTracker {
    pub fn new(rpc: Arc<dyn ChainRpc>, confirmation_blocks: u64, poll_interval: Duration) -> Self {
        Self {
            rpc,
            confirmation_blocks: confirmation_blocks.max(1),
            poll_interval,
        }
    }

    pub fn confirmation_blocks(&self) -> u64 {
        self.confirmation_blocks
    }

    /// Track until a terminal status. `TimedOut` does not mean the
    /// transaction failed; a later call may still see it confirm.
    pub async fn track(&self, handle: &TransactionHandle, deadline: Duration) -> ConfirmationStatus {
        self.track_with_progress(handle, deadline, |_| {}).await
    }

    /// Like [`track`](Self::track), reporting each change in pending depth
    pub async fn track_with_progress<F>(
        &self,
        handle: &TransactionHandle,
        deadline: Duration,
        mut on_progress: F,
    ) -> ConfirmationStatus
    where
        F: FnMut(&ConfirmationStatus) + Send,
    {
        let poll = async {
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_reported = None;

            loop {
                ticker.tick().await;

                let status = self.check(handle.hash).await;
                match status {
                    ConfirmationStatus::Pending { confirmations } => {
                        if last_reported != Some(confirmations) {
                            on_progress(&status);
                            last_reported = Some(confirmations);
                        }
                    }
                    terminal => return terminal,
                }
            }
        };

        match timeout(deadline, poll).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    "Transaction {:?} not confirmed within {:?}; it may still land",
                    handle.hash, deadline
                );
                ConfirmationStatus::TimedOut
            }
        }
    }

    /// Check a transaction once
    pub async fn check(&self, tx_hash: H256) -> ConfirmationStatus {
        let receipt = match self.rpc.get_receipt(tx_hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => return ConfirmationStatus::Pending { confirmations: 0 },
            Err(e) => {
                warn!("Receipt lookup for {:?} failed: {}", tx_hash, e);
                return ConfirmationStatus::Pending { confirmations: 0 };
            }
        };

        if !receipt.success {
            info!("Transaction {:?} was mined but reverted", tx_hash);
            return ConfirmationStatus::Failed {
                reason: "transaction reverted on-chain".to_string(),
            };
        }

        let Some(block_number) = receipt.block_number else {
            return ConfirmationStatus::Pending { confirmations: 0 };
        };

        let head = match self.rpc.block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!("Head lookup failed while tracking {:?}: {}", tx_hash, e);
                return ConfirmationStatus::Pending { confirmations: 1 };
            }
        };

        // A lagging node may report a head below the receipt block
        let confirmations = head.saturating_sub(block_number) + 1;

        if confirmations >= self.confirmation_blocks {
            info!(
                "Transaction {:?} confirmed in block {} ({} confirmations)",
                tx_hash, block_number, confirmations
            );
            ConfirmationStatus::Confirmed { block_number }
        } else {
            debug!(
                "Transaction {:?} has {} / {} confirmations",
                tx_hash, confirmations, self.confirmation_blocks
            );
            ConfirmationStatus::Pending { confirmations }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainRpc, Receipt, RpcCallError};
    use crate::tx::fixtures;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    fn mined(hash: H256, block: u64, success: bool) -> Receipt {
        Receipt {
            transaction_hash: hash,
            block_number: Some(block),
            success,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_at_depth_one() {
        let handle = fixtures::handle(0x01);
        let hash = handle.hash;

        let mut rpc = MockChainRpc::new();
        rpc.expect_get_receipt()
            .returning(move |_| Ok(Some(mined(hash, 100, true))));
        rpc.expect_block_number().returning(|| Ok(100));

        let tracker = ConfirmationTracker::new(Arc::new(rpc), 1, Duration::from_secs(1));
        let status = tracker.track(&handle, Duration::from_secs(30)).await;

        assert_eq!(status, ConfirmationStatus::Confirmed { block_number: 100 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_progress_until_depth_reached() {
        let handle = fixtures::handle(0x02);
        let hash = handle.hash;
        let head = Arc::new(AtomicU64::new(99));

        let mut rpc = MockChainRpc::new();
        rpc.expect_get_receipt()
            .returning(move |_| Ok(Some(mined(hash, 100, true))));
        let h = head.clone();
        rpc.expect_block_number()
            .returning(move || Ok(h.fetch_add(1, Ordering::SeqCst) + 1));

        let tracker = ConfirmationTracker::new(Arc::new(rpc), 3, Duration::from_secs(1));
        let mut progress = Vec::new();
        let status = tracker
            .track_with_progress(&handle, Duration::from_secs(30), |s| progress.push(s.clone()))
            .await;

        assert_eq!(status, ConfirmationStatus::Confirmed { block_number: 100 });
        assert_eq!(
            progress,
            vec![
                ConfirmationStatus::Pending { confirmations: 1 },
                ConfirmationStatus::Pending { confirmations: 2 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mined_revert_is_failed() {
        let handle = fixtures::handle(0x03);
        let hash = handle.hash;

        let mut rpc = MockChainRpc::new();
        rpc.expect_get_receipt()
            .returning(move |_| Ok(Some(mined(hash, 7, false))));
        rpc.expect_block_number().never();

        let tracker = ConfirmationTracker::new(Arc::new(rpc), 1, Duration::from_secs(1));
        let status = tracker.track(&handle, Duration::from_secs(30)).await;

        assert!(matches!(status, ConfirmationStatus::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_later_recheck_confirms() {
        let handle = fixtures::handle(0x04);
        let hash = handle.hash;
        let landed = Arc::new(AtomicBool::new(false));

        let mut rpc = MockChainRpc::new();
        let flag = landed.clone();
        rpc.expect_get_receipt().returning(move |_| {
            if flag.load(Ordering::SeqCst) {
                Ok(Some(mined(hash, 55, true)))
            } else {
                Ok(None)
            }
        });
        rpc.expect_block_number().returning(|| Ok(56));

        let tracker = ConfirmationTracker::new(Arc::new(rpc), 1, Duration::from_secs(1));

        let first = tracker.track(&handle, Duration::from_secs(5)).await;
        assert_eq!(first, ConfirmationStatus::TimedOut);

        landed.store(true, Ordering::SeqCst);
        let second = tracker.track(&handle, Duration::from_secs(5)).await;
        assert_eq!(second, ConfirmationStatus::Confirmed { block_number: 55 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_errors_keep_polling() {
        let handle = fixtures::handle(0x05);
        let hash = handle.hash;
        let calls = Arc::new(AtomicU64::new(0));

        let mut rpc = MockChainRpc::new();
        let c = calls.clone();
        rpc.expect_get_receipt().returning(move |_| {
            if c.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RpcCallError::Transport("502 bad gateway".to_string()))
            } else {
                Ok(Some(mined(hash, 10, true)))
            }
        });
        rpc.expect_block_number().returning(|| Ok(10));

        let tracker = ConfirmationTracker::new(Arc::new(rpc), 1, Duration::from_secs(1));
        let status = tracker.track(&handle, Duration::from_secs(30)).await;

        assert_eq!(status, ConfirmationStatus::Confirmed { block_number: 10 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
