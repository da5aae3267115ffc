//! One orchestrator per caller account

use super::engine::{OrchestratorConfig, TransactionOrchestrator};
use crate::abi::ContractAbi;
use crate::chain::ChainRpc;
use crate::wallet::Wallet;

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use tracing::info;

/// Hands out a single shared [`TransactionOrchestrator`] per account, so
/// two sessions for the same account cannot run attempts side by side.
pub struct OrchestratorRegistry {
    orchestrators: DashMap<Address, Arc<TransactionOrchestrator>>,
    rpc: Arc<dyn ChainRpc>,
    abi: Arc<ContractAbi>,
    config: OrchestratorConfig,
}

impl OrchestratorRegistry {
    pub fn new(rpc: Arc<dyn ChainRpc>, abi: Arc<ContractAbi>, config: OrchestratorConfig) -> Self {
        Self {
            orchestrators: DashMap::new(),
            rpc,
            abi,
            config,
        }
    }

    /// The orchestrator for `account`, created with `wallet` on first use.
    /// Later calls return the existing instance and ignore `wallet`.
    pub fn get_or_create(
        &self,
        account: Address,
        wallet: Arc<dyn Wallet>,
    ) -> Arc<TransactionOrchestrator> {
        self.orchestrators
            .entry(account)
            .or_insert_with(|| {
                info!("Creating orchestrator for {:?}", account);
                Arc::new(TransactionOrchestrator::new(
                    account,
                    self.rpc.clone(),
                    wallet,
                    self.abi.clone(),
                    self.config.clone(),
                ))
            })
            .value()
            .clone()
    }

    pub fn get(&self, account: &Address) -> Option<Arc<TransactionOrchestrator>> {
        self.orchestrators.get(account).map(|entry| entry.value().clone())
    }

    /// Drop the orchestrator for `account` if it is idle and nobody else
    /// holds it. The check and the removal happen under the map's lock.
    pub fn remove_idle(&self, account: &Address) -> bool {
        let removed = self
            .orchestrators
            .remove_if(account, |_, orchestrator| {
                Arc::strong_count(orchestrator) == 1 && orchestrator.is_idle()
            })
            .is_some();
        if removed {
            info!("Removed idle orchestrator for {:?}", account);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.orchestrators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orchestrators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainRpc, RpcCallError};
    use crate::config::DeadlineConfig;
    use crate::tx::fixtures;
    use crate::wallet::MockWallet;
    use ethers::types::Bytes;
    use std::time::Duration;

    fn registry() -> OrchestratorRegistry {
        registry_with(MockChainRpc::new())
    }

    fn registry_with(rpc: MockChainRpc) -> OrchestratorRegistry {
        OrchestratorRegistry::new(
            Arc::new(rpc),
            Arc::new(fixtures::abi()),
            OrchestratorConfig {
                deadlines: DeadlineConfig {
                    simulation_secs: 5,
                    signature_secs: 5,
                    confirmation_secs: 5,
                },
                confirmation_blocks: 1,
                poll_interval: Duration::from_secs(1),
                description: "drip".to_string(),
                max_recent_transactions: 5,
            },
        )
    }

    #[tokio::test]
    async fn test_same_account_shares_one_orchestrator() {
        let registry = registry();
        let account = fixtures::caller();

        let first = registry.get_or_create(account, Arc::new(MockWallet::new()));
        let second = registry.get_or_create(account, Arc::new(MockWallet::new()));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_accounts_are_independent() {
        let registry = registry();
        let a = registry.get_or_create(Address::repeat_byte(1), Arc::new(MockWallet::new()));
        let b = registry.get_or_create(Address::repeat_byte(2), Arc::new(MockWallet::new()));

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.account(), Address::repeat_byte(2));
        drop(a);
        assert!(registry.remove_idle(&Address::repeat_byte(1)));
        assert!(registry.get(&Address::repeat_byte(1)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_held_orchestrator_is_not_removed() {
        let registry = registry();
        let account = fixtures::caller();
        let held = registry.get_or_create(account, Arc::new(MockWallet::new()));

        assert!(!registry.remove_idle(&account));
        let again = registry.get_or_create(account, Arc::new(MockWallet::new()));
        assert!(Arc::ptr_eq(&held, &again));

        drop(held);
        drop(again);
        assert!(registry.remove_idle(&account));
        assert!(registry.is_empty());
        assert!(!registry.remove_idle(&account));
    }

    #[tokio::test]
    async fn test_unacknowledged_orchestrator_is_not_removed() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_call()
            .times(1)
            .returning(|_| Err(RpcCallError::Reverted(Bytes::new())));
        let registry = registry_with(rpc);
        let account = fixtures::caller();

        let orchestrator = registry.get_or_create(account, Arc::new(MockWallet::new()));
        orchestrator.trigger(fixtures::call()).await.unwrap();
        assert!(orchestrator.state().await.is_terminal());

        let orchestrator = Arc::downgrade(&orchestrator);
        assert!(!registry.remove_idle(&account));

        let held = orchestrator.upgrade().unwrap();
        assert!(held.acknowledge().await);
        drop(held);
        assert!(registry.remove_idle(&account));
        assert!(orchestrator.upgrade().is_none());
    }
}
