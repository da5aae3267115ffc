//! Chain provider with multi-RPC support and automatic failover

use super::{ChainRpc, Receipt, RpcCallError};
use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{DripError, DripResult};
use crate::tx::CallDescription;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{BlockNumber, Bytes, TransactionRequest, H256, U256};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub async fn new(config: ChainConfig) -> DripResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(config.poll_interval_ms));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(DripError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let provider = Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        };

        match provider.block_number().await {
            Ok(head) => info!(
                "Connected to chain {} ({}) at block {}",
                provider.config.name, provider.config.chain_id, head
            ),
            Err(e) => warn!(
                "Chain {} is not reachable yet: {}",
                provider.config.chain_id, e
            ),
        }

        Ok(provider)
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Run `op` against the active provider, failing over on transport errors.
    /// A revert is an answer from the chain and is returned immediately.
    async fn with_failover<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, RpcCallError>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = String::new();

        for _ in 0..self.http_providers.len() {
            match op(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => match classify_provider_error(e) {
                    RpcCallError::Reverted(data) => return Err(RpcCallError::Reverted(data)),
                    RpcCallError::Transport(message) => {
                        warn!(
                            "{} failed on chain {}: {}",
                            operation, self.config.chain_id, message
                        );
                        last_error = message;
                        self.failover();
                    }
                },
            }
        }

        Err(RpcCallError::Transport(format!(
            "All providers failed ({}): {}",
            operation, last_error
        )))
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(&self) -> DripResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| DripError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> DripResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| DripError::GasEstimation(e.to_string()))?
            .ok_or_else(|| DripError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| DripError::GasEstimation("No base fee in block".to_string()))?;

        // 2 gwei tip; max fee leaves room for two full base-fee increases
        let priority_fee = U256::from(2_000_000_000u64);
        let max_fee = base_fee * 2 + priority_fee;

        let max_gwei = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        let max_fee = std::cmp::min(max_fee, max_gwei);

        Ok((max_fee, std::cmp::min(priority_fee, max_fee)))
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Get chain configuration
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }
}

#[async_trait]
impl ChainRpc for ChainProvider {
    async fn call(&self, call: &CallDescription) -> Result<Bytes, RpcCallError> {
        let tx = to_typed_transaction(call);
        self.with_failover("eth_call", |p| {
            let tx = tx.clone();
            async move { p.call(&tx, None).await }
        })
        .await
    }

    async fn estimate_gas(&self, call: &CallDescription) -> Result<U256, RpcCallError> {
        let tx = to_typed_transaction(call);
        self.with_failover("eth_estimateGas", |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(&tx, None).await }
        })
        .await
    }

    async fn get_receipt(&self, hash: H256) -> Result<Option<Receipt>, RpcCallError> {
        let receipt = self
            .with_failover("eth_getTransactionReceipt", |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;

        Ok(receipt.map(|r| Receipt {
            transaction_hash: r.transaction_hash,
            block_number: r.block_number.map(|b| b.as_u64()),
            success: r.status == Some(1.into()),
        }))
    }

    async fn block_number(&self) -> Result<u64, RpcCallError> {
        self.with_failover("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
            .map(|b| b.as_u64())
    }
}

/// Build the transaction request a call description stands for
fn to_typed_transaction(call: &CallDescription) -> TypedTransaction {
    TransactionRequest::new()
        .from(call.caller)
        .to(call.contract)
        .data(call.calldata())
        .into()
}

/// Separate reverts (with their data) from transport failures
fn classify_provider_error(err: ProviderError) -> RpcCallError {
    if let Some(response) = err.as_error_response() {
        if let Some(data) = response.as_revert_data() {
            return RpcCallError::Reverted(data);
        }
        // Geth reports reverts with code 3
        if response.code == 3 {
            return RpcCallError::Reverted(Bytes::new());
        }
    }

    RpcCallError::Transport(err.to_string())
}

/// Gas price types
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::fixtures;

    #[test]
    fn test_typed_transaction_carries_call() {
        let call = fixtures::call();
        let tx = to_typed_transaction(&call);

        assert_eq!(tx.from(), Some(&call.caller));
        assert_eq!(tx.data(), Some(&call.calldata()));
    }

    #[test]
    fn test_non_rpc_error_is_transport() {
        let err = ProviderError::CustomError("connection refused".to_string());
        assert!(matches!(
            classify_provider_error(err),
            RpcCallError::Transport(msg) if msg.contains("connection refused")
        ));
    }
}
