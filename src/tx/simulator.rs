//! Read-only dry run of a call before anything is signed

use super::{CallDescription, SimulationResult};
use crate::chain::{ChainRpc, RpcCallError};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs a call against the current head without changing chain state
pub struct RequestSimulator {
    rpc: Arc<dyn ChainRpc>,
}

impl RequestSimulator {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self { rpc }
    }

    /// Predict whether `call` would succeed. Never signs and never spends gas.
    pub async fn simulate(&self, call: &CallDescription, deadline: Duration) -> SimulationResult {
        match timeout(deadline, self.dry_run(call)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Simulation of {} timed out after {:?}",
                    call.function.signature, deadline
                );
                SimulationResult::RpcFailure {
                    cause: "timeout".to_string(),
                }
            }
        }
    }

    async fn dry_run(&self, call: &CallDescription) -> SimulationResult {
        if let Err(e) = self.rpc.call(call).await {
            return Self::from_rpc_error(e);
        }

        match self.rpc.estimate_gas(call).await {
            Ok(estimated_gas) => {
                debug!(
                    "Simulation of {} for {:?} ok, estimated gas {}",
                    call.function.signature, call.caller, estimated_gas
                );
                SimulationResult::Ok { estimated_gas }
            }
            Err(e) => Self::from_rpc_error(e),
        }
    }

    fn from_rpc_error(err: RpcCallError) -> SimulationResult {
        match err {
            RpcCallError::Reverted(raw_payload) => {
                debug!("Simulation reverted with 0x{}", hex::encode(&raw_payload));
                SimulationResult::Reverted { raw_payload }
            }
            RpcCallError::Transport(cause) => SimulationResult::RpcFailure { cause },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::encode_error_string;
    use crate::chain::MockChainRpc;
    use crate::tx::fixtures;
    use ethers::types::{Bytes, U256};

    #[tokio::test]
    async fn test_ok_carries_gas_estimate() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_call().times(1).returning(|_| Ok(Bytes::new()));
        rpc.expect_estimate_gas()
            .times(1)
            .returning(|_| Ok(U256::from(48_000)));

        let simulator = RequestSimulator::new(Arc::new(rpc));
        let result = simulator
            .simulate(&fixtures::call(), Duration::from_secs(5))
            .await;

        assert_eq!(
            result,
            SimulationResult::Ok {
                estimated_gas: U256::from(48_000)
            }
        );
    }

    #[tokio::test]
    async fn test_revert_skips_gas_estimate() {
        let payload = Bytes::from(encode_error_string("Faucet: already claimed"));
        let expected = payload.clone();

        let mut rpc = MockChainRpc::new();
        rpc.expect_call()
            .times(1)
            .returning(move |_| Err(RpcCallError::Reverted(payload.clone())));
        rpc.expect_estimate_gas().never();

        let simulator = RequestSimulator::new(Arc::new(rpc));
        let result = simulator
            .simulate(&fixtures::call(), Duration::from_secs(5))
            .await;

        assert_eq!(result, SimulationResult::Reverted { raw_payload: expected });
    }

    #[tokio::test]
    async fn test_transport_error_is_rpc_failure() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_call()
            .returning(|_| Err(RpcCallError::Transport("connection refused".to_string())));

        let simulator = RequestSimulator::new(Arc::new(rpc));
        let result = simulator
            .simulate(&fixtures::call(), Duration::from_secs(5))
            .await;

        assert_eq!(
            result,
            SimulationResult::RpcFailure {
                cause: "connection refused".to_string()
            }
        );
    }

    struct HangingRpc;

    #[async_trait::async_trait]
    impl ChainRpc for HangingRpc {
        async fn call(&self, _call: &CallDescription) -> Result<Bytes, RpcCallError> {
            futures::future::pending().await
        }

        async fn estimate_gas(&self, _call: &CallDescription) -> Result<U256, RpcCallError> {
            futures::future::pending().await
        }

        async fn get_receipt(
            &self,
            _hash: ethers::types::H256,
        ) -> Result<Option<crate::chain::Receipt>, RpcCallError> {
            futures::future::pending().await
        }

        async fn block_number(&self) -> Result<u64, RpcCallError> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_yields_timeout_failure() {
        let simulator = RequestSimulator::new(Arc::new(HangingRpc));
        let result = simulator
            .simulate(&fixtures::call(), Duration::from_secs(15))
            .await;

        assert_eq!(
            result,
            SimulationResult::RpcFailure {
                cause: "timeout".to_string()
            }
        );
    }
}
