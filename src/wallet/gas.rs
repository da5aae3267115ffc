//! Gas limit and price buffering for locally signed transactions

use crate::chain::{ChainProvider, GasPrice};
use crate::error::DripResult;

use ethers::types::U256;
use tracing::debug;

/// Gas estimator for transactions
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    /// Create a new gas estimator
    pub fn new() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }

    /// Gas limit for a call whose dry run used `estimated` gas
    pub fn buffered_limit(&self, estimated: U256) -> U256 {
        estimated + estimated * self.gas_limit_buffer_percent / 100
    }

    /// Get buffered gas price for a chain
    pub async fn get_gas_price(&self, provider: &ChainProvider) -> DripResult<GasPrice> {
        let gas_price = provider.get_gas_price().await?;
        let buffered = self.buffer_price(gas_price);

        debug!("Gas price for chain {}: {:?}", provider.chain_id(), buffered);
        Ok(buffered)
    }

    fn buffer_price(&self, gas_price: GasPrice) -> GasPrice {
        match gas_price {
            GasPrice::Legacy(price) => {
                let buffer = price * self.gas_price_buffer_percent / 100;
                GasPrice::Legacy(price + buffer)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let fee_buffer = max_fee_per_gas * self.gas_price_buffer_percent / 100;
                let priority_buffer =
                    max_priority_fee_per_gas * self.gas_price_buffer_percent / 100;
                GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee_per_gas + fee_buffer,
                    max_priority_fee_per_gas: max_priority_fee_per_gas + priority_buffer,
                }
            }
        }
    }

    /// Upper bound of the fee in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => gas_limit * *max_fee_per_gas,
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_buffer() {
        let estimator = GasEstimator::new();
        assert_eq!(estimator.buffered_limit(U256::from(50_000)), U256::from(60_000));
    }

    #[test]
    fn test_price_buffer() {
        let estimator = GasEstimator::new();
        assert_eq!(
            estimator.buffer_price(GasPrice::Legacy(U256::from(100))),
            GasPrice::Legacy(U256::from(110))
        );
        assert_eq!(
            estimator.buffer_price(GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(1000),
                max_priority_fee_per_gas: U256::from(10),
            }),
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(1100),
                max_priority_fee_per_gas: U256::from(11),
            }
        );
    }

    #[test]
    fn test_cost_uses_max_fee() {
        let price = GasPrice::Eip1559 {
            max_fee_per_gas: U256::from(3),
            max_priority_fee_per_gas: U256::from(1),
        };
        assert_eq!(GasEstimator::calculate_cost(U256::from(10), &price), U256::from(30));
    }
}
