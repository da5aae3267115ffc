//! Local key signer: the wallet collaborator used by the command-line binary

use super::gas::GasEstimator;
use super::{SignatureRequest, Wallet, WalletError, WalletStatus};
use crate::chain::{ChainProvider, ChainRpc, GasPrice};
use crate::config::{ApprovalMode, WalletConfig};
use crate::error::{DripError, DripResult};

use async_trait::async_trait;
use ethers::providers::{Middleware, ProviderError, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Eip1559TransactionRequest, TransactionRequest, H256, U256,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Signs with a private key held in the process and broadcasts through the
/// chain provider
pub struct LocalSigner {
    provider: Arc<ChainProvider>,
    wallet: LocalWallet,
    gas_estimator: GasEstimator,
    approval: ApprovalMode,
}

impl LocalSigner {
    /// Load the key from the environment variable named in the wallet config
    pub fn from_env(provider: Arc<ChainProvider>, config: &WalletConfig) -> DripResult<Self> {
        let key = std::env::var(&config.private_key_env).map_err(|_| {
            DripError::Wallet(format!(
                "No wallet configured. Set {}",
                config.private_key_env
            ))
        })?;

        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| DripError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(provider.chain_id());

        info!("Local signer initialized with wallet: {:?}", wallet.address());

        Ok(Self {
            provider,
            wallet,
            gas_estimator: GasEstimator::new(),
            approval: config.approval,
        })
    }

    /// Get wallet address
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Ask on the terminal before signing
    async fn approve(&self, request: &SignatureRequest) -> Result<(), WalletError> {
        if self.approval == ApprovalMode::Auto {
            return Ok(());
        }

        let prompt = format!(
            "Sign {} on {:?} from {:?} (gas limit {})? [y/N] ",
            request.call.function.signature,
            request.call.contract,
            request.call.caller,
            request.gas_limit
        );

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(prompt.as_bytes())
            .await
            .map_err(|e| WalletError::Disconnected(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| WalletError::Disconnected(e.to_string()))?;

        let mut answer = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut answer)
            .await
            .map_err(|e| WalletError::Disconnected(e.to_string()))?;

        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Ok(()),
            _ => Err(WalletError::UserRejected),
        }
    }

    /// Build the transaction for a signature request
    fn build_tx(
        &self,
        request: &SignatureRequest,
        nonce: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        let mut typed_tx = match gas_price {
            GasPrice::Legacy(price) => TypedTransaction::Legacy(
                TransactionRequest::new()
                    .from(self.address())
                    .to(request.call.contract)
                    .data(request.call.calldata())
                    .nonce(nonce)
                    .gas(request.gas_limit)
                    .gas_price(*price),
            ),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => TypedTransaction::Eip1559(
                Eip1559TransactionRequest::new()
                    .from(self.address())
                    .to(request.call.contract)
                    .data(request.call.calldata())
                    .nonce(nonce)
                    .gas(request.gas_limit)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas),
            ),
        };
        typed_tx.set_chain_id(self.provider.chain_id());
        typed_tx
    }
}

#[async_trait]
impl Wallet for LocalSigner {
    async fn connect_status(&self) -> WalletStatus {
        let connected = match self.provider.block_number().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Signer cannot reach chain {}: {}", self.provider.chain_id(), e);
                false
            }
        };

        WalletStatus {
            address: self.address(),
            connected,
        }
    }

    async fn request_signature_and_broadcast(
        &self,
        request: &SignatureRequest,
    ) -> Result<H256, WalletError> {
        self.approve(request).await?;

        let http = self.provider.http();
        let nonce = http
            .get_transaction_count(self.address(), Some(BlockNumber::Pending.into()))
            .await
            .map_err(classify_broadcast_error)?;

        let gas_limit = self.gas_estimator.buffered_limit(request.gas_limit);
        let gas_price = self
            .gas_estimator
            .get_gas_price(&self.provider)
            .await
            .map_err(|e| WalletError::Disconnected(e.to_string()))?;

        let balance = http
            .get_balance(self.address(), None)
            .await
            .map_err(classify_broadcast_error)?;
        let cost = GasEstimator::calculate_cost(gas_limit, &gas_price);
        if balance < cost {
            return Err(WalletError::Broadcast(format!(
                "insufficient funds for gas: have {}, need {}",
                balance, cost
            )));
        }

        let request = SignatureRequest {
            call: request.call.clone(),
            gas_limit,
        };
        let tx = self.build_tx(&request, nonce, &gas_price);

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| WalletError::Broadcast(format!("signing failed: {}", e)))?;
        let raw = tx.rlp_signed(&signature);

        let pending = http
            .send_raw_transaction(raw)
            .await
            .map_err(classify_broadcast_error)?;
        let tx_hash = pending.tx_hash();

        debug!("Broadcast {:?} with nonce {}", tx_hash, nonce);
        Ok(tx_hash)
    }
}

/// A node that answered refused the transaction; anything else is a lost connection
fn classify_broadcast_error(err: ProviderError) -> WalletError {
    match err.as_error_response() {
        Some(response) => WalletError::Broadcast(response.message.clone()),
        None => WalletError::Disconnected(err.to_string()),
    }
}
