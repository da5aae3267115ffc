//! Configuration management for the faucet drip orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::FaucetErrorKind;

use anyhow::{Context, Result};
use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chain: ChainConfig,
    pub faucet: FaucetConfig,
    #[serde(default)]
    pub deadlines: DeadlineConfig,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    #[default]
    Eip1559,
}

/// Static description of the faucet contract: the call to make and the
/// revert shapes the translator knows how to name.
#[derive(Debug, Clone, Deserialize)]
pub struct FaucetConfig {
    pub contract_address: String,
    #[serde(default = "default_function")]
    pub function: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_max_recent")]
    pub max_recent_transactions: usize,
    #[serde(default)]
    pub errors: Vec<KnownErrorConfig>,
    #[serde(default)]
    pub reasons: Vec<KnownReasonConfig>,
}

/// Custom error declared in the contract ABI, e.g. `CooldownActive(uint256)`
#[derive(Debug, Clone, Deserialize)]
pub struct KnownErrorConfig {
    pub signature: String,
    pub kind: FaucetErrorKind,
}

/// Substring of an `Error(string)` revert reason
#[derive(Debug, Clone, Deserialize)]
pub struct KnownReasonConfig {
    pub pattern: String,
    pub kind: FaucetErrorKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeadlineConfig {
    pub simulation_secs: u64,
    pub signature_secs: u64,
    pub confirmation_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    #[serde(default)]
    pub approval: ApprovalMode,
}

/// How the local signer obtains the user's approval before signing
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    Auto,
    #[default]
    Prompt,
}

fn default_confirmation_blocks() -> u64 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_gas_price_gwei() -> u64 {
    100
}

fn default_function() -> String {
    "getFaucetAssets()".to_string()
}

fn default_description() -> String {
    "Get faucet drip".to_string()
}

fn default_max_recent() -> usize {
    20
}

fn default_private_key_env() -> String {
    "FAUCET_PRIVATE_KEY".to_string()
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            simulation_secs: 15,
            signature_secs: 120,
            confirmation_secs: 180,
        }
    }
}

impl DeadlineConfig {
    pub fn simulation(&self) -> Duration {
        Duration::from_secs(self.simulation_secs)
    }

    pub fn signature(&self) -> Duration {
        Duration::from_secs(self.signature_secs)
    }

    pub fn confirmation(&self) -> Duration {
        Duration::from_secs(self.confirmation_secs)
    }
}

impl ChainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    /// Load settings from the file named by `FAUCET_CONFIG`, or the default path
    pub fn load() -> Result<Self> {
        let config_path = env::var("FAUCET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references first
    pub fn parse(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.iter().all(|u| u.trim().is_empty()) {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }

        if self.chain.confirmation_blocks == 0 {
            anyhow::bail!("confirmation_blocks must be at least 1");
        }

        if self.chain.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }

        self.faucet
            .contract_address
            .parse::<Address>()
            .with_context(|| {
                format!("Invalid faucet contract address: {}", self.faucet.contract_address)
            })?;

        if !self.faucet.function.contains('(') || !self.faucet.function.ends_with(')') {
            anyhow::bail!("Invalid faucet function signature: {}", self.faucet.function);
        }

        let d = &self.deadlines;
        if d.simulation_secs == 0 || d.signature_secs == 0 || d.confirmation_secs == 0 {
            anyhow::bail!("All deadlines must be greater than zero");
        }

        if self.wallet.private_key_env.is_empty() {
            tracing::warn!("No private key variable configured - signing will fail");
        }

        Ok(())
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
