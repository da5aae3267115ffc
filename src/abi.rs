//! Faucet contract ABI description
//!
//! Holds the selector for the faucet call and the revert shapes the contract
//! is known to produce. Loaded from configuration so a contract upgrade only
//! needs a config change.

use crate::config::FaucetConfig;
use crate::error::{DripError, DripResult, FaucetErrorKind};
use crate::tx::CallDescription;

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, U256};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::fmt;

/// Selector of the builtin `Error(string)` revert
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Selector of the builtin `Panic(uint256)` revert
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Compute the 4-byte selector of a function or error signature
pub fn selector(signature: &str) -> [u8; 4] {
    let normalized: String = signature.chars().filter(|c| !c.is_whitespace()).collect();
    let hash = Keccak256::digest(normalized.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// A function signature together with its selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSelector {
    pub signature: String,
    pub selector: [u8; 4],
}

impl FunctionSelector {
    pub fn new(signature: &str) -> Self {
        Self {
            signature: signature.to_string(),
            selector: selector(signature),
        }
    }

    /// Function name without the parameter list
    pub fn name(&self) -> &str {
        self.signature
            .split('(')
            .next()
            .unwrap_or(&self.signature)
    }
}

impl fmt::Display for FunctionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [0x{}]", self.signature, hex::encode(self.selector))
    }
}

/// A custom error declared by the contract
#[derive(Debug, Clone)]
struct KnownError {
    signature: String,
    kind: FaucetErrorKind,
}

/// Result of decoding a revert payload
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRevert {
    /// A custom error the contract declares
    Custom {
        signature: String,
        kind: FaucetErrorKind,
    },
    /// `Error(string)` with its reason
    Reason(String),
    /// `Panic(uint256)` with its code
    Panic(U256),
    /// Revert without data
    Empty,
    /// Data that matches nothing known
    Undecodable { selector: Option<[u8; 4]> },
}

/// Static ABI description for the faucet contract
#[derive(Debug, Clone)]
pub struct ContractAbi {
    contract: Address,
    function: FunctionSelector,
    errors: HashMap<[u8; 4], KnownError>,
    reasons: Vec<(String, FaucetErrorKind)>,
}

impl ContractAbi {
    /// Build the ABI description from configuration
    pub fn from_config(config: &FaucetConfig) -> DripResult<Self> {
        let contract: Address =
            config
                .contract_address
                .parse()
                .map_err(|e| DripError::InvalidAddress {
                    address: config.contract_address.clone(),
                    message: format!("{}", e),
                })?;

        let mut abi = Self::new(contract, &config.function);

        for error in &config.errors {
            if !error.signature.ends_with(')') {
                return Err(DripError::Abi(format!(
                    "Invalid error signature: {}",
                    error.signature
                )));
            }
            abi = abi.with_error(&error.signature, error.kind);
        }

        for reason in &config.reasons {
            abi = abi.with_reason(&reason.pattern, reason.kind);
        }

        Ok(abi)
    }

    pub fn new(contract: Address, function_signature: &str) -> Self {
        Self {
            contract,
            function: FunctionSelector::new(function_signature),
            errors: HashMap::new(),
            reasons: Vec::new(),
        }
    }

    /// Register a custom error signature, e.g. `CooldownActive(uint256)`
    pub fn with_error(mut self, signature: &str, kind: FaucetErrorKind) -> Self {
        self.errors.insert(
            selector(signature),
            KnownError {
                signature: signature.to_string(),
                kind,
            },
        );
        self
    }

    /// Register a revert reason substring, matched case-insensitively
    pub fn with_reason(mut self, pattern: &str, kind: FaucetErrorKind) -> Self {
        self.reasons.push((pattern.to_lowercase(), kind));
        self
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn function(&self) -> &FunctionSelector {
        &self.function
    }

    /// Describe the faucet claim for `caller`
    pub fn faucet_call(&self, caller: Address) -> CallDescription {
        CallDescription::new(self.contract, self.function.clone(), Vec::new(), caller)
    }

    /// Decode a revert payload into a known error, a reason string or a panic
    pub fn decode_revert(&self, payload: &[u8]) -> DecodedRevert {
        if payload.is_empty() {
            return DecodedRevert::Empty;
        }
        if payload.len() < 4 {
            return DecodedRevert::Undecodable { selector: None };
        }

        let sel = [payload[0], payload[1], payload[2], payload[3]];
        let body = &payload[4..];

        if let Some(known) = self.errors.get(&sel) {
            return DecodedRevert::Custom {
                signature: known.signature.clone(),
                kind: known.kind,
            };
        }

        match sel {
            ERROR_STRING_SELECTOR => match abi::decode(&[ParamType::String], body) {
                Ok(tokens) => match tokens.into_iter().next() {
                    Some(Token::String(reason)) => DecodedRevert::Reason(reason),
                    _ => DecodedRevert::Undecodable { selector: Some(sel) },
                },
                Err(_) => DecodedRevert::Undecodable { selector: Some(sel) },
            },
            PANIC_SELECTOR => match abi::decode(&[ParamType::Uint(256)], body) {
                Ok(tokens) => match tokens.into_iter().next() {
                    Some(Token::Uint(code)) => DecodedRevert::Panic(code),
                    _ => DecodedRevert::Undecodable { selector: Some(sel) },
                },
                Err(_) => DecodedRevert::Undecodable { selector: Some(sel) },
            },
            _ => DecodedRevert::Undecodable { selector: Some(sel) },
        }
    }

    /// Map a revert reason string to a known kind
    pub fn classify_reason(&self, reason: &str) -> Option<FaucetErrorKind> {
        let reason = reason.to_lowercase();
        self.reasons
            .iter()
            .find(|(pattern, _)| reason.contains(pattern.as_str()))
            .map(|(_, kind)| *kind)
    }
}

/// Encode an `Error(string)` payload, as the contract would on `require` failure
#[cfg(test)]
pub(crate) fn encode_error_string(reason: &str) -> Vec<u8> {
    let mut data = ERROR_STRING_SELECTOR.to_vec();
    data.extend(abi::encode(&[Token::String(reason.to_string())]));
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn faucet_abi() -> ContractAbi {
        ContractAbi::new(Address::repeat_byte(0x11), "getFaucetAssets()")
            .with_error("CooldownActive(uint256)", FaucetErrorKind::CooldownActive)
            .with_reason("already claimed", FaucetErrorKind::AlreadyClaimed)
    }

    #[test]
    fn test_selector_matches_known_values() {
        assert_eq!(selector("Error(string)"), ERROR_STRING_SELECTOR);
        assert_eq!(selector("Panic(uint256)"), PANIC_SELECTOR);
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(selector("transfer(address, uint256)"), selector("transfer(address,uint256)"));
    }

    #[test]
    fn test_faucet_call_encodes_selector_only() {
        let abi = faucet_abi();
        let call = abi.faucet_call(Address::repeat_byte(0x22));
        assert_eq!(call.calldata().as_ref(), &selector("getFaucetAssets()")[..]);
        assert_eq!(call.contract, Address::repeat_byte(0x11));
        assert_eq!(abi.function().name(), "getFaucetAssets");
    }

    #[test]
    fn test_decode_custom_error() {
        let abi = faucet_abi();
        let mut payload = selector("CooldownActive(uint256)").to_vec();
        payload.extend(abi::encode(&[Token::Uint(U256::from(3600))]));

        assert_eq!(
            abi.decode_revert(&payload),
            DecodedRevert::Custom {
                signature: "CooldownActive(uint256)".to_string(),
                kind: FaucetErrorKind::CooldownActive,
            }
        );
    }

    #[test]
    fn test_decode_reason_string() {
        let abi = faucet_abi();
        let payload = encode_error_string("Faucet: already claimed");
        assert_eq!(
            abi.decode_revert(&payload),
            DecodedRevert::Reason("Faucet: already claimed".to_string())
        );
        assert_eq!(
            abi.classify_reason("Faucet: Already Claimed"),
            Some(FaucetErrorKind::AlreadyClaimed)
        );
        assert_eq!(abi.classify_reason("Faucet: paused"), None);
    }

    #[test]
    fn test_decode_panic_and_garbage() {
        let abi = faucet_abi();
        let mut panic = PANIC_SELECTOR.to_vec();
        panic.extend(abi::encode(&[Token::Uint(U256::from(0x11))]));
        assert_eq!(abi.decode_revert(&panic), DecodedRevert::Panic(U256::from(0x11)));

        assert_eq!(abi.decode_revert(&[]), DecodedRevert::Empty);
        assert_eq!(
            abi.decode_revert(&[0xde, 0xad]),
            DecodedRevert::Undecodable { selector: None }
        );
        assert_eq!(
            abi.decode_revert(&ERROR_STRING_SELECTOR),
            DecodedRevert::Undecodable {
                selector: Some(ERROR_STRING_SELECTOR)
            }
        );
    }
}
