//! On-chain plumbing for redemption.
//!
//! Contract bindings, provider fallback probing, condition-id
//! normalization, and the Safe-proxy signature and receipt-verification
//! quirks live here so the engine reads as the algorithm it is.

use alloy::primitives::{address, b256, Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::queue::RedemptionStatus;

/// USDC (PoS bridged) on Polygon.
pub const USDC_ADDRESS: Address = address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174");

/// Conditional Tokens Framework (ERC-1155).
pub const CTF_ADDRESS: Address = address!("4D97DCd97eC945f40cF65F87097ACe5EA0476045");

/// Neg Risk Adapter.
pub const NEG_RISK_ADAPTER_ADDRESS: Address = address!("d91E80cF2E7be2e162c6513ceD06f1dD0dA35296");

/// Proxy-wallet factory.
pub const PROXY_FACTORY_ADDRESS: Address = address!("aacFeEa03eb1561C4e67d661e40682Bd20E3541b");

/// RPC endpoints probed when the configured one is down.
pub const FALLBACK_RPC_URLS: [&str; 3] = [
    "https://polygon-rpc.com",
    "https://polygon-bor-rpc.publicnode.com",
    "https://1rpc.io/matic",
];

/// Gas limit on redemption writes.
pub const REDEEM_GAS_LIMIT: u64 = 500_000;

/// `ExecutionSuccess(bytes32,uint256)` topic emitted by the Safe proxy.
pub const EXECUTION_SUCCESS_TOPIC: B256 =
    b256!("442e715f626346e8c54381002da614f62bee8d27386535b2521ec8540898556e");

/// `ExecutionFailure(bytes32,uint256)` topic emitted by the Safe proxy.
pub const EXECUTION_FAILURE_TOPIC: B256 =
    b256!("23428b18acfb3ea64b08dc0c1d296ea9c09702c09083ca5272e64d115b687d23");

/// ERC-20 `Transfer(address,address,uint256)` topic.
pub const ERC20_TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

sol! {
    #[sol(rpc)]
    interface IConditionalTokens {
        function payoutDenominator(bytes32 conditionId) external view returns (uint256);
        function balanceOf(address owner, uint256 id) external view returns (uint256);
        function redeemPositions(address collateralToken, bytes32 parentCollectionId, bytes32 conditionId, uint256[] calldata indexSets) external;
    }

    #[sol(rpc)]
    interface INegRiskAdapter {
        function wcol() external view returns (address);
        function redeemPositions(address collateralToken, bytes32 parentCollectionId, bytes32 conditionId, uint256[] calldata indexSets) external;
    }

    #[sol(rpc)]
    interface ISafeProxy {
        function getOwners() external view returns (address[] memory);
        function getThreshold() external view returns (uint256);
        function nonce() external view returns (uint256);
        function getTransactionHash(address to, uint256 value, bytes calldata data, uint8 operation, uint256 safeTxGas, uint256 baseGas, uint256 gasPrice, address gasToken, address refundReceiver, uint256 _nonce) external view returns (bytes32);
        function execTransaction(address to, uint256 value, bytes calldata data, uint8 operation, uint256 safeTxGas, uint256 baseGas, uint256 gasPrice, address gasToken, address refundReceiver, bytes calldata signatures) external payable returns (bool);
    }

    #[sol(rpc)]
    interface IProxyFactory {
        function computeProxyAddress(address owner) external view returns (address);
    }
}

/// Errors surfaced by chain helpers.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid condition id: {0}")]
    InvalidConditionId(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// What the proxy's receipt logs say about the inner call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyCallOutcome {
    /// `ExecutionSuccess` seen (a collateral `Transfer` usually rides along).
    Success,
    /// `ExecutionFailure` seen: the outer tx landed but the inner call failed.
    Failure,
    /// Neither topic from the proxy; treat as not verified.
    Unknown,
}

/// Normalizes a condition id into its 32-byte form.
///
/// Accepts `0x`-prefixed hex, bare hex, and decimal strings; idempotent on
/// already-normalized input.
pub fn normalize_condition_id(input: &str) -> Result<B256, ChainError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ChainError::InvalidConditionId("empty".to_string()));
    }

    let bare = trimmed.strip_prefix("0x").unwrap_or(trimmed);

    if bare.len() == 64 && bare.chars().all(|c| c.is_ascii_hexdigit()) {
        let bytes = hex::decode(bare)
            .map_err(|e| ChainError::InvalidConditionId(e.to_string()))?;
        return Ok(B256::from_slice(&bytes));
    }

    // Short hex (the index sometimes drops leading zeros): left-pad.
    if trimmed.starts_with("0x") && bare.chars().all(|c| c.is_ascii_hexdigit()) {
        let value = U256::from_str_radix(bare, 16)
            .map_err(|e| ChainError::InvalidConditionId(e.to_string()))?;
        return Ok(B256::from(value));
    }

    // Decimal token/condition ids.
    if bare.chars().all(|c| c.is_ascii_digit()) {
        let value = U256::from_str_radix(bare, 10)
            .map_err(|e| ChainError::InvalidConditionId(e.to_string()))?;
        return Ok(B256::from(value));
    }

    Err(ChainError::InvalidConditionId(format!("unparseable: {}", trimmed)))
}

/// Renders a B256 as the canonical `0x`-hex string.
pub fn condition_id_hex(id: B256) -> String {
    format!("0x{}", hex::encode(id.as_slice()))
}

/// Classifies a ladder-exhaustion message into its terminal status.
pub fn classify_failure(message: &str) -> RedemptionStatus {
    let lower = message.to_lowercase();
    if lower.contains("payout is zero") || lower.contains("result is empty") {
        RedemptionStatus::NoPayout
    } else {
        RedemptionStatus::Error
    }
}

/// Verifies a proxy-wrapped call from its receipt logs.
///
/// Only topics emitted by the proxy address count; `ExecutionFailure` wins
/// over anything else because it means the inner call reverted even though
/// the outer transaction succeeded.
pub fn verify_proxy_logs(logs: &[(Address, B256)], proxy: Address) -> ProxyCallOutcome {
    let mut success = false;
    for (address, topic) in logs {
        if *address != proxy {
            continue;
        }
        if *topic == EXECUTION_FAILURE_TOPIC {
            return ProxyCallOutcome::Failure;
        }
        if *topic == EXECUTION_SUCCESS_TOPIC {
            success = true;
        }
    }
    if success {
        ProxyCallOutcome::Success
    } else {
        ProxyCallOutcome::Unknown
    }
}

/// Whether the receipt carries a collateral `Transfer` from the payout
/// contract. Advisory: `ExecutionSuccess` alone is acceptable.
pub fn has_collateral_transfer(logs: &[(Address, B256)], collateral: Address) -> bool {
    logs.iter()
        .any(|(address, topic)| *address == collateral && *topic == ERC20_TRANSFER_TOPIC)
}

/// Signs a Safe transaction hash as an `eth_sign`-style pre-validated
/// signature: raw 65-byte ECDSA with `v` normalized to >= 27 and then
/// offset by +4.
pub fn eth_sign_signature(signer: &PrivateKeySigner, hash: B256) -> Result<Bytes, ChainError> {
    let signature = signer
        .sign_hash_sync(&hash)
        .map_err(|e| ChainError::Signing(e.to_string()))?;

    let mut raw: [u8; 65] = signature.as_bytes();
    if raw[64] < 27 {
        raw[64] += 27;
    }
    raw[64] += 4;
    Ok(Bytes::from(raw.to_vec()))
}

/// Parses the signer from a hex private key.
pub fn signer_from_key(private_key: &str) -> Result<PrivateKeySigner, ChainError> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    key.parse::<PrivateKeySigner>()
        .map_err(|e| ChainError::InvalidKey(e.to_string()))
}

/// Builds a provider on the first endpoint that answers a trivial query.
///
/// Falls back to the primary even when everything is dead; callers skip on
/// RPC errors anyway, so a dead provider just defers work a tick.
pub async fn connect_provider(primary: &str, signer: PrivateKeySigner) -> DynProvider {
    let mut urls = vec![primary.to_string()];
    urls.extend(FALLBACK_RPC_URLS.iter().map(|u| u.to_string()));

    for url in &urls {
        match ProviderBuilder::new().connect(url).await {
            Ok(probe) => match probe.get_block_number().await {
                Ok(block) => {
                    debug!(url = %url, block, "RPC endpoint healthy");
                    if let Ok(provider) = ProviderBuilder::new()
                        .wallet(signer.clone())
                        .connect(url)
                        .await
                    {
                        info!(url = %url, "Using RPC endpoint");
                        return provider.erased();
                    }
                }
                Err(e) => debug!(url = %url, error = %e, "RPC probe failed"),
            },
            Err(e) => debug!(url = %url, error = %e, "RPC connect failed"),
        }
    }

    warn!(url = %primary, "No healthy RPC endpoint, using primary anyway");
    match ProviderBuilder::new().wallet(signer).connect(primary).await {
        Ok(provider) => provider.erased(),
        Err(_) => {
            // Last resort: a provider that will error on use and defer the tick.
            ProviderBuilder::new()
                .connect_http(primary.parse().unwrap_or_else(|_| {
                    "https://polygon-rpc.com".parse().expect("static URL parses")
                }))
                .erased()
        }
    }
}

/// Discovers and verifies the proxy wallet for an owner.
///
/// The factory's deterministic address wins when code is deployed there and
/// the signer can single-sign (owner, threshold 1). A configured known
/// proxy is the fallback; `None` means "call the contracts directly".
pub async fn discover_proxy(
    provider: &DynProvider,
    owner: Address,
    known_proxy: Option<Address>,
) -> Option<Address> {
    let factory = IProxyFactory::new(PROXY_FACTORY_ADDRESS, provider.clone());

    if let Ok(computed) = factory.computeProxyAddress(owner).call().await {
        if is_deployed(provider, computed).await {
            if verify_safe(provider, computed, owner).await {
                info!(proxy = %computed, "Verified derived proxy wallet");
                return Some(computed);
            }
            warn!(proxy = %computed, "Derived proxy exists but cannot co-sign");
            return None;
        }
    }

    if let Some(fallback) = known_proxy {
        if is_deployed(provider, fallback).await {
            info!(proxy = %fallback, "Using configured proxy wallet");
            return Some(fallback);
        }
    }

    None
}

async fn is_deployed(provider: &DynProvider, address: Address) -> bool {
    match provider.get_code_at(address).await {
        Ok(code) => !code.is_empty(),
        Err(e) => {
            debug!(address = %address, error = %e, "get_code failed");
            false
        }
    }
}

/// The signer must be an owner and the threshold must be 1.
async fn verify_safe(provider: &DynProvider, proxy: Address, owner: Address) -> bool {
    let safe = ISafeProxy::new(proxy, provider.clone());

    let owners = match safe.getOwners().call().await {
        Ok(o) => o,
        Err(e) => {
            debug!(proxy = %proxy, error = %e, "getOwners failed");
            return false;
        }
    };
    if !owners.contains(&owner) {
        return false;
    }

    match safe.getThreshold().call().await {
        Ok(threshold) => threshold == U256::from(1),
        Err(e) => {
            debug!(proxy = %proxy, error = %e, "getThreshold failed");
            false
        }
    }
}
