//! Redemption engine.
//!
//! Once per scan tick, walks the pending queue and redeems every resolved
//! position through the contract fallback ladder: neg-risk adapter with
//! wrapped collateral first, plain conditional-tokens with USDC second.
//! Calls route through the verified Safe proxy when one exists, otherwise
//! straight from the signer.
//!
//! Every fault is logged and none is fatal: transient RPC errors leave
//! entries `waiting` for the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::consensus::TxReceipt;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::activity::{ActivityBus, ActivityKind};

use super::chain::{
    classify_failure, connect_provider, discover_proxy, eth_sign_signature,
    has_collateral_transfer, normalize_condition_id, signer_from_key, verify_proxy_logs,
    IConditionalTokens, INegRiskAdapter, ISafeProxy, ProxyCallOutcome, CTF_ADDRESS,
    NEG_RISK_ADAPTER_ADDRESS, REDEEM_GAS_LIMIT, USDC_ADDRESS,
};
use super::queue::{RedemptionQueue, RedemptionStatus};

/// Engine configuration; see `BotConfig` for the environment mapping.
#[derive(Debug, Clone)]
pub struct RedemptionEngineConfig {
    pub rpc_url: String,
    pub private_key: String,
    /// Static proxy fallback when factory derivation finds nothing.
    pub known_proxy: Option<Address>,
}

/// One rung of the fallback ladder.
struct Attempt {
    label: &'static str,
    target: Address,
    collateral: Address,
}

/// Releases the re-entrancy latch on every exit path.
struct LatchGuard<'a>(&'a AtomicBool);

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The asynchronous reconciler for resolved positions.
pub struct RedemptionEngine {
    config: RedemptionEngineConfig,
    queue: Arc<RedemptionQueue>,
    bus: Arc<ActivityBus>,
    is_checking: AtomicBool,
    /// Proxy discovery result cached for the process lifetime.
    verified_proxy: Mutex<Option<Option<Address>>>,
}

impl RedemptionEngine {
    pub fn new(
        config: RedemptionEngineConfig,
        queue: Arc<RedemptionQueue>,
        bus: Arc<ActivityBus>,
    ) -> Self {
        Self {
            config,
            queue,
            bus,
            is_checking: AtomicBool::new(false),
            verified_proxy: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<RedemptionQueue> {
        &self.queue
    }

    /// The cached proxy address, once discovery ran.
    pub fn proxy_address(&self) -> Option<Address> {
        self.verified_proxy.lock().clone().flatten()
    }

    /// Per-tick entry point. Re-entrant invocations return immediately.
    pub async fn check_and_redeem(&self) {
        if self.is_checking.swap(true, Ordering::AcqRel) {
            debug!("Redemption check already running, skipping");
            return;
        }
        let _latch = LatchGuard(&self.is_checking);

        let candidates = self.queue.candidates(Utc::now());
        if candidates.is_empty() {
            return;
        }
        info!(count = candidates.len(), "Checking pending redemptions");

        let signer = match signer_from_key(&self.config.private_key) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Cannot derive signer, skipping redemption tick");
                return;
            }
        };
        let owner = signer.address();

        let provider = connect_provider(&self.config.rpc_url, signer.clone()).await;

        let proxy = {
            let cached = self.verified_proxy.lock().clone();
            match cached {
                Some(p) => p,
                None => {
                    let discovered =
                        discover_proxy(&provider, owner, self.config.known_proxy).await;
                    *self.verified_proxy.lock() = Some(discovered);
                    discovered
                }
            }
        };

        // One read per tick; None disables the neg-risk rung.
        let adapter = INegRiskAdapter::new(NEG_RISK_ADAPTER_ADDRESS, provider.clone());
        let wrapped_collateral = match adapter.wcol().call().await {
            Ok(address) => Some(address),
            Err(e) => {
                debug!(error = %e, "wcol() unavailable, neg-risk rung disabled this tick");
                None
            }
        };

        for candidate in candidates {
            self.process_candidate(
                &provider,
                &signer,
                proxy,
                wrapped_collateral,
                &candidate.key().to_string(),
                &candidate.condition_id,
                candidate.token_id.as_deref(),
                candidate.neg_risk,
            )
            .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_candidate(
        &self,
        provider: &DynProvider,
        signer: &PrivateKeySigner,
        proxy: Option<Address>,
        wrapped_collateral: Option<Address>,
        key: &str,
        condition_id: &str,
        token_id: Option<&str>,
        neg_risk: bool,
    ) {
        let condition = match normalize_condition_id(condition_id) {
            Ok(c) => c,
            Err(e) => {
                warn!(key, error = %e, "Unparseable condition id");
                self.queue
                    .finish(key, RedemptionStatus::Error, None, Some(e.to_string()));
                self.bus.record(
                    ActivityKind::Redemption,
                    format!("Redemption error for {}: {}", key, e),
                    None,
                );
                return;
            }
        };

        // Resolution check; zero denominator means not resolved yet, and an
        // RPC error just defers to the next tick.
        let ctf = IConditionalTokens::new(CTF_ADDRESS, provider.clone());
        match ctf.payoutDenominator(condition).call().await {
            Ok(denominator) if denominator.is_zero() => {
                debug!(key, "Market not resolved yet");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(key, error = %e, "payoutDenominator failed, retrying next tick");
                return;
            }
        }

        let wallet = proxy.unwrap_or_else(|| signer.address());

        // A zero balance is a lost position: nothing to redeem, no write.
        // Without a parseable token id the balance cannot be confirmed, so
        // the entry is a terminal error rather than a blind write.
        let token_u256 = match token_id.and_then(|t| U256::from_str_radix(t, 10).ok()) {
            Some(t) => t,
            None => {
                warn!(key, token_id = ?token_id, "Missing or invalid token id");
                self.queue.finish(
                    key,
                    RedemptionStatus::Error,
                    None,
                    Some("missing or invalid token id".to_string()),
                );
                self.bus.record(
                    ActivityKind::Redemption,
                    format!("Redemption error for {}: missing or invalid token id", key),
                    None,
                );
                return;
            }
        };
        match ctf.balanceOf(wallet, token_u256).call().await {
            Ok(balance) if balance.is_zero() => {
                info!(key, "Position lost (zero balance)");
                self.queue.finish(key, RedemptionStatus::NoPayout, None, None);
                self.bus.record(
                    ActivityKind::Redemption,
                    format!("No payout for {} (lost)", short_id(condition_id)),
                    None,
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(key, error = %e, "balanceOf failed, retrying next tick");
                return;
            }
        }

        self.queue.mark_redeeming(key);

        let mut ladder: Vec<Attempt> = Vec::with_capacity(2);
        if neg_risk {
            if let Some(wcol) = wrapped_collateral {
                ladder.push(Attempt {
                    label: "NegRisk",
                    target: NEG_RISK_ADAPTER_ADDRESS,
                    collateral: wcol,
                });
            }
        }
        ladder.push(Attempt {
            label: "CTF",
            target: CTF_ADDRESS,
            collateral: USDC_ADDRESS,
        });

        let mut last_error = String::new();
        for attempt in &ladder {
            match self
                .attempt_redemption(provider, signer, proxy, attempt, condition)
                .await
            {
                Ok(tx_hash) => {
                    info!(key, label = attempt.label, tx_hash = %tx_hash, "Redemption succeeded");
                    self.queue
                        .finish(key, RedemptionStatus::Redeemed, Some(tx_hash.clone()), None);
                    self.bus.record(
                        ActivityKind::Redemption,
                        format!("Redeemed {} via {}", short_id(condition_id), attempt.label),
                        Some(json!({ "tx_hash": tx_hash, "label": attempt.label })),
                    );
                    return;
                }
                Err(e) => {
                    warn!(key, label = attempt.label, error = %e, "Redemption attempt failed");
                    last_error = e;
                }
            }
        }

        let status = classify_failure(&last_error);
        self.queue.finish(key, status, None, Some(last_error.clone()));
        self.bus.record(
            ActivityKind::Redemption,
            match status {
                RedemptionStatus::NoPayout => {
                    format!("No payout for {}", short_id(condition_id))
                }
                _ => format!("Redemption failed for {}: {}", short_id(condition_id), last_error),
            },
            None,
        );
    }

    /// One rung: encode `redeemPositions`, submit (through the proxy when
    /// present), and verify the receipt.
    async fn attempt_redemption(
        &self,
        provider: &DynProvider,
        signer: &PrivateKeySigner,
        proxy: Option<Address>,
        attempt: &Attempt,
        condition: B256,
    ) -> Result<String, String> {
        let index_sets = vec![U256::from(1), U256::from(2)];

        let gas_price = provider
            .get_gas_price()
            .await
            .map_err(|e| format!("gas price: {}", e))?
            .saturating_mul(2);

        match proxy {
            Some(proxy_address) => {
                let calldata = IConditionalTokens::redeemPositionsCall {
                    collateralToken: attempt.collateral,
                    parentCollectionId: B256::ZERO,
                    conditionId: condition,
                    indexSets: index_sets,
                }
                .abi_encode();

                let receipt = self
                    .exec_through_proxy(provider, signer, proxy_address, attempt.target, calldata, gas_price)
                    .await?;

                let logs = receipt_log_pairs(&receipt);
                match verify_proxy_logs(&logs, proxy_address) {
                    ProxyCallOutcome::Success => {
                        if !has_collateral_transfer(&logs, attempt.collateral) {
                            debug!("ExecutionSuccess without collateral transfer; accepting");
                        }
                        Ok(format!("{:#x}", receipt.transaction_hash))
                    }
                    ProxyCallOutcome::Failure => {
                        Err("inner call failed (ExecutionFailure)".to_string())
                    }
                    ProxyCallOutcome::Unknown => Err("no execution logs from proxy".to_string()),
                }
            }
            None => {
                let contract = IConditionalTokens::new(attempt.target, provider.clone());
                let receipt = contract
                    .redeemPositions(attempt.collateral, B256::ZERO, condition, index_sets)
                    .gas(REDEEM_GAS_LIMIT)
                    .gas_price(gas_price)
                    .send()
                    .await
                    .map_err(|e| format!("send: {}", e))?
                    .get_receipt()
                    .await
                    .map_err(|e| format!("receipt: {}", e))?;

                if receipt.status() {
                    Ok(format!("{:#x}", receipt.transaction_hash))
                } else {
                    Err("transaction reverted".to_string())
                }
            }
        }
    }

    /// Wraps a call in the Safe's `execTransaction` with the pre-validated
    /// eth_sign signature.
    async fn exec_through_proxy(
        &self,
        provider: &DynProvider,
        signer: &PrivateKeySigner,
        proxy: Address,
        target: Address,
        calldata: Vec<u8>,
        gas_price: u128,
    ) -> Result<TransactionReceipt, String> {
        let safe = ISafeProxy::new(proxy, provider.clone());
        let data = Bytes::from(calldata);

        let nonce = safe
            .nonce()
            .call()
            .await
            .map_err(|e| format!("nonce: {}", e))?;

        let tx_hash = safe
            .getTransactionHash(
                target,
                U256::ZERO,
                data.clone(),
                0,
                U256::ZERO,
                U256::ZERO,
                U256::ZERO,
                Address::ZERO,
                Address::ZERO,
                nonce,
            )
            .call()
            .await
            .map_err(|e| format!("getTransactionHash: {}", e))?;

        let signature = eth_sign_signature(signer, tx_hash).map_err(|e| e.to_string())?;

        safe.execTransaction(
            target,
            U256::ZERO,
            data,
            0,
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            Address::ZERO,
            Address::ZERO,
            signature,
        )
        .gas(REDEEM_GAS_LIMIT)
        .gas_price(gas_price)
        .send()
        .await
        .map_err(|e| format!("execTransaction send: {}", e))?
        .get_receipt()
        .await
        .map_err(|e| format!("execTransaction receipt: {}", e))
    }
}

/// Flattens receipt logs into (emitter, topic0) pairs for verification.
fn receipt_log_pairs(receipt: &TransactionReceipt) -> Vec<(Address, B256)> {
    receipt
        .inner
        .logs()
        .iter()
        .filter_map(|log| {
            log.inner
                .data
                .topics()
                .first()
                .map(|topic| (log.inner.address, *topic))
        })
        .collect()
}

/// First ten characters of an id for log lines.
fn short_id(id: &str) -> &str {
    if id.len() > 10 {
        &id[..10]
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redemption::queue::PendingCandidate;

    fn engine() -> RedemptionEngine {
        RedemptionEngine::new(
            RedemptionEngineConfig {
                rpc_url: "http://127.0.0.1:1".to_string(),
                private_key: "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
                    .to_string(),
                known_proxy: None,
            },
            Arc::new(RedemptionQueue::new()),
            Arc::new(ActivityBus::new()),
        )
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0x123456789abcdef"), "0x12345678");
        assert_eq!(short_id("short"), "short");
    }

    #[tokio::test]
    async fn test_empty_queue_returns_without_network() {
        // The candidate scan runs before any provider is built, so an empty
        // queue never touches the (dead) RPC endpoint.
        let e = engine();
        e.check_and_redeem().await;
        assert_eq!(e.queue().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_latch_blocks_reentry() {
        let e = Arc::new(engine());
        e.is_checking.store(true, Ordering::Release);

        // Queue a ripe candidate; the latch must short-circuit before any
        // processing happens.
        e.queue().enqueue(PendingCandidate {
            condition_id: "0xabc".to_string(),
            token_id: None,
            neg_risk: false,
            market_end_time: Utc::now() - chrono::Duration::minutes(10),
        });

        e.check_and_redeem().await;
        assert_eq!(e.queue().pending()[0].status, RedemptionStatus::Waiting);
        assert!(e.is_checking.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_latch_released_after_run() {
        let e = engine();
        e.check_and_redeem().await;
        assert!(!e.is_checking.load(Ordering::Acquire));
    }

    #[test]
    fn test_proxy_cache_starts_empty() {
        let e = engine();
        assert!(e.proxy_address().is_none());
    }
}
