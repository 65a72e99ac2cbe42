//! Application wiring.
//!
//! Builds every subsystem from the validated config and hands the HTTP
//! layer one shared handle. All singletons are explicit `Arc`s passed in
//! here; nothing is ambient.

use std::sync::Arc;

use anyhow::{Context, Result};

use updown_market::{
    ClobCredentials, ClobOrderClient, DiscoveryConfig, MarketDataFetcher, MarketDiscovery,
    PositionsClient,
};

use crate::activity::ActivityBus;
use crate::config::{BotConfig, Strategy};
use crate::coordinator::{Coordinator, CoordinatorConfig, CoordinatorDeps};
use crate::executor::{OrderExecutor, RetryPolicy};
use crate::feed::{PriceFeed, PriceFeedHandle};
use crate::policy::{DecisionPolicy, ModelPolicy, ModelPolicyConfig, SpikeConfig, SpikePolicy};
use crate::positions::PositionScanner;
use crate::redemption::{
    signer_from_key, RedemptionEngine, RedemptionEngineConfig, RedemptionQueue,
};
use crate::safety::{SafetyConfig, SafetyLedger};

/// Shared handle given to the HTTP layer.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub bus: Arc<ActivityBus>,
    pub safety: Arc<SafetyLedger>,
    pub feed: PriceFeedHandle,
    pub engine: Arc<RedemptionEngine>,
    pub scanner: Arc<PositionScanner>,
    /// EOA derived from the signing key.
    pub signer_address: String,
}

impl AppState {
    /// Wires all subsystems. The returned `PriceFeed` still has to be
    /// spawned by the caller.
    pub fn build(config: &BotConfig) -> Result<(Arc<Self>, PriceFeed)> {
        let bus = Arc::new(ActivityBus::new());

        let safety = Arc::new(SafetyLedger::new(
            SafetyConfig {
                max_trade_size: config.max_trade_size,
                daily_loss_limit: config.daily_loss_limit,
                max_daily_losses: config.max_daily_losses,
            },
            Arc::clone(&bus),
        ));

        let feed = PriceFeed::new(config.asset.ticker_symbol());
        let feed_handle = feed.handle();

        let private_key = config
            .wallet_private_key
            .clone()
            .context("wallet private key missing")?;
        let signer = signer_from_key(&private_key).context("invalid wallet private key")?;
        let signer_address = format!("{:?}", signer.address());

        let credentials = ClobCredentials {
            address: signer_address.clone(),
            api_key: config.clob_api_key.clone().context("CLOB api key missing")?,
            secret: config.clob_api_secret.clone().context("CLOB api secret missing")?,
            passphrase: config
                .clob_api_passphrase
                .clone()
                .context("CLOB api passphrase missing")?,
        };
        let gateway = Arc::new(ClobOrderClient::new(credentials));

        let spike_mode = config.strategy == Strategy::Spike;
        let retry = if spike_mode {
            RetryPolicy::single_attempt()
        } else {
            RetryPolicy::default()
        };
        let executor = Arc::new(
            OrderExecutor::new(gateway, retry, Arc::clone(&bus)).with_spike_mode(spike_mode),
        );

        let discovery_config = if spike_mode {
            DiscoveryConfig::spike_mode()
        } else {
            DiscoveryConfig::default()
        };
        let discovery = Arc::new(MarketDiscovery::new(discovery_config));
        let fetcher = Arc::new(MarketDataFetcher::new());

        let spike_config = SpikeConfig {
            threshold: config.spike_threshold,
            min_speed: config.min_spike_speed,
        };
        let (policy, spike_fast_path): (Arc<dyn DecisionPolicy>, Option<SpikePolicy>) =
            match config.strategy {
                Strategy::Spike => (
                    Arc::new(SpikePolicy::new(spike_config.clone())),
                    Some(SpikePolicy::new(spike_config)),
                ),
                Strategy::Model => (
                    Arc::new(ModelPolicy::new(ModelPolicyConfig::new(
                        config.model_api_url.clone(),
                        config.model_api_key.clone().unwrap_or_default(),
                        config.model_name.clone(),
                    ))),
                    None,
                ),
            };

        let queue = Arc::new(RedemptionQueue::new());
        let engine = Arc::new(RedemptionEngine::new(
            RedemptionEngineConfig {
                rpc_url: config.polygon_rpc_url.clone(),
                private_key,
                known_proxy: config
                    .known_proxy_wallet
                    .as_deref()
                    .and_then(|p| p.parse().ok()),
            },
            Arc::clone(&queue),
            Arc::clone(&bus),
        ));

        let scanner = Arc::new(PositionScanner::new(
            PositionsClient::new(),
            Arc::clone(&queue),
            Arc::clone(&bus),
        ));

        let coordinator = Arc::new(Coordinator::new(
            CoordinatorConfig {
                asset: config.asset,
                scan_interval_secs: config.scan_interval_secs,
                max_entry_price: config.max_entry_price,
            },
            CoordinatorDeps {
                safety: Arc::clone(&safety),
                bus: Arc::clone(&bus),
                feed: feed_handle.clone(),
                discovery,
                fetcher,
                policy,
                spike_fast_path,
                executor,
                engine: Arc::clone(&engine),
            },
        ));

        let state = Arc::new(Self {
            coordinator,
            bus,
            safety,
            feed: feed_handle,
            engine,
            scanner,
            signer_address,
        });

        Ok((state, feed))
    }
}
