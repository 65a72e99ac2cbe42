//! Bot loop coordinator.
//!
//! One serial tick every `scan_interval`: safety gate, market discovery,
//! per-window dedup, snapshot, policy, entry gate, execution, and always a
//! redemption pass at the end. A tokio mutex prevents overlapping ticks
//! when a tick outlives the timer period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use updown_common::{window_key, Action, ReferenceAsset};
use updown_market::{MarketDataFetcher, MarketDiscovery, MarketSnapshot};

use crate::activity::{ActivityBus, ActivityKind};
use crate::executor::OrderExecutor;
use crate::feed::PriceFeedHandle;
use crate::policy::{DecisionPolicy, SpikePolicy};
use crate::redemption::{PendingCandidate, RedemptionEngine};
use crate::safety::SafetyLedger;

/// Coordinator knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub asset: ReferenceAsset,
    pub scan_interval_secs: u64,
    /// Entry gate: the chosen side's mid must not exceed this.
    pub max_entry_price: Decimal,
}

/// Everything the coordinator drives; injected so tests can substitute.
pub struct CoordinatorDeps {
    pub safety: Arc<SafetyLedger>,
    pub bus: Arc<ActivityBus>,
    pub feed: PriceFeedHandle,
    pub discovery: Arc<MarketDiscovery>,
    pub fetcher: Arc<MarketDataFetcher>,
    /// The strategy in use.
    pub policy: Arc<dyn DecisionPolicy>,
    /// When set, the deterministic fast path short-circuits quiet ticks.
    pub spike_fast_path: Option<SpikePolicy>,
    pub executor: Arc<OrderExecutor>,
    pub engine: Arc<RedemptionEngine>,
}

/// Status view for `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub is_running: bool,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub last_spike_status: Option<String>,
    pub strategy: String,
}

/// Ties the subsystems together on a periodic cadence.
pub struct Coordinator {
    config: CoordinatorConfig,
    deps: CoordinatorDeps,
    is_running: AtomicBool,
    tick_lock: tokio::sync::Mutex<()>,
    last_scan: RwLock<Option<DateTime<Utc>>>,
    last_spike_status: RwLock<Option<String>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, deps: CoordinatorDeps) -> Self {
        Self {
            config,
            deps,
            is_running: AtomicBool::new(false),
            tick_lock: tokio::sync::Mutex::new(()),
            last_scan: RwLock::new(None),
            last_spike_status: RwLock::new(None),
        }
    }

    pub fn start(&self) {
        if !self.is_running.swap(true, Ordering::AcqRel) {
            info!("Bot started");
            self.deps.bus.record(ActivityKind::Info, "Bot started", None);
        }
    }

    pub fn stop(&self) {
        if self.is_running.swap(false, Ordering::AcqRel) {
            info!("Bot stopped");
            self.deps.bus.record(ActivityKind::Info, "Bot stopped", None);
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            is_running: self.is_running(),
            last_scan_time: *self.last_scan.read(),
            last_spike_status: self.last_spike_status.read().clone(),
            strategy: self.deps.policy.name().to_string(),
        }
    }

    /// The periodic loop; runs until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = std::time::Duration::from_secs(self.config.scan_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_running() {
                        self.tick().await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Coordinator: shutdown signal received");
                    return;
                }
            }
        }
    }

    /// One full scan cycle. The manual scan-now trigger calls this directly,
    /// so the running flag is checked by `run`, not here.
    pub async fn tick(&self) {
        // Overlapping ticks short-circuit rather than queue.
        let _guard = match self.tick_lock.try_lock() {
            Ok(g) => g,
            Err(_) => {
                debug!("Previous tick still running, skipping");
                return;
            }
        };

        *self.last_scan.write() = Some(Utc::now());
        self.trade_phase().await;
        self.deps.engine.check_and_redeem().await;
    }

    async fn trade_phase(&self) {
        let gate = self.deps.safety.can_trade();
        if !gate.allowed {
            self.deps.bus.record(
                ActivityKind::SafetyBlock,
                format!("Trading blocked: {}", gate.reason),
                None,
            );
            return;
        }

        let ctx = self.deps.feed.context();

        // Deterministic fast path: a quiet feed ends the tick before any
        // HTTP leaves the process.
        let spike_decision = match &self.deps.spike_fast_path {
            Some(spike_policy) => match spike_policy.detect(&ctx) {
                Some(spike) => {
                    let status = format!(
                        "spike: ${} in {}s ({}$/min)",
                        spike.dollars, spike.window_secs, spike.speed.round_dp(1)
                    );
                    *self.last_spike_status.write() = Some(status);
                    Some(spike_policy.decision_for(&spike))
                }
                None => {
                    *self.last_spike_status.write() = Some("no spike".to_string());
                    return;
                }
            },
            None => None,
        };

        let now = Utc::now();
        let market = match self.deps.discovery.scan(self.config.asset, now).await {
            Some(m) => m,
            None => {
                debug!("No active market in window");
                return;
            }
        };

        let window = window_key(market.end_time);
        let asset = self.config.asset.as_str();
        if self.deps.safety.has_traded(asset, &window) {
            debug!(window = %window, "Window already traded");
            return;
        }

        let snapshot = self.deps.fetcher.fetch_full(&market).await;
        if !snapshot.has_mid() {
            warn!(slug = %market.slug, "Snapshot has no usable mid, skipping");
            return;
        }

        let decision = match spike_decision {
            Some(d) => d,
            None => self.deps.policy.decide(&snapshot, &ctx).await,
        };
        self.deps.bus.push_decision(decision.clone());

        if decision.action.is_skip() {
            debug!(reason = %decision.reasoning, "Policy skipped");
            return;
        }

        // Entry gate: a side already priced near certainty has no edge left.
        let side_mid = match decision.action {
            Action::BuyYes => snapshot.up.price.mid,
            Action::BuyNo => snapshot.down.price.mid,
            Action::Skip => None,
        };
        if let Some(mid) = side_mid {
            if mid > self.config.max_entry_price {
                self.deps.bus.record(
                    ActivityKind::Decision,
                    format!("Skipping {}: priced in (mid {} > {})", decision.action, mid, self.config.max_entry_price),
                    None,
                );
                return;
            }
        }

        // The gate may have flipped while we were fetching.
        let gate = self.deps.safety.can_trade();
        if !gate.allowed {
            self.deps.bus.record(
                ActivityKind::SafetyBlock,
                format!("Trading blocked at execution: {}", gate.reason),
                None,
            );
            return;
        }

        let size = self.deps.safety.trade_size(decision.confidence);
        if size <= Decimal::ZERO {
            debug!("Zero trade size, skipping");
            return;
        }

        let trade = self.deps.executor.execute(&decision, &snapshot, size).await;
        let succeeded = trade.succeeded();
        self.deps.bus.push_trade(trade.clone());

        if succeeded {
            self.deps.safety.record_trade(size);
            self.deps.safety.mark_traded(asset, &window);
            self.enqueue_redemption(&snapshot, &trade.token_id);
            self.deps.bus.record(
                ActivityKind::Trade,
                format!("Trade placed: {} {} ${} @ {}", decision.action, asset, size, trade.price),
                Some(json!({ "trade_id": trade.id, "window": window })),
            );
        }
    }

    fn enqueue_redemption(&self, snapshot: &MarketSnapshot, token_id: &str) {
        let market = &snapshot.market;
        self.deps.engine.queue().enqueue(PendingCandidate {
            condition_id: market.condition_id.clone(),
            token_id: if token_id.is_empty() {
                None
            } else {
                Some(token_id.to_string())
            },
            neg_risk: market.neg_risk,
            market_end_time: market.end_time,
        });
    }
}
