//! Deterministic spike detector.
//!
//! Looks for a reference-price move that is both large and fast inside one
//! of the short lookback windows. Direction of the move picks the side;
//! speed picks the confidence.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use updown_common::{Action, Confidence, Decision};
use updown_market::MarketSnapshot;

use crate::feed::PriceContext;
use crate::policy::DecisionPolicy;

/// Lookback windows inspected, seconds.
const SPIKE_WINDOWS: [i64; 3] = [60, 180, 300];

/// Thresholds for what counts as a spike.
#[derive(Debug, Clone)]
pub struct SpikeConfig {
    /// Minimum absolute move in dollars.
    pub threshold: Decimal,
    /// Minimum speed in dollars per minute.
    pub min_speed: Decimal,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            threshold: Decimal::from(30),
            min_speed: Decimal::from(15),
        }
    }
}

/// A detected spike; the window with the greatest speed wins.
#[derive(Debug, Clone, Serialize)]
pub struct Spike {
    pub window_secs: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub dollars: Decimal,
    /// Absolute dollars per minute.
    #[serde(with = "rust_decimal::serde::str")]
    pub speed: Decimal,
    pub rising: bool,
}

/// Strategy 1: deterministic spike detector.
pub struct SpikePolicy {
    config: SpikeConfig,
}

impl SpikePolicy {
    pub fn new(config: SpikeConfig) -> Self {
        Self { config }
    }

    /// Scans the lookback windows; `None` when nothing clears both bars.
    ///
    /// This is also the coordinator's fast path: it runs on feed context
    /// alone, before any market data is fetched.
    pub fn detect(&self, ctx: &PriceContext) -> Option<Spike> {
        if !ctx.available {
            return None;
        }

        let mut best: Option<Spike> = None;
        for window in SPIKE_WINDOWS {
            let change = match ctx.change(window) {
                Some(c) => c,
                None => continue,
            };

            let magnitude = change.dollars.abs();
            let minutes = Decimal::from(window) / Decimal::from(60);
            let speed = magnitude / minutes;

            if magnitude < self.config.threshold || speed < self.config.min_speed {
                continue;
            }

            let candidate = Spike {
                window_secs: window,
                dollars: change.dollars,
                speed,
                rising: change.dollars > Decimal::ZERO,
            };
            match &best {
                Some(b) if b.speed >= speed => {}
                _ => best = Some(candidate),
            }
        }
        best
    }

    /// Turns a detected spike into a decision.
    pub fn decision_for(&self, spike: &Spike) -> Decision {
        let action = if spike.rising { Action::BuyYes } else { Action::BuyNo };
        let confidence = if spike.speed >= Decimal::from(30) {
            Confidence::High
        } else {
            Confidence::Medium
        };

        Decision {
            action,
            confidence,
            pattern: if spike.rising { "spike_up" } else { "spike_down" }.to_string(),
            reasoning: format!(
                "{}${} in {}s ({}$/min)",
                if spike.rising { "+" } else { "" },
                spike.dollars,
                spike.window_secs,
                spike.speed.round_dp(1),
            ),
        }
        .normalized()
    }
}

#[async_trait]
impl DecisionPolicy for SpikePolicy {
    async fn decide(&self, _snapshot: &MarketSnapshot, ctx: &PriceContext) -> Decision {
        match self.detect(ctx) {
            Some(spike) => self.decision_for(&spike),
            None => Decision::skip("no_spike", "no window cleared the spike thresholds"),
        }
    }

    fn name(&self) -> &'static str {
        "spike"
    }
}
