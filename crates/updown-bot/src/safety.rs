//! Safety ledger: daily caps, per-window dedup, kill switch, trade sizing.
//!
//! Single-writer in-memory state. Every public operation runs the daily
//! reset first so `can_trade -> trade_size -> record_trade -> mark_traded`
//! all observe the same reset boundary within a tick.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use updown_common::{window_key, Confidence};

use crate::activity::{ActivityBus, ActivityKind};

/// Why a trade was allowed or denied.
#[derive(Debug, Clone, Serialize)]
pub struct TradeGate {
    pub allowed: bool,
    pub reason: String,
}

/// Serializable view of the ledger for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SafetySnapshot {
    pub kill_switch: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub daily_loss: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub daily_spent: Decimal,
    pub daily_trades: u32,
    pub daily_wins: u32,
    pub daily_losses: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub daily_loss_limit: Decimal,
    pub max_daily_losses: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_trade_size: Decimal,
    pub traded_windows: usize,
}

/// Configuration caps; see `BotConfig` for the environment mapping.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Size of a HIGH-confidence trade; MEDIUM gets half.
    pub max_trade_size: Decimal,
    /// Cumulative daily loss cap in dollars.
    pub daily_loss_limit: Decimal,
    /// Cap on losing trades per local calendar day.
    pub max_daily_losses: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_trade_size: Decimal::new(10, 0),
            daily_loss_limit: Decimal::new(50, 0),
            max_daily_losses: 6,
        }
    }
}

struct Counters {
    kill_switch: bool,
    daily_loss: Decimal,
    daily_spent: Decimal,
    daily_trades: u32,
    daily_wins: u32,
    daily_losses: u32,
    last_reset_date: NaiveDate,
    traded_windows: HashSet<(String, String)>,
}

impl Counters {
    fn fresh(date: NaiveDate) -> Self {
        Self {
            kill_switch: false,
            daily_loss: Decimal::ZERO,
            daily_spent: Decimal::ZERO,
            daily_trades: 0,
            daily_wins: 0,
            daily_losses: 0,
            last_reset_date: date,
            traded_windows: HashSet::new(),
        }
    }
}

/// The process-wide safety ledger.
pub struct SafetyLedger {
    config: SafetyConfig,
    counters: Mutex<Counters>,
    bus: Arc<ActivityBus>,
}

impl SafetyLedger {
    pub fn new(config: SafetyConfig, bus: Arc<ActivityBus>) -> Self {
        Self {
            config,
            counters: Mutex::new(Counters::fresh(Local::now().date_naive())),
            bus,
        }
    }

    /// Counters reset when the local calendar day changes; the kill switch
    /// survives the reset.
    fn reset_daily_if_needed(&self, counters: &mut Counters) {
        let today = Local::now().date_naive();
        if counters.last_reset_date != today {
            info!(date = %today, "Daily safety counters reset");
            let kill_switch = counters.kill_switch;
            *counters = Counters::fresh(today);
            counters.kill_switch = kill_switch;
            self.bus.record(ActivityKind::Safety, "Daily counters reset", None);
        }
    }

    /// Whether the agent may trade right now, with the blocking reason.
    pub fn can_trade(&self) -> TradeGate {
        let mut counters = self.counters.lock();
        self.reset_daily_if_needed(&mut counters);

        if counters.kill_switch {
            return TradeGate {
                allowed: false,
                reason: "kill switch engaged".to_string(),
            };
        }
        if counters.daily_loss >= self.config.daily_loss_limit {
            return TradeGate {
                allowed: false,
                reason: format!(
                    "daily loss limit reached ({} >= {})",
                    counters.daily_loss, self.config.daily_loss_limit
                ),
            };
        }
        if counters.daily_losses >= self.config.max_daily_losses {
            return TradeGate {
                allowed: false,
                reason: format!(
                    "max daily losses reached ({} >= {})",
                    counters.daily_losses, self.config.max_daily_losses
                ),
            };
        }

        TradeGate {
            allowed: true,
            reason: "ok".to_string(),
        }
    }

    /// Dollar size for a trade at the given confidence, clamped to the
    /// remaining daily loss budget.
    pub fn trade_size(&self, confidence: Confidence) -> Decimal {
        let mut counters = self.counters.lock();
        self.reset_daily_if_needed(&mut counters);

        let raw = match confidence {
            Confidence::High => self.config.max_trade_size,
            Confidence::Medium => self.config.max_trade_size / Decimal::TWO,
            Confidence::Low => Decimal::ZERO,
        };

        let remaining = (self.config.daily_loss_limit - counters.daily_loss).max(Decimal::ZERO);
        raw.min(remaining)
    }

    /// Whether a trade was already recorded for this (asset, window).
    pub fn has_traded(&self, asset: &str, window: &str) -> bool {
        let mut counters = self.counters.lock();
        self.reset_daily_if_needed(&mut counters);
        counters
            .traded_windows
            .contains(&(asset.to_string(), window.to_string()))
    }

    /// Marks a window traded; idempotent.
    pub fn mark_traded(&self, asset: &str, window: &str) {
        let mut counters = self.counters.lock();
        self.reset_daily_if_needed(&mut counters);
        let inserted = counters
            .traded_windows
            .insert((asset.to_string(), window.to_string()));
        if inserted {
            self.bus.record(
                ActivityKind::Safety,
                format!("Window {} marked traded for {}", window, asset),
                None,
            );
        }
    }

    /// Convenience: window key for a market end time.
    pub fn window_key_for(&self, end_time: DateTime<Utc>) -> String {
        window_key(end_time)
    }

    /// Records dollars committed to a new trade.
    pub fn record_trade(&self, dollars: Decimal) {
        let mut counters = self.counters.lock();
        self.reset_daily_if_needed(&mut counters);
        counters.daily_trades += 1;
        counters.daily_spent += dollars;
        self.bus.record(
            ActivityKind::Safety,
            format!("Trade recorded: ${}", dollars),
            Some(json!({ "daily_trades": counters.daily_trades })),
        );
    }

    pub fn record_win(&self, dollars: Decimal) {
        let mut counters = self.counters.lock();
        self.reset_daily_if_needed(&mut counters);
        counters.daily_wins += 1;
        self.bus.record(
            ActivityKind::Safety,
            format!("Win recorded: ${}", dollars),
            None,
        );
    }

    pub fn record_loss(&self, dollars: Decimal) {
        let mut counters = self.counters.lock();
        self.reset_daily_if_needed(&mut counters);
        counters.daily_losses += 1;
        counters.daily_loss += dollars;
        self.bus.record(
            ActivityKind::Safety,
            format!("Loss recorded: ${}", dollars),
            Some(json!({
                "daily_losses": counters.daily_losses,
                "daily_loss": counters.daily_loss.to_string(),
            })),
        );
    }

    /// Flips the kill switch; returns the new state.
    pub fn toggle_kill_switch(&self) -> bool {
        let mut counters = self.counters.lock();
        counters.kill_switch = !counters.kill_switch;
        let state = counters.kill_switch;
        self.bus.record(
            ActivityKind::Safety,
            if state { "Kill switch ON" } else { "Kill switch OFF" },
            None,
        );
        state
    }

    pub fn set_kill_switch(&self, on: bool) {
        let mut counters = self.counters.lock();
        if counters.kill_switch != on {
            counters.kill_switch = on;
            self.bus.record(
                ActivityKind::Safety,
                if on { "Kill switch ON" } else { "Kill switch OFF" },
                None,
            );
        }
    }

    pub fn kill_switch(&self) -> bool {
        self.counters.lock().kill_switch
    }

    pub fn snapshot(&self) -> SafetySnapshot {
        let mut counters = self.counters.lock();
        self.reset_daily_if_needed(&mut counters);
        SafetySnapshot {
            kill_switch: counters.kill_switch,
            daily_loss: counters.daily_loss,
            daily_spent: counters.daily_spent,
            daily_trades: counters.daily_trades,
            daily_wins: counters.daily_wins,
            daily_losses: counters.daily_losses,
            daily_loss_limit: self.config.daily_loss_limit,
            max_daily_losses: self.config.max_daily_losses,
            max_trade_size: self.config.max_trade_size,
            traded_windows: counters.traded_windows.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger() -> SafetyLedger {
        SafetyLedger::new(
            SafetyConfig {
                max_trade_size: dec!(10),
                daily_loss_limit: dec!(50),
                max_daily_losses: 6,
            },
            Arc::new(ActivityBus::new()),
        )
    }

    #[test]
    fn test_can_trade_initially() {
        let l = ledger();
        assert!(l.can_trade().allowed);
    }

    #[test]
    fn test_kill_switch_blocks() {
        let l = ledger();
        assert!(l.toggle_kill_switch());
        let gate = l.can_trade();
        assert!(!gate.allowed);
        assert!(gate.reason.contains("kill switch"));
        assert!(!l.toggle_kill_switch());
        assert!(l.can_trade().allowed);
    }

    #[test]
    fn test_loss_count_cap() {
        let l = ledger();
        for _ in 0..6 {
            l.record_loss(dec!(1));
        }
        let gate = l.can_trade();
        assert!(!gate.allowed);
        assert!(gate.reason.contains("max daily losses"));
    }

    #[test]
    fn test_loss_dollar_cap() {
        let l = ledger();
        l.record_loss(dec!(25));
        assert!(l.can_trade().allowed);
        l.record_loss(dec!(25));
        let gate = l.can_trade();
        assert!(!gate.allowed);
        assert!(gate.reason.contains("daily loss limit"));
    }

    #[test]
    fn test_trade_size_by_confidence() {
        let l = ledger();
        assert_eq!(l.trade_size(Confidence::High), dec!(10));
        assert_eq!(l.trade_size(Confidence::Medium), dec!(5));
        assert_eq!(l.trade_size(Confidence::Low), dec!(0));
    }

    #[test]
    fn test_trade_size_clamped_to_remaining_budget() {
        let l = ledger();
        l.record_loss(dec!(44));
        // Remaining budget is $6, below the $10 HIGH size.
        assert_eq!(l.trade_size(Confidence::High), dec!(6));
        l.record_loss(dec!(6));
        assert_eq!(l.trade_size(Confidence::High), dec!(0));
    }

    #[test]
    fn test_mark_traded_idempotent() {
        let l = ledger();
        assert!(!l.has_traded("BTC", "20260307_1445"));
        l.mark_traded("BTC", "20260307_1445");
        assert!(l.has_traded("BTC", "20260307_1445"));
        l.mark_traded("BTC", "20260307_1445");
        assert!(l.has_traded("BTC", "20260307_1445"));
        assert_eq!(l.snapshot().traded_windows, 1);
    }

    #[test]
    fn test_windows_are_per_asset() {
        let l = ledger();
        l.mark_traded("BTC", "20260307_1445");
        assert!(!l.has_traded("ETH", "20260307_1445"));
    }

    #[test]
    fn test_snapshot_counters() {
        let l = ledger();
        l.record_trade(dec!(10));
        l.record_win(dec!(8));
        l.record_loss(dec!(10));

        let snap = l.snapshot();
        assert_eq!(snap.daily_trades, 1);
        assert_eq!(snap.daily_wins, 1);
        assert_eq!(snap.daily_losses, 1);
        assert_eq!(snap.daily_spent, dec!(10));
        assert_eq!(snap.daily_loss, dec!(10));
    }

    #[test]
    fn test_safety_events_reach_bus() {
        let bus = Arc::new(ActivityBus::new());
        let l = SafetyLedger::new(SafetyConfig::default(), Arc::clone(&bus));
        l.record_loss(dec!(5));
        l.toggle_kill_switch();

        let activities = bus.activities(10);
        assert!(activities.iter().any(|a| a.message.contains("Loss recorded")));
        assert!(activities.iter().any(|a| a.message.contains("Kill switch ON")));
    }
}
