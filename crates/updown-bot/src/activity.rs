//! In-memory activity bus and ring buffers.
//!
//! Three bounded newest-first logs (activities, decisions, trades) back the
//! dashboard read models. Nothing here persists; the rings exist so the UI
//! and the stats endpoint can show recent history without a database.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use updown_common::{Decision, TradeRecord, TradeResult};

/// Maximum entries kept per ring.
const RING_CAPACITY: usize = 500;

/// Category tag on an activity entry, used by the UI for badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Info,
    Scan,
    Decision,
    Trade,
    SafetyBlock,
    Safety,
    Redemption,
    Error,
}

/// One line in the activity feed.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: String,
    pub at: DateTime<Utc>,
    pub kind: ActivityKind,
    pub message: String,
    /// Optional structured context (token ids, tx hashes, ...).
    pub detail: Option<serde_json::Value>,
}

/// A recorded decision with its timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEntry {
    pub id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub decision: Decision,
}

/// Aggregate win/loss view for `GET /api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub pending: usize,
    pub wins: usize,
    pub losses: usize,
    pub failed: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    /// Wins minus losses in dollars, counting a win as size and a loss as -size.
    #[serde(with = "rust_decimal::serde::str")]
    pub net: Decimal,
}

#[derive(Default)]
struct Rings {
    activities: VecDeque<ActivityEntry>,
    decisions: VecDeque<DecisionEntry>,
    trades: VecDeque<TradeRecord>,
}

/// Single-writer activity bus; readers get cloned snapshots.
#[derive(Default)]
pub struct ActivityBus {
    rings: RwLock<Rings>,
}

impl ActivityBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an activity, assigning id and timestamp. Returns the entry.
    pub fn record(
        &self,
        kind: ActivityKind,
        message: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) -> ActivityEntry {
        let entry = ActivityEntry {
            id: Uuid::new_v4().to_string(),
            at: Utc::now(),
            kind,
            message: message.into(),
            detail,
        };

        let mut rings = self.rings.write();
        rings.activities.push_front(entry.clone());
        rings.activities.truncate(RING_CAPACITY);
        entry
    }

    /// Appends a decision to its ring.
    pub fn push_decision(&self, decision: Decision) -> DecisionEntry {
        let entry = DecisionEntry {
            id: Uuid::new_v4().to_string(),
            at: Utc::now(),
            decision,
        };

        let mut rings = self.rings.write();
        rings.decisions.push_front(entry.clone());
        rings.decisions.truncate(RING_CAPACITY);
        entry
    }

    /// Appends a trade to its ring.
    pub fn push_trade(&self, trade: TradeRecord) {
        let mut rings = self.rings.write();
        rings.trades.push_front(trade);
        rings.trades.truncate(RING_CAPACITY);
    }

    /// Patches a trade in place; used only for result reconciliation.
    pub fn update_trade(&self, id: &str, result: TradeResult) -> bool {
        let mut rings = self.rings.write();
        match rings.trades.iter_mut().find(|t| t.id == id) {
            Some(trade) => {
                trade.result = result;
                true
            }
            None => false,
        }
    }

    /// Most recent `limit` activities, newest first.
    pub fn activities(&self, limit: usize) -> Vec<ActivityEntry> {
        self.rings.read().activities.iter().take(limit).cloned().collect()
    }

    pub fn decisions(&self, limit: usize) -> Vec<DecisionEntry> {
        self.rings.read().decisions.iter().take(limit).cloned().collect()
    }

    pub fn trades(&self, limit: usize) -> Vec<TradeRecord> {
        self.rings.read().trades.iter().take(limit).cloned().collect()
    }

    /// Win/loss aggregation over the trade ring.
    pub fn stats(&self) -> TradeStats {
        let rings = self.rings.read();
        let mut stats = TradeStats {
            total_trades: rings.trades.len(),
            pending: 0,
            wins: 0,
            losses: 0,
            failed: 0,
            volume: Decimal::ZERO,
            net: Decimal::ZERO,
        };

        for trade in &rings.trades {
            match trade.result {
                TradeResult::Pending => stats.pending += 1,
                TradeResult::Win => {
                    stats.wins += 1;
                    stats.net += trade.size;
                }
                TradeResult::Loss => {
                    stats.losses += 1;
                    stats.net -= trade.size;
                }
                TradeResult::Failed => stats.failed += 1,
            }
            if trade.result != TradeResult::Failed {
                stats.volume += trade.size;
            }
        }

        stats
    }
}
