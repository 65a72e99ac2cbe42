//! Pending-redemption queue.
//!
//! Append-only list of positions awaiting on-chain resolution. Uniqueness
//! is by condition id (token id when no condition id is known); terminal
//! entries move into a bounded history ring kept for the dashboard.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Terminal history entries retained for the UI.
const HISTORY_CAPACITY: usize = 20;

/// Resolution wait: candidates become eligible this long after market end.
const RESOLUTION_GRACE_SECS: i64 = 120;

/// Lifecycle of a pending redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Waiting,
    Redeeming,
    Redeemed,
    NoPayout,
    Error,
}

impl RedemptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RedemptionStatus::Redeemed | RedemptionStatus::NoPayout | RedemptionStatus::Error
        )
    }
}

/// What gets enqueued after a fill or a position scan.
#[derive(Debug, Clone)]
pub struct PendingCandidate {
    pub condition_id: String,
    pub token_id: Option<String>,
    pub neg_risk: bool,
    pub market_end_time: DateTime<Utc>,
}

/// One tracked redemption.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRedemption {
    pub condition_id: String,
    pub token_id: Option<String>,
    pub neg_risk: bool,
    pub market_end_time: DateTime<Utc>,
    pub added_at: DateTime<Utc>,
    pub status: RedemptionStatus,
    pub tx_hash: Option<String>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PendingRedemption {
    /// Primary key: condition id, falling back to token id.
    pub fn key(&self) -> &str {
        if !self.condition_id.is_empty() {
            &self.condition_id
        } else {
            self.token_id.as_deref().unwrap_or("")
        }
    }
}

/// Running totals for the redemptions endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RedemptionTotals {
    pub total_redeemed: u32,
    pub total_lost: u32,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingRedemption>,
    history: VecDeque<PendingRedemption>,
    totals: RedemptionTotals,
}

/// Process-wide single-writer queue.
#[derive(Default)]
pub struct RedemptionQueue {
    state: RwLock<QueueState>,
}

impl RedemptionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a candidate; a duplicate key (in pending) is a no-op.
    /// Returns whether an entry was added.
    pub fn enqueue(&self, candidate: PendingCandidate) -> bool {
        let entry = PendingRedemption {
            condition_id: candidate.condition_id,
            token_id: candidate.token_id,
            neg_risk: candidate.neg_risk,
            market_end_time: candidate.market_end_time,
            added_at: Utc::now(),
            status: RedemptionStatus::Waiting,
            tx_hash: None,
            redeemed_at: None,
            error: None,
        };

        if entry.key().is_empty() {
            return false;
        }

        let mut state = self.state.write();
        let duplicate = state.pending.iter().any(|p| {
            p.key() == entry.key()
                || (entry.token_id.is_some() && p.token_id == entry.token_id)
        });
        if duplicate {
            return false;
        }

        state.pending.push(entry);
        true
    }

    /// Waiting entries whose market ended at least the grace period ago.
    pub fn candidates(&self, now: DateTime<Utc>) -> Vec<PendingRedemption> {
        let cutoff = chrono::Duration::seconds(RESOLUTION_GRACE_SECS);
        self.state
            .read()
            .pending
            .iter()
            .filter(|p| p.status == RedemptionStatus::Waiting && now - p.market_end_time >= cutoff)
            .cloned()
            .collect()
    }

    pub fn mark_redeeming(&self, key: &str) {
        let mut state = self.state.write();
        if let Some(entry) = state.pending.iter_mut().find(|p| p.key() == key) {
            entry.status = RedemptionStatus::Redeeming;
        }
    }

    /// Moves an entry to a terminal status and into history.
    pub fn finish(
        &self,
        key: &str,
        status: RedemptionStatus,
        tx_hash: Option<String>,
        error: Option<String>,
    ) {
        debug_assert!(status.is_terminal());

        let mut state = self.state.write();
        let index = match state.pending.iter().position(|p| p.key() == key) {
            Some(i) => i,
            None => return,
        };

        let mut entry = state.pending.remove(index);
        entry.status = status;
        entry.tx_hash = tx_hash;
        entry.error = error;
        entry.redeemed_at = Some(Utc::now());

        match status {
            RedemptionStatus::Redeemed => state.totals.total_redeemed += 1,
            RedemptionStatus::NoPayout => state.totals.total_lost += 1,
            _ => {}
        }

        state.history.push_front(entry);
        state.history.truncate(HISTORY_CAPACITY);
    }

    pub fn pending(&self) -> Vec<PendingRedemption> {
        self.state.read().pending.clone()
    }

    pub fn history(&self) -> Vec<PendingRedemption> {
        self.state.read().history.iter().cloned().collect()
    }

    pub fn totals(&self) -> RedemptionTotals {
        self.state.read().totals
    }

    pub fn pending_len(&self) -> usize {
        self.state.read().pending.len()
    }
}
