//! Startup position discovery.
//!
//! Queries the off-chain positions index for both the signer and its proxy
//! wallet, then enqueues anything redeemable so positions that predate this
//! process still get swept by the redemption engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use updown_market::{IndexedPosition, PositionsClient};

use crate::activity::{ActivityBus, ActivityKind};
use crate::redemption::{PendingCandidate, RedemptionQueue};

/// Synthetic market-end offset so the next redemption tick picks scans up.
const SYNTHETIC_END_OFFSET_MINS: i64 = 10;

/// Result of the last scan, kept for `GET /api/positions`.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scanned_at: DateTime<Utc>,
    pub addresses: Vec<String>,
    pub total_positions: usize,
    pub enqueued: usize,
    pub lost: usize,
    pub skipped: usize,
}

/// One-shot (plus manual re-trigger) scanner over the positions index.
pub struct PositionScanner {
    client: PositionsClient,
    queue: Arc<RedemptionQueue>,
    bus: Arc<ActivityBus>,
    has_scanned: AtomicBool,
    last_result: RwLock<Option<ScanSummary>>,
}

impl PositionScanner {
    pub fn new(client: PositionsClient, queue: Arc<RedemptionQueue>, bus: Arc<ActivityBus>) -> Self {
        Self {
            client,
            queue,
            bus,
            has_scanned: AtomicBool::new(false),
            last_result: RwLock::new(None),
        }
    }

    /// Startup entry point; subsequent calls are no-ops.
    pub async fn scan_once(&self, signer: &str, proxy: Option<&str>) {
        if self.has_scanned.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scan(signer, proxy).await;
    }

    /// Full scan; the manual trigger calls this directly.
    pub async fn scan(&self, signer: &str, proxy: Option<&str>) -> ScanSummary {
        let mut addresses = vec![signer.to_string()];
        if let Some(p) = proxy {
            if !p.is_empty() && !p.eq_ignore_ascii_case(signer) {
                addresses.push(p.to_string());
            }
        }

        let mut merged: Vec<IndexedPosition> = Vec::new();
        for address in &addresses {
            merged.extend(self.client.positions_for(address).await);
        }

        let mut summary = ScanSummary {
            scanned_at: Utc::now(),
            addresses,
            total_positions: merged.len(),
            enqueued: 0,
            lost: 0,
            skipped: 0,
        };

        for position in merged {
            match classify(&position) {
                PositionClass::Lost => summary.lost += 1,
                PositionClass::Skip => summary.skipped += 1,
                PositionClass::Enqueue => {
                    let added = self.queue.enqueue(PendingCandidate {
                        condition_id: position.condition_id.clone().unwrap_or_default(),
                        token_id: position.asset.clone(),
                        neg_risk: position.negative_risk.unwrap_or(false),
                        market_end_time: Utc::now()
                            - chrono::Duration::minutes(SYNTHETIC_END_OFFSET_MINS),
                    });
                    if added {
                        summary.enqueued += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
            }
        }

        info!(
            total = summary.total_positions,
            enqueued = summary.enqueued,
            lost = summary.lost,
            "Position scan complete"
        );
        self.bus.record(
            ActivityKind::Scan,
            format!(
                "Position scan: {} found, {} enqueued, {} lost",
                summary.total_positions, summary.enqueued, summary.lost
            ),
            None,
        );

        *self.last_result.write() = Some(summary.clone());
        summary
    }

    pub fn last_result(&self) -> Option<ScanSummary> {
        self.last_result.read().clone()
    }
}

enum PositionClass {
    Enqueue,
    Lost,
    Skip,
}

/// Queue candidates hold size and are priced at an extreme or flagged
/// redeemable; zero-priced positions are lost and not worth a transaction.
fn classify(position: &IndexedPosition) -> PositionClass {
    if position.size_or_zero() <= Decimal::ZERO {
        return PositionClass::Skip;
    }
    if position.condition_id.is_none() && position.asset.is_none() {
        return PositionClass::Skip;
    }

    let cur_price = position.cur_price;
    if cur_price == Some(Decimal::ZERO) {
        return PositionClass::Lost;
    }
    if cur_price == Some(Decimal::ONE) || position.redeemable == Some(true) {
        return PositionClass::Enqueue;
    }
    PositionClass::Skip
}
