//! Trade records produced by the order executor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::Action;
use crate::types::TradeSide;

/// Lifecycle of a placed trade.
///
/// `Pending` until the window resolves; win/loss is reconciled by the
/// caller that tracks market outcomes, not by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeResult {
    Pending,
    Win,
    Loss,
    Failed,
}

/// A single order placement, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub at: DateTime<Utc>,
    pub action: Action,
    pub side: TradeSide,
    pub token_id: String,
    pub condition_id: String,
    /// Notional size in dollars.
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    /// Entry price in [0, 1].
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub order_id: Option<String>,
    pub result: TradeResult,
    pub question: String,
    pub market_end_time: DateTime<Utc>,
    pub neg_risk: bool,
    /// Verbatim venue error when the order never went through.
    pub error: Option<String>,
}

impl TradeRecord {
    /// Fresh record with an assigned id and timestamp.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        action: Action,
        side: TradeSide,
        token_id: impl Into<String>,
        condition_id: impl Into<String>,
        size: Decimal,
        price: Decimal,
        question: impl Into<String>,
        market_end_time: DateTime<Utc>,
        neg_risk: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            at: Utc::now(),
            action,
            side,
            token_id: token_id.into(),
            condition_id: condition_id.into(),
            size,
            price,
            order_id: None,
            result: TradeResult::Pending,
            question: question.into(),
            market_end_time,
            neg_risk,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.result != TradeResult::Failed && self.order_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> TradeRecord {
        TradeRecord::new(
            Action::BuyYes,
            TradeSide::Yes,
            "123456",
            "0xabc",
            dec!(10),
            dec!(0.20),
            "BTC up or down?",
            Utc::now(),
            true,
        )
    }

    #[test]
    fn test_new_trade_is_pending() {
        let t = record();
        assert_eq!(t.result, TradeResult::Pending);
        assert!(t.order_id.is_none());
        assert!(!t.id.is_empty());
    }

    #[test]
    fn test_succeeded_requires_order_id() {
        let mut t = record();
        assert!(!t.succeeded());
        t.order_id = Some("A".to_string());
        assert!(t.succeeded());
        t.result = TradeResult::Failed;
        assert!(!t.succeeded());
    }

    #[test]
    fn test_result_serializes_lowercase() {
        let json = serde_json::to_string(&TradeResult::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
        let json = serde_json::to_string(&TradeResult::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }
}
