//! Order executor.
//!
//! Turns a non-skip decision into one CLOB order. The executor never
//! errors: exhausted retries produce a `Failed` trade record carrying the
//! venue's last message verbatim, and the coordinator decides what to do
//! with it.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use updown_common::{Action, Decision, TradeRecord, TradeResult, TradeSide};
use updown_market::{MarketSnapshot, OrderArgs, OrderError, OrderGateway};

use crate::activity::{ActivityBus, ActivityKind};

/// Fee-rate ceiling sent on neg-risk spike entries.
const SPIKE_FEE_RATE_BPS: u32 = 1000;

/// Explicit retry behavior; no open-coded loops elsewhere.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Soft rejects back off `soft_backoff * attempt`.
    pub soft_backoff: Duration,
    /// Hard errors (geoblock class) back off `hard_backoff * attempt`.
    pub hard_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            soft_backoff: Duration::from_secs(3),
            hard_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Single-shot policy used by the spike path, which would rather miss
    /// the window than fight the venue for it.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    fn backoff_for(&self, error: &OrderError, attempt: u32) -> Duration {
        let base = if error.is_hard() {
            self.hard_backoff
        } else {
            self.soft_backoff
        };
        base * attempt
    }
}

/// Places orders through the injected gateway.
pub struct OrderExecutor {
    gateway: Arc<dyn OrderGateway>,
    retry: RetryPolicy,
    bus: Arc<ActivityBus>,
    /// Spike entries raise the fee-rate ceiling on neg-risk markets.
    spike_mode: bool,
}

impl OrderExecutor {
    pub fn new(gateway: Arc<dyn OrderGateway>, retry: RetryPolicy, bus: Arc<ActivityBus>) -> Self {
        Self {
            gateway,
            retry,
            bus,
            spike_mode: false,
        }
    }

    #[must_use]
    pub fn with_spike_mode(mut self, enabled: bool) -> Self {
        self.spike_mode = enabled;
        self
    }

    /// Executes a buy for the decision's side. Never errors.
    pub async fn execute(
        &self,
        decision: &Decision,
        snapshot: &MarketSnapshot,
        size_dollars: Decimal,
    ) -> TradeRecord {
        let market = &snapshot.market;

        let (side, token_snapshot, token) = match decision.action {
            Action::BuyYes => (TradeSide::Yes, &snapshot.up, market.up_token()),
            Action::BuyNo => (TradeSide::No, &snapshot.down, market.down_token()),
            Action::Skip => {
                // The coordinator filters skips; treat a stray one as failed.
                let mut record = TradeRecord::new(
                    decision.action,
                    TradeSide::Yes,
                    "",
                    market.condition_id.clone(),
                    size_dollars,
                    Decimal::ZERO,
                    market.question.clone(),
                    market.end_time,
                    market.neg_risk,
                );
                record.result = TradeResult::Failed;
                record.error = Some("executor called with SKIP".to_string());
                return record;
            }
        };

        let token_id = token.map(|t| t.token_id.clone()).unwrap_or_default();

        let price = token_snapshot
            .price
            .buy
            .or(token_snapshot.price.mid)
            .unwrap_or_else(|| Decimal::new(5, 1));
        let price = round_to_tick(price, market.tick_size);

        let shares = floor2(size_dollars / price);

        let mut record = TradeRecord::new(
            decision.action,
            side,
            token_id.clone(),
            market.condition_id.clone(),
            size_dollars,
            price,
            market.question.clone(),
            market.end_time,
            market.neg_risk,
        );

        if token_id.is_empty() || shares <= Decimal::ZERO {
            record.result = TradeResult::Failed;
            record.error = Some("no token or zero size".to_string());
            return record;
        }

        let mut args = OrderArgs::gtc(token_id, price, shares, side, market.neg_risk);
        if self.spike_mode && market.neg_risk {
            args = args.with_fee_rate(SPIKE_FEE_RATE_BPS);
        }

        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            match self.gateway.post_order(&args).await {
                Ok(ack) => {
                    info!(order_id = %ack.order_id, side = %side, price = %price, shares = %shares, "Order placed");
                    self.bus.record(
                        ActivityKind::Trade,
                        format!("Order {} placed: {} {} @ {}", ack.order_id, side, shares, price),
                        Some(json!({ "order_id": ack.order_id, "attempt": attempt })),
                    );
                    record.order_id = Some(ack.order_id);
                    return record;
                }
                Err(e) => {
                    // Preserved verbatim for the activity log.
                    last_error = if e.is_hard() {
                        format!("rate-limited: {}", e)
                    } else {
                        e.to_string()
                    };
                    warn!(attempt, error = %last_error, "Order attempt failed");

                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.backoff_for(&e, attempt)).await;
                    }
                }
            }
        }

        self.bus.record(
            ActivityKind::Error,
            format!("Order failed after {} attempts: {}", self.retry.max_attempts, last_error),
            None,
        );
        record.result = TradeResult::Failed;
        record.error = Some(last_error);
        record
    }
}

/// Rounds a price onto the venue's tick grid.
fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() {
        return price;
    }
    let ticks = (price / tick)
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
    (ticks * tick).normalize()
}

/// Floors to two decimal places; share counts never round up.
fn floor2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use updown_common::{Confidence, OutcomeSide};
    use updown_market::{MarketRecord, OrderAck, TokenPrice, TokenRecord, TokenSnapshot};

    /// Scripted gateway: pops one response per call and counts calls.
    struct FakeGateway {
        responses: Mutex<Vec<Result<OrderAck, OrderError>>>,
        calls: Mutex<u32>,
    }

    impl FakeGateway {
        fn new(mut responses: Vec<Result<OrderAck, OrderError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            })
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl OrderGateway for FakeGateway {
        async fn post_order(&self, _args: &OrderArgs) -> Result<OrderAck, OrderError> {
            *self.calls.lock() += 1;
            self.responses
                .lock()
                .pop()
                .unwrap_or(Err(OrderError::Rejected("exhausted".to_string())))
        }
    }

    fn snapshot(buy: Option<Decimal>, mid: Option<Decimal>) -> MarketSnapshot {
        let market = MarketRecord {
            condition_id: "0xabc".to_string(),
            question: "BTC up or down?".to_string(),
            slug: "btc-updown-15m-0".to_string(),
            end_time: chrono::Utc::now() + chrono::Duration::minutes(10),
            tokens: vec![
                TokenRecord { token_id: "111".to_string(), outcome: OutcomeSide::Up },
                TokenRecord { token_id: "222".to_string(), outcome: OutcomeSide::Down },
            ],
            neg_risk: true,
            tick_size: dec!(0.01),
        };
        MarketSnapshot {
            market,
            up: TokenSnapshot {
                price: TokenPrice { buy, sell: None, mid },
                book: None,
            },
            down: TokenSnapshot::default(),
            price_history: Vec::new(),
            spread: None,
        }
    }

    fn decision(action: Action) -> Decision {
        Decision {
            action,
            confidence: Confidence::High,
            pattern: "test".to_string(),
            reasoning: "test".to_string(),
        }
    }

    fn executor(gateway: Arc<FakeGateway>) -> OrderExecutor {
        OrderExecutor::new(gateway, RetryPolicy::default(), Arc::new(ActivityBus::new()))
    }

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(0.2049), dec!(0.01)), dec!(0.20));
        assert_eq!(round_to_tick(dec!(0.205), dec!(0.01)), dec!(0.21));
        assert_eq!(round_to_tick(dec!(0.2049), Decimal::ZERO), dec!(0.2049));
    }

    #[test]
    fn test_floor2() {
        assert_eq!(floor2(dec!(49.999)), dec!(49.99));
        assert_eq!(floor2(dec!(50)), dec!(50));
    }

    #[tokio::test]
    async fn test_execute_success_first_attempt() {
        let gateway = FakeGateway::new(vec![Ok(OrderAck { order_id: "A".to_string() })]);
        let ex = executor(Arc::clone(&gateway));

        let trade = ex
            .execute(&decision(Action::BuyYes), &snapshot(Some(dec!(0.20)), None), dec!(10))
            .await;

        assert_eq!(trade.result, TradeResult::Pending);
        assert_eq!(trade.order_id.as_deref(), Some("A"));
        assert_eq!(trade.side, TradeSide::Yes);
        assert_eq!(trade.token_id, "111");
        assert_eq!(trade.price, dec!(0.20));
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_then_succeeds() {
        let gateway = FakeGateway::new(vec![
            Err(OrderError::Rejected("busy".to_string())),
            Err(OrderError::Rejected("busy".to_string())),
            Ok(OrderAck { order_id: "B".to_string() }),
        ]);
        let ex = executor(Arc::clone(&gateway));

        let trade = ex
            .execute(&decision(Action::BuyYes), &snapshot(Some(dec!(0.20)), None), dec!(10))
            .await;

        assert_eq!(trade.order_id.as_deref(), Some("B"));
        assert_eq!(gateway.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_exhaustion_is_failed_with_verbatim_error() {
        let gateway = FakeGateway::new(vec![
            Err(OrderError::Rejected("not enough balance".to_string())),
            Err(OrderError::Rejected("not enough balance".to_string())),
            Err(OrderError::Rejected("not enough balance".to_string())),
        ]);
        let ex = executor(Arc::clone(&gateway));

        let trade = ex
            .execute(&decision(Action::BuyYes), &snapshot(Some(dec!(0.20)), None), dec!(10))
            .await;

        assert_eq!(trade.result, TradeResult::Failed);
        assert!(trade.error.as_deref().unwrap().contains("not enough balance"));
        assert_eq!(gateway.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_error_recorded_as_rate_limited() {
        let gateway = FakeGateway::new(vec![
            Err(OrderError::Blocked("403".to_string())),
            Err(OrderError::Blocked("403".to_string())),
            Err(OrderError::Blocked("403".to_string())),
        ]);
        let ex = executor(Arc::clone(&gateway));

        let trade = ex
            .execute(&decision(Action::BuyYes), &snapshot(Some(dec!(0.20)), None), dec!(10))
            .await;

        assert_eq!(trade.result, TradeResult::Failed);
        assert!(trade.error.as_deref().unwrap().contains("rate-limited"));
    }

    #[tokio::test]
    async fn test_price_falls_back_to_mid_then_half() {
        let gateway = FakeGateway::new(vec![
            Ok(OrderAck { order_id: "C".to_string() }),
            Ok(OrderAck { order_id: "D".to_string() }),
        ]);
        let ex = executor(Arc::clone(&gateway));

        let trade = ex
            .execute(&decision(Action::BuyYes), &snapshot(None, Some(dec!(0.30))), dec!(9))
            .await;
        assert_eq!(trade.price, dec!(0.30));
        assert_eq!(trade.size, dec!(9));

        let trade = ex
            .execute(&decision(Action::BuyYes), &snapshot(None, None), dec!(9))
            .await;
        assert_eq!(trade.price, dec!(0.5));
    }

    #[tokio::test]
    async fn test_shares_are_floored() {
        let gateway = FakeGateway::new(vec![Ok(OrderAck { order_id: "E".to_string() })]);
        let ex = executor(Arc::clone(&gateway));

        // 10 / 0.30 = 33.333... -> 33.33 shares
        let _ = ex
            .execute(&decision(Action::BuyYes), &snapshot(Some(dec!(0.30)), None), dec!(10))
            .await;
        // Verified through the floor2 unit test; the trade record keeps dollars.
        assert_eq!(floor2(dec!(10) / dec!(0.30)), dec!(33.33));
    }

    #[tokio::test]
    async fn test_skip_decision_fails_fast() {
        let gateway = FakeGateway::new(vec![]);
        let ex = executor(Arc::clone(&gateway));

        let trade = ex
            .execute(&decision(Action::Skip), &snapshot(Some(dec!(0.20)), None), dec!(10))
            .await;

        assert_eq!(trade.result, TradeResult::Failed);
        assert_eq!(gateway.call_count(), 0);
    }
}
