//! Reference-price feed.
//!
//! A background task owns a ticker WebSocket and appends `{last, bid, ask}`
//! samples into a bounded history. Consumers read derived statistics
//! (direction, momentum, windowed changes) through a cheap shared handle;
//! staleness is detected by consumers, never thrown.
//!
//! Reconnect policy is a fixed 5-second delay on close. A 30-second
//! heartbeat pings the socket to keep intermediaries from idling it out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

/// Ticker WebSocket URL.
const TICKER_WS_URL: &str = "wss://ws.kraken.com/v2";

/// Maximum samples retained.
const MAX_HISTORY: usize = 600;

/// Fixed reconnect delay after a closed socket.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Heartbeat ping interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A feed is stale when no sample arrived for this many seconds.
const STALE_AFTER_SECS: i64 = 30;

/// Context is unavailable when the newest sample is older than this.
const AVAILABLE_WITHIN_SECS: i64 = 60;

/// Change windows, seconds.
const CHANGE_WINDOWS: [i64; 4] = [60, 180, 300, 600];

/// One ticker sample.
#[derive(Debug, Clone, Copy)]
pub struct PriceSample {
    pub price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub at: DateTime<Utc>,
}

/// Latest-quote view for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct LatestPrice {
    pub price: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last_update: Option<DateTime<Utc>>,
    pub connected: bool,
    pub stale: bool,
}

/// Price move over one lookback window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PriceChange {
    pub dollars: Decimal,
    pub percent: Decimal,
}

/// Short-term direction classification over the 60-second window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Rising,
    Falling,
    Flat,
}

/// Is the 1-minute move fast or slow relative to the 3-minute pace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Momentum {
    Accelerating,
    Decelerating,
    Stable,
}

/// Derived feed state handed to policies. Never stored.
#[derive(Debug, Clone, Serialize)]
pub struct PriceContext {
    pub available: bool,
    pub current_price: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub direction: Direction,
    pub momentum: Momentum,
    pub change_1m: Option<PriceChange>,
    pub change_3m: Option<PriceChange>,
    pub change_5m: Option<PriceChange>,
    pub change_10m: Option<PriceChange>,
    /// max - min price over the last 30 seconds.
    pub recent_volatility: Option<Decimal>,
}

impl PriceContext {
    fn unavailable() -> Self {
        Self {
            available: false,
            current_price: None,
            bid: None,
            ask: None,
            direction: Direction::Flat,
            momentum: Momentum::Stable,
            change_1m: None,
            change_3m: None,
            change_5m: None,
            change_10m: None,
            recent_volatility: None,
        }
    }

    pub fn change(&self, window_secs: i64) -> Option<PriceChange> {
        match window_secs {
            60 => self.change_1m,
            180 => self.change_3m,
            300 => self.change_5m,
            600 => self.change_10m,
            _ => None,
        }
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct TickerEnvelope {
    channel: Option<String>,
    #[serde(default)]
    data: Vec<TickerData>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    #[serde(default, with = "rust_decimal::serde::float_option")]
    last: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    bid: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    ask: Option<Decimal>,
}

// ============================================================================
// Shared state
// ============================================================================

struct FeedState {
    history: RwLock<VecDeque<PriceSample>>,
    connected: AtomicBool,
}

/// Cheap cloneable read handle over the feed state.
#[derive(Clone)]
pub struct PriceFeedHandle {
    state: Arc<FeedState>,
}

impl PriceFeedHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(FeedState {
                history: RwLock::new(VecDeque::with_capacity(MAX_HISTORY)),
                connected: AtomicBool::new(false),
            }),
        }
    }

    /// Appends a sample, evicting the oldest past capacity. Timestamps must
    /// be non-decreasing; out-of-order samples are dropped.
    pub fn push_sample(&self, sample: PriceSample) {
        let mut history = self.state.history.write();
        if let Some(last) = history.back() {
            if sample.at < last.at {
                debug!("Dropping out-of-order sample");
                return;
            }
        }
        history.push_back(sample);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    pub fn sample_count(&self) -> usize {
        self.state.history.read().len()
    }

    /// Latest quote and connection health.
    pub fn latest(&self) -> LatestPrice {
        self.latest_at(Utc::now())
    }

    fn latest_at(&self, now: DateTime<Utc>) -> LatestPrice {
        let history = self.state.history.read();
        match history.back() {
            Some(sample) => LatestPrice {
                price: Some(sample.price),
                bid: Some(sample.bid),
                ask: Some(sample.ask),
                last_update: Some(sample.at),
                connected: self.is_connected(),
                stale: now - sample.at > chrono::Duration::seconds(STALE_AFTER_SECS),
            },
            None => LatestPrice {
                price: None,
                bid: None,
                ask: None,
                last_update: None,
                connected: self.is_connected(),
                stale: true,
            },
        }
    }

    /// Derived statistics over the bounded history.
    pub fn context(&self) -> PriceContext {
        self.context_at(Utc::now())
    }

    /// Same as `context` with an injected clock; tests use this directly.
    pub fn context_at(&self, now: DateTime<Utc>) -> PriceContext {
        let history = self.state.history.read();

        let newest = match history.back() {
            Some(s) => *s,
            None => return PriceContext::unavailable(),
        };
        if now - newest.at > chrono::Duration::seconds(AVAILABLE_WITHIN_SECS) {
            return PriceContext::unavailable();
        }

        let mut changes = [None; 4];
        for (i, window) in CHANGE_WINDOWS.iter().enumerate() {
            changes[i] = windowed_change(&history, newest.price, now, *window);
        }
        let [change_1m, change_3m, change_5m, change_10m] = changes;

        let direction = classify_direction(change_1m);
        let momentum = classify_momentum(change_1m, change_3m);

        let cutoff = now - chrono::Duration::seconds(30);
        let recent: Vec<Decimal> = history
            .iter()
            .filter(|s| s.at > cutoff)
            .map(|s| s.price)
            .collect();
        let recent_volatility = match (recent.iter().max(), recent.iter().min()) {
            (Some(max), Some(min)) => Some(*max - *min),
            _ => None,
        };

        PriceContext {
            available: true,
            current_price: Some(newest.price),
            bid: Some(newest.bid),
            ask: Some(newest.ask),
            direction,
            momentum,
            change_1m,
            change_3m,
            change_5m,
            change_10m,
            recent_volatility,
        }
    }

    /// Human-readable snapshot block used by the model policy's prompt.
    pub fn describe(&self) -> String {
        let ctx = self.context();
        if !ctx.available {
            return "Reference price unavailable (feed stale or empty)".to_string();
        }

        let mut out = String::new();
        if let Some(price) = ctx.current_price {
            out.push_str(&format!("Current price: ${}\n", price));
        }
        out.push_str(&format!("Direction: {:?}, Momentum: {:?}\n", ctx.direction, ctx.momentum));
        for (label, change) in [
            ("1m", ctx.change_1m),
            ("3m", ctx.change_3m),
            ("5m", ctx.change_5m),
            ("10m", ctx.change_10m),
        ] {
            match change {
                Some(c) => out.push_str(&format!(
                    "Change {}: ${} ({:.4}%)\n",
                    label, c.dollars, c.percent
                )),
                None => out.push_str(&format!("Change {}: n/a\n", label)),
            }
        }
        if let Some(vol) = ctx.recent_volatility {
            out.push_str(&format!("30s volatility: ${}\n", vol));
        }
        out
    }
}

/// Baseline is the newest sample at or beyond the window cutoff; a sample
/// exactly at `now - window` belongs to the older partition and qualifies.
fn windowed_change(
    history: &VecDeque<PriceSample>,
    current: Decimal,
    now: DateTime<Utc>,
    window_secs: i64,
) -> Option<PriceChange> {
    let cutoff = now - chrono::Duration::seconds(window_secs);
    let baseline = history.iter().rev().find(|s| s.at <= cutoff)?;
    if baseline.price.is_zero() {
        return None;
    }

    let dollars = current - baseline.price;
    let percent = dollars / baseline.price * Decimal::ONE_HUNDRED;
    Some(PriceChange { dollars, percent })
}

fn classify_direction(change_1m: Option<PriceChange>) -> Direction {
    let threshold = Decimal::new(5, 2); // 0.05%
    match change_1m {
        Some(c) if c.percent > threshold => Direction::Rising,
        Some(c) if c.percent < -threshold => Direction::Falling,
        _ => Direction::Flat,
    }
}

/// Compares the 1-minute pace against a third of the 3-minute move.
fn classify_momentum(change_1m: Option<PriceChange>, change_3m: Option<PriceChange>) -> Momentum {
    let (c1, c3) = match (change_1m, change_3m) {
        (Some(a), Some(b)) => (a, b),
        _ => return Momentum::Stable,
    };

    let pace_3m = (c3.percent / Decimal::from(3)).abs();
    if pace_3m.is_zero() {
        return Momentum::Stable;
    }

    let ratio = c1.percent.abs() / pace_3m;
    if ratio > Decimal::TWO {
        Momentum::Accelerating
    } else if ratio < Decimal::new(3, 1) {
        Momentum::Decelerating
    } else {
        Momentum::Stable
    }
}

// ============================================================================
// WebSocket task
// ============================================================================

/// Owns the socket; spawned once at startup.
pub struct PriceFeed {
    handle: PriceFeedHandle,
    url: String,
    symbol: String,
}

impl PriceFeed {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            handle: PriceFeedHandle::new(),
            url: TICKER_WS_URL.to_string(),
            symbol: symbol.into(),
        }
    }

    /// Sets a custom WebSocket URL (useful for testing).
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn handle(&self) -> PriceFeedHandle {
        self.handle.clone()
    }

    /// Runs the receive loop until shutdown. Reconnects forever on close.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            if shutdown.try_recv().is_ok() {
                info!("Price feed: shutdown signal received");
                return;
            }

            match self.run_connection(&mut shutdown).await {
                Ok(()) => {
                    info!("Price feed: clean shutdown");
                    return;
                }
                Err(e) => {
                    self.handle.set_connected(false);
                    warn!(error = %e, "Price feed disconnected, reconnecting in {:?}", RECONNECT_DELAY);
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        _ = shutdown.recv() => return,
                    }
                }
            }
        }
    }

    async fn run_connection(&self, shutdown: &mut broadcast::Receiver<()>) -> anyhow::Result<()> {
        info!(url = %self.url, "Connecting to ticker feed");
        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = json!({
            "method": "subscribe",
            "params": { "channel": "ticker", "symbol": [self.symbol] }
        });
        write.send(Message::Text(subscribe.to_string().into())).await?;
        self.handle.set_connected(true);
        info!(symbol = %self.symbol, "Subscribed to ticker");

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            anyhow::bail!("socket closed by server: {:?}", frame);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => anyhow::bail!("socket error: {}", e),
                        None => anyhow::bail!("socket stream ended"),
                    }
                }

                _ = heartbeat.tick() => {
                    write.send(Message::Ping(Vec::new().into())).await?;
                }

                _ = shutdown.recv() => {
                    self.handle.set_connected(false);
                    return Ok(());
                }
            }
        }
    }

    /// Parse errors on individual messages are swallowed; the feed is
    /// best-effort by design.
    fn handle_message(&self, text: &str) {
        let envelope: TickerEnvelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(_) => {
                debug!("Ignoring unparseable feed message");
                return;
            }
        };

        if envelope.channel.as_deref() != Some("ticker") {
            return;
        }

        for data in envelope.data {
            let (last, bid, ask) = match (data.last, data.bid, data.ask) {
                (Some(l), Some(b), Some(a)) => (l, b, a),
                _ => continue,
            };
            self.handle.push_sample(PriceSample {
                price: last,
                bid,
                ask,
                at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(price: Decimal, at: DateTime<Utc>) -> PriceSample {
        PriceSample {
            price,
            bid: price - dec!(1),
            ask: price + dec!(1),
            at,
        }
    }

    fn handle_with_ramp(now: DateTime<Utc>, start: Decimal, step: Decimal, secs: i64) -> PriceFeedHandle {
        let handle = PriceFeedHandle::new();
        for i in 0..=secs {
            let at = now - chrono::Duration::seconds(secs - i);
            handle.push_sample(sample(start + step * Decimal::from(i), at));
        }
        handle
    }

    #[test]
    fn test_history_bounded_and_ordered() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        for i in 0..700 {
            handle.push_sample(sample(dec!(100000), now + chrono::Duration::seconds(i)));
        }
        assert_eq!(handle.sample_count(), MAX_HISTORY);
    }

    #[test]
    fn test_out_of_order_sample_dropped() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        handle.push_sample(sample(dec!(100), now));
        handle.push_sample(sample(dec!(99), now - chrono::Duration::seconds(10)));
        assert_eq!(handle.sample_count(), 1);
    }

    #[test]
    fn test_context_unavailable_when_empty() {
        let handle = PriceFeedHandle::new();
        let ctx = handle.context();
        assert!(!ctx.available);
        assert_eq!(ctx.direction, Direction::Flat);
    }

    #[test]
    fn test_context_unavailable_when_old() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(90)));
        assert!(!handle.context_at(now).available);
    }

    #[test]
    fn test_available_within_sixty_seconds() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(59)));
        assert!(handle.context_at(now).available);
    }

    #[test]
    fn test_windowed_change_rising() {
        let now = Utc::now();
        // 100000 -> 100120 over 120 seconds, $1/s.
        let handle = handle_with_ramp(now, dec!(100000), dec!(1), 120);
        let ctx = handle.context_at(now);

        let c1 = ctx.change_1m.unwrap();
        assert_eq!(c1.dollars, dec!(60));
        assert!(c1.percent > dec!(0.05));
        assert_eq!(ctx.direction, Direction::Rising);
    }

    #[test]
    fn test_direction_symmetry() {
        let now = Utc::now();
        let rising = handle_with_ramp(now, dec!(100000), dec!(1), 120);
        let falling = handle_with_ramp(now, dec!(100000), dec!(-1), 120);

        assert_eq!(rising.context_at(now).direction, Direction::Rising);
        assert_eq!(falling.context_at(now).direction, Direction::Falling);
    }

    #[test]
    fn test_direction_flat_on_small_move() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(61)));
        handle.push_sample(sample(dec!(100010), now)); // +0.01%
        assert_eq!(handle.context_at(now).direction, Direction::Flat);
    }

    #[test]
    fn test_boundary_sample_counts_as_baseline() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        // Exactly at the 60s cutoff: qualifies as the older partition.
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(60)));
        handle.push_sample(sample(dec!(100100), now));

        let c1 = handle.context_at(now).change_1m.unwrap();
        assert_eq!(c1.dollars, dec!(100));
    }

    #[test]
    fn test_change_none_when_history_too_short() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(30)));
        handle.push_sample(sample(dec!(100050), now));

        let ctx = handle.context_at(now);
        assert!(ctx.change_1m.is_none());
        assert!(ctx.change_10m.is_none());
    }

    #[test]
    fn test_momentum_accelerating() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        // Flat for two minutes, then a fast last minute.
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(180)));
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(60)));
        handle.push_sample(sample(dec!(100300), now));

        assert_eq!(handle.context_at(now).momentum, Momentum::Accelerating);
    }

    #[test]
    fn test_momentum_decelerating() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        // Big move two minutes ago, quiet last minute.
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(180)));
        handle.push_sample(sample(dec!(100300), now - chrono::Duration::seconds(60)));
        handle.push_sample(sample(dec!(100301), now));

        assert_eq!(handle.context_at(now).momentum, Momentum::Decelerating);
    }

    #[test]
    fn test_recent_volatility() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(20)));
        handle.push_sample(sample(dec!(100080), now - chrono::Duration::seconds(10)));
        handle.push_sample(sample(dec!(100040), now));

        let ctx = handle.context_at(now);
        assert_eq!(ctx.recent_volatility, Some(dec!(80)));
    }

    #[test]
    fn test_latest_stale_flag() {
        let handle = PriceFeedHandle::new();
        let now = Utc::now();
        handle.push_sample(sample(dec!(100000), now - chrono::Duration::seconds(45)));

        let latest = handle.latest_at(now);
        assert!(latest.stale);
        assert_eq!(latest.price, Some(dec!(100000)));
    }

    #[test]
    fn test_ticker_message_parsing() {
        let feed = PriceFeed::new("BTC/USD");
        feed.handle_message(
            r#"{"channel":"ticker","type":"update","data":[{"symbol":"BTC/USD","last":100123.5,"bid":100120.0,"ask":100125.0}]}"#,
        );
        assert_eq!(feed.handle().sample_count(), 1);

        // Garbage and off-channel messages are ignored.
        feed.handle_message("not json");
        feed.handle_message(r#"{"channel":"heartbeat"}"#);
        assert_eq!(feed.handle().sample_count(), 1);
    }

    #[test]
    fn test_describe_mentions_direction() {
        let now = Utc::now();
        let handle = handle_with_ramp(now, dec!(100000), dec!(1), 120);
        let text = handle.describe();
        assert!(text.contains("Current price"));
        assert!(text.contains("Direction"));
    }
}
