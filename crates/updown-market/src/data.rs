//! Market-data snapshots from the CLOB REST API.
//!
//! Every sub-request is best-effort: a timeout or bad payload turns into a
//! `None` field, never an error. Decisions are made on whatever survived.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use updown_common::OutcomeSide;

use crate::types::MarketRecord;

/// CLOB REST base URL.
const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Hard deadline per sub-request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Book levels kept per side.
const BOOK_DEPTH: usize = 10;

/// Best buy/sell quotes for one token.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenPrice {
    pub buy: Option<Decimal>,
    pub sell: Option<Decimal>,
    /// `(buy + sell) / 2` when both quotes are present.
    pub mid: Option<Decimal>,
}

/// One side of the book, price and size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
}

/// Trimmed order book with the derived liquidity numbers the policies use.
#[derive(Debug, Clone, Serialize)]
pub struct BookSummary {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub bid_ask_ratio: Option<Decimal>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
}

/// Everything we know about one outcome token at snapshot time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenSnapshot {
    pub price: TokenPrice,
    pub book: Option<BookSummary>,
}

/// Minute-level price history point.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistoryPoint {
    pub at: DateTime<Utc>,
    pub price: Decimal,
}

/// Fresh per-decision view of a market.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub market: MarketRecord,
    pub up: TokenSnapshot,
    pub down: TokenSnapshot,
    /// Minute-fidelity history of the Up token's price.
    pub price_history: Vec<HistoryPoint>,
    /// Venue-reported spread on the Up side, when available.
    pub spread: Option<Decimal>,
}

impl MarketSnapshot {
    pub fn token(&self, side: OutcomeSide) -> &TokenSnapshot {
        match side {
            OutcomeSide::Up => &self.up,
            OutcomeSide::Down => &self.down,
        }
    }

    /// A snapshot is tradeable when at least one side has a mid.
    pub fn has_mid(&self) -> bool {
        self.up.price.mid.is_some() || self.down.price.mid.is_some()
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    #[serde(default)]
    bids: Vec<BookLevel>,
    #[serde(default)]
    asks: Vec<BookLevel>,
}

#[derive(Debug, Deserialize)]
struct SpreadResponse {
    #[serde(with = "rust_decimal::serde::str")]
    spread: Decimal,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    /// Unix seconds.
    t: i64,
    /// Price; the history endpoint reports plain JSON numbers.
    #[serde(with = "rust_decimal::serde::float")]
    p: Decimal,
}

// ============================================================================
// Fetcher
// ============================================================================

/// Snapshots prices, books, and history for one market.
pub struct MarketDataFetcher {
    http: reqwest::Client,
    base_url: String,
    /// Secondary history host tried when the primary returns non-OK.
    fallback_url: Option<String>,
}

impl MarketDataFetcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: CLOB_API_URL.to_string(),
            fallback_url: None,
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_history_fallback(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }

    /// Builds the full snapshot, fanning out the per-token requests.
    pub async fn fetch_full(&self, market: &MarketRecord) -> MarketSnapshot {
        let up_id = market.up_token().map(|t| t.token_id.clone()).unwrap_or_default();
        let down_id = market.down_token().map(|t| t.token_id.clone()).unwrap_or_default();

        let (up, down, history, spread) = tokio::join!(
            self.fetch_token(&up_id),
            self.fetch_token(&down_id),
            self.fetch_history(&up_id),
            self.fetch_spread(&up_id),
        );

        MarketSnapshot {
            market: market.clone(),
            up,
            down,
            price_history: history,
            spread,
        }
    }

    async fn fetch_token(&self, token_id: &str) -> TokenSnapshot {
        if token_id.is_empty() {
            return TokenSnapshot::default();
        }

        let (buy, sell, book) = tokio::join!(
            self.fetch_price(token_id, "buy"),
            self.fetch_price(token_id, "sell"),
            self.fetch_book(token_id),
        );

        let mid = match (buy, sell) {
            (Some(b), Some(s)) => Some((b + s) / Decimal::TWO),
            _ => None,
        };

        TokenSnapshot {
            price: TokenPrice { buy, sell, mid },
            book,
        }
    }

    async fn fetch_price(&self, token_id: &str, side: &str) -> Option<Decimal> {
        let url = format!("{}/price?token_id={}&side={}", self.base_url, token_id, side);
        let response: PriceResponse = self.get_json(&url).await?;
        Some(response.price)
    }

    async fn fetch_book(&self, token_id: &str) -> Option<BookSummary> {
        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        let response: BookResponse = self.get_json(&url).await?;
        Some(summarize_book(response.bids, response.asks))
    }

    async fn fetch_spread(&self, token_id: &str) -> Option<Decimal> {
        if token_id.is_empty() {
            return None;
        }
        let url = format!("{}/spread?token_id={}", self.base_url, token_id);
        let response: SpreadResponse = self.get_json(&url).await?;
        Some(response.spread)
    }

    /// Minute-level history; the fallback host is tried on a non-OK primary.
    async fn fetch_history(&self, token_id: &str) -> Vec<HistoryPoint> {
        if token_id.is_empty() {
            return Vec::new();
        }

        let path = format!("/prices-history?market={}&interval=1m&fidelity=1", token_id);

        if let Some(points) = self.try_history(&format!("{}{}", self.base_url, path)).await {
            return points;
        }
        if let Some(fallback) = &self.fallback_url {
            if let Some(points) = self.try_history(&format!("{}{}", fallback, path)).await {
                return points;
            }
        }
        Vec::new()
    }

    async fn try_history(&self, url: &str) -> Option<Vec<HistoryPoint>> {
        let response: HistoryResponse = self.get_json(url).await?;
        let points = response
            .history
            .into_iter()
            .filter_map(|e| {
                Utc.timestamp_opt(e.t, 0)
                    .single()
                    .map(|at| HistoryPoint { at, price: e.p })
            })
            .collect();
        Some(points)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Option<T> {
        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(url, error = %e, "Market-data request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(url, status = %response.status(), "Market-data non-OK");
            return None;
        }

        match response.json().await {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(url, error = %e, "Market-data parse failed");
                None
            }
        }
    }
}

impl Default for MarketDataFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Trims the raw book and derives volumes, ratio, and spread.
fn summarize_book(mut bids: Vec<BookLevel>, mut asks: Vec<BookLevel>) -> BookSummary {
    // Venue order is not guaranteed; best bid first, best ask first.
    bids.sort_by(|a, b| b.price.cmp(&a.price));
    asks.sort_by(|a, b| a.price.cmp(&b.price));
    bids.truncate(BOOK_DEPTH);
    asks.truncate(BOOK_DEPTH);

    let bid_volume: Decimal = bids.iter().map(|l| l.size).sum();
    let ask_volume: Decimal = asks.iter().map(|l| l.size).sum();
    let bid_ask_ratio = if ask_volume > Decimal::ZERO {
        Some(bid_volume / ask_volume)
    } else {
        None
    };

    let best_bid = bids.first().map(|l| l.price);
    let best_ask = asks.first().map(|l| l.price);
    let spread = match (best_bid, best_ask) {
        (Some(b), Some(a)) => Some(a - b),
        _ => None,
    };

    BookSummary {
        bids,
        asks,
        bid_volume,
        ask_volume,
        bid_ask_ratio,
        best_bid,
        best_ask,
        spread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenRecord;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn level(price: &str, size: &str) -> BookLevel {
        BookLevel {
            price: price.parse().unwrap(),
            size: size.parse().unwrap(),
        }
    }

    fn market() -> MarketRecord {
        MarketRecord {
            condition_id: "0xabc".to_string(),
            question: "q".to_string(),
            slug: "btc-updown-15m-0".to_string(),
            end_time: Utc::now() + chrono::Duration::minutes(10),
            tokens: vec![
                TokenRecord {
                    token_id: "111".to_string(),
                    outcome: OutcomeSide::Up,
                },
                TokenRecord {
                    token_id: "222".to_string(),
                    outcome: OutcomeSide::Down,
                },
            ],
            neg_risk: false,
            tick_size: dec!(0.01),
        }
    }

    #[test]
    fn test_summarize_book_orders_and_trims() {
        let bids: Vec<BookLevel> = (1..=15)
            .map(|i| level(&format!("0.{:02}", i), "10"))
            .collect();
        let asks: Vec<BookLevel> = (50..=60)
            .map(|i| level(&format!("0.{:02}", i), "5"))
            .collect();

        let summary = summarize_book(bids, asks);

        assert_eq!(summary.bids.len(), 10);
        assert_eq!(summary.asks.len(), 10);
        assert_eq!(summary.best_bid, Some(dec!(0.15)));
        assert_eq!(summary.best_ask, Some(dec!(0.50)));
        assert_eq!(summary.spread, Some(dec!(0.35)));
        assert_eq!(summary.bid_volume, dec!(100));
        assert_eq!(summary.ask_volume, dec!(50));
        assert_eq!(summary.bid_ask_ratio, Some(dec!(2)));
    }

    #[test]
    fn test_summarize_book_empty_sides() {
        let summary = summarize_book(Vec::new(), vec![level("0.5", "1")]);
        assert!(summary.best_bid.is_none());
        assert!(summary.spread.is_none());
        assert!(summary.bid_ask_ratio.is_some());
    }

    #[tokio::test]
    async fn test_fetch_full_happy_path() {
        let server = MockServer::start().await;

        for (token, side, price) in [
            ("111", "buy", "0.20"),
            ("111", "sell", "0.18"),
            ("222", "buy", "0.82"),
            ("222", "sell", "0.80"),
        ] {
            Mock::given(method("GET"))
                .and(path("/price"))
                .and(query_param("token_id", token))
                .and(query_param("side", side))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"price": price})))
                .mount(&server)
                .await;
        }

        Mock::given(method("GET"))
            .and(path("/book"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bids": [{"price": "0.18", "size": "100"}],
                "asks": [{"price": "0.20", "size": "50"}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/prices-history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "history": [{"t": 1769860800, "p": 0.19}, {"t": 1769860860, "p": 0.20}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/spread"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"spread": "0.02"})))
            .mount(&server)
            .await;

        let fetcher = MarketDataFetcher::new().with_base_url(server.uri());
        let snapshot = fetcher.fetch_full(&market()).await;

        assert_eq!(snapshot.up.price.buy, Some(dec!(0.20)));
        assert_eq!(snapshot.up.price.mid, Some(dec!(0.19)));
        assert_eq!(snapshot.down.price.mid, Some(dec!(0.81)));
        assert!(snapshot.has_mid());
        assert_eq!(snapshot.price_history.len(), 2);
        assert_eq!(snapshot.spread, Some(dec!(0.02)));
        assert!(snapshot.up.book.is_some());
    }

    #[tokio::test]
    async fn test_fetch_full_all_failures_yield_nulls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = MarketDataFetcher::new().with_base_url(server.uri());
        let snapshot = fetcher.fetch_full(&market()).await;

        assert!(snapshot.up.price.buy.is_none());
        assert!(snapshot.up.price.mid.is_none());
        assert!(snapshot.up.book.is_none());
        assert!(snapshot.price_history.is_empty());
        assert!(!snapshot.has_mid());
    }

    #[tokio::test]
    async fn test_history_fallback_used_on_primary_failure() {
        let primary = MockServer::start().await;
        let fallback = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&primary)
            .await;

        Mock::given(method("GET"))
            .and(path("/prices-history"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "history": [{"t": 1769860800, "p": 0.50}]
            })))
            .mount(&fallback)
            .await;

        let fetcher = MarketDataFetcher::new()
            .with_base_url(primary.uri())
            .with_history_fallback(fallback.uri());

        let snapshot = fetcher.fetch_full(&market()).await;
        assert_eq!(snapshot.price_history.len(), 1);
    }

    #[test]
    fn test_mid_requires_both_quotes() {
        // Covered through fetch_token indirectly; assert the arithmetic here.
        let buy = Some(dec!(0.20));
        let sell: Option<Decimal> = None;
        let mid = match (buy, sell) {
            (Some(b), Some(s)) => Some((b + s) / Decimal::TWO),
            _ => None,
        };
        assert!(mid.is_none());
    }
}
