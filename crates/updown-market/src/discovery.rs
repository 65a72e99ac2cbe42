//! Market discovery via the events index.
//!
//! 15-minute up/down markets are addressed by a deterministic slug
//! (`{asset}-updown-15m-{window_start_unix}`), so discovery does not walk
//! listings: it probes the slugs for the slots around the current one and
//! keeps the best live candidate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use updown_common::ReferenceAsset;

use crate::types::{IndexEvent, MarketRecord, TokenRecord};

/// Events index base URL.
const EVENTS_INDEX_URL: &str = "https://gamma-api.polymarket.com";

/// Seconds per 15-minute slot.
const SLOT_SECS: i64 = 900;

/// Slot offsets probed around the current window.
const SLOT_OFFSETS: [i64; 5] = [-2, -1, 0, 1, 2];

/// Configuration for market discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// HTTP request timeout.
    pub request_timeout: Duration,
    /// Reject markets with fewer minutes left than this.
    pub min_minutes_left: f64,
    /// Reject markets with more minutes left than this.
    pub max_minutes_left: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            min_minutes_left: 3.0,
            max_minutes_left: 12.0,
        }
    }
}

impl DiscoveryConfig {
    /// Wider acceptance window used by the spike strategy, which wants to
    /// enter as soon as a move shows up.
    pub fn spike_mode() -> Self {
        Self {
            min_minutes_left: 1.0,
            max_minutes_left: 14.0,
            ..Default::default()
        }
    }
}

/// Resolves the currently live 15-minute window to a market record.
pub struct MarketDiscovery {
    http: Client,
    base_url: String,
    config: DiscoveryConfig,
}

impl MarketDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: EVENTS_INDEX_URL.to_string(),
            config,
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Aligns a time down to its 15-minute slot start.
    pub fn slot_start(time: DateTime<Utc>) -> i64 {
        (time.timestamp() / SLOT_SECS) * SLOT_SECS
    }

    /// Slug for the window starting at the given unix timestamp.
    pub fn event_slug(asset: ReferenceAsset, window_start: i64) -> String {
        format!("{}-updown-15m-{}", asset.slug_prefix(), window_start)
    }

    /// Scans for the live market of the given asset.
    ///
    /// Probes slugs at slot offsets around `now`, keeps live candidates,
    /// prefers the one closest to (but more than a minute from) expiry,
    /// and finally applies the configured minutes-left window. Zero or one
    /// record; an empty scan is a normal outcome.
    pub async fn scan(&self, asset: ReferenceAsset, now: DateTime<Utc>) -> Option<MarketRecord> {
        let base_slot = Self::slot_start(now);

        let mut candidates = Vec::new();
        for offset in SLOT_OFFSETS {
            let slug = Self::event_slug(asset, base_slot + offset * SLOT_SECS);
            match self.fetch_event(&slug).await {
                Some(event) => {
                    if let Some(market) = self.accept_event(&slug, event, now) {
                        candidates.push(market);
                    }
                }
                None => continue,
            }
        }

        // Prefer the soonest-ending candidate that still has over a minute
        // on the clock, then gate on the configured window.
        candidates.sort_by(|a, b| a.end_time.cmp(&b.end_time));
        let best = candidates
            .into_iter()
            .find(|m| m.minutes_left(now) > 1.0)?;

        let minutes_left = best.minutes_left(now);
        if minutes_left < self.config.min_minutes_left || minutes_left > self.config.max_minutes_left {
            debug!(
                slug = %best.slug,
                minutes_left,
                "Market outside acceptance window"
            );
            return None;
        }

        Some(best)
    }

    /// Fetches one event by slug; any failure is a skipped candidate.
    async fn fetch_event(&self, slug: &str) -> Option<IndexEvent> {
        let url = format!("{}/events?slug={}", self.base_url, slug);

        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(slug, error = %e, "Events index request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(slug, status = %response.status(), "Events index non-OK");
            return None;
        }

        let events: Vec<IndexEvent> = match response.json().await {
            Ok(e) => e,
            Err(e) => {
                debug!(slug, error = %e, "Events index parse failed");
                return None;
            }
        };

        events.into_iter().next()
    }

    /// Filters one event down to a normalized market record.
    fn accept_event(
        &self,
        slug: &str,
        event: IndexEvent,
        now: DateTime<Utc>,
    ) -> Option<MarketRecord> {
        if event.active == Some(false) || event.closed == Some(true) {
            debug!(slug, "Event inactive or closed");
            return None;
        }

        // Up/down events carry exactly one market.
        let market = match event.markets.as_slice() {
            [m] => m.clone(),
            other => {
                debug!(slug, count = other.len(), "Unexpected market count");
                return None;
            }
        };

        if market.closed == Some(true) {
            return None;
        }

        let end_time = market.parse_end_time()?;
        if end_time <= now {
            return None;
        }

        let token_ids = market.parse_token_ids()?;
        if token_ids.len() != 2 {
            warn!(slug, count = token_ids.len(), "Expected 2 token ids");
            return None;
        }
        let outcomes = market.parse_outcomes();

        let tokens = token_ids
            .into_iter()
            .zip(outcomes)
            .map(|(token_id, outcome)| TokenRecord { token_id, outcome })
            .collect();

        Some(MarketRecord {
            condition_id: market.condition_id?,
            question: market.question.unwrap_or_default(),
            slug: slug.to_string(),
            end_time,
            tokens,
            neg_risk: market.neg_risk.unwrap_or(false),
            tick_size: market
                .order_price_min_tick_size
                .unwrap_or_else(|| Decimal::new(1, 2)),
        })
    }
}
