//! Typed market records and the events-index wire format.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use updown_common::OutcomeSide;

/// One outcome token of a binary market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// uint256 token id as a decimal string, as the CLOB reports it.
    pub token_id: String,
    pub outcome: OutcomeSide,
}

/// A resolved, tradeable 15-minute market.
///
/// Constructed fresh each scan cycle; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRecord {
    /// 32-byte hex condition id binding the market's on-chain resolution.
    pub condition_id: String,
    pub question: String,
    pub slug: String,
    pub end_time: DateTime<Utc>,
    /// Exactly two tokens, Up first.
    pub tokens: Vec<TokenRecord>,
    pub neg_risk: bool,
    #[serde(with = "rust_decimal::serde::str")]
    pub tick_size: Decimal,
}

impl MarketRecord {
    pub fn minutes_left(&self, now: DateTime<Utc>) -> f64 {
        (self.end_time - now).num_seconds() as f64 / 60.0
    }

    pub fn token(&self, side: OutcomeSide) -> Option<&TokenRecord> {
        self.tokens.iter().find(|t| t.outcome == side)
    }

    pub fn up_token(&self) -> Option<&TokenRecord> {
        self.token(OutcomeSide::Up)
    }

    pub fn down_token(&self) -> Option<&TokenRecord> {
        self.token(OutcomeSide::Down)
    }
}

// ============================================================================
// Events-index wire format
// ============================================================================

/// An event from the events index, queried by slug.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexEvent {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    #[serde(default)]
    pub markets: Vec<IndexMarket>,
}

/// A market nested inside an index event.
///
/// Field names are camelCase on the wire; unknown fields are dropped.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMarket {
    pub condition_id: Option<String>,
    pub question: Option<String>,
    pub end_date: Option<String>,
    /// JSON-encoded string array of the two token ids.
    pub clob_token_ids: Option<String>,
    /// JSON-encoded string array of outcome labels.
    pub outcomes: Option<String>,
    pub neg_risk: Option<bool>,
    pub order_price_min_tick_size: Option<Decimal>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
}

impl IndexMarket {
    /// Parses the JSON-in-string token id array the index uses.
    pub fn parse_token_ids(&self) -> Option<Vec<String>> {
        let raw = self.clob_token_ids.as_deref()?;
        serde_json::from_str::<Vec<String>>(raw).ok()
    }

    /// Parses the outcome label array; missing labels default to Up/Down order.
    pub fn parse_outcomes(&self) -> Vec<OutcomeSide> {
        let labels: Vec<String> = self
            .outcomes
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        if labels.len() == 2 {
            labels.iter().map(|l| OutcomeSide::from_label(l)).collect()
        } else {
            vec![OutcomeSide::Up, OutcomeSide::Down]
        }
    }

    pub fn parse_end_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.end_date.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn market_record() -> MarketRecord {
        MarketRecord {
            condition_id: "0xabc".to_string(),
            question: "BTC up or down?".to_string(),
            slug: "btc-updown-15m-1769860800".to_string(),
            end_time: Utc.with_ymd_and_hms(2026, 1, 31, 12, 15, 0).unwrap(),
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
            neg_risk: true,
            tick_size: dec!(0.01),
        }
    }

    #[test]
    fn test_token_lookup() {
        let m = market_record();
        assert_eq!(m.up_token().unwrap().token_id, "111");
        assert_eq!(m.down_token().unwrap().token_id, "222");
    }

    #[test]
    fn test_minutes_left() {
        let m = market_record();
        let now = Utc.with_ymd_and_hms(2026, 1, 31, 12, 5, 0).unwrap();
        assert_eq!(m.minutes_left(now), 10.0);
    }

    #[test]
    fn test_parse_token_ids() {
        let m = IndexMarket {
            condition_id: None,
            question: None,
            end_date: None,
            clob_token_ids: Some(r#"["111", "222"]"#.to_string()),
            outcomes: Some(r#"["Up", "Down"]"#.to_string()),
            neg_risk: None,
            order_price_min_tick_size: None,
            active: None,
            closed: None,
        };

        assert_eq!(m.parse_token_ids().unwrap(), vec!["111", "222"]);
        assert_eq!(m.parse_outcomes(), vec![OutcomeSide::Up, OutcomeSide::Down]);
    }

    #[test]
    fn test_parse_outcomes_defaults_when_missing() {
        let m = IndexMarket {
            condition_id: None,
            question: None,
            end_date: None,
            clob_token_ids: None,
            outcomes: None,
            neg_risk: None,
            order_price_min_tick_size: None,
            active: None,
            closed: None,
        };

        assert_eq!(m.parse_outcomes(), vec![OutcomeSide::Up, OutcomeSide::Down]);
    }

    #[test]
    fn test_parse_end_time_rfc3339() {
        let m = IndexMarket {
            condition_id: None,
            question: None,
            end_date: Some("2026-01-31T12:15:00Z".to_string()),
            clob_token_ids: None,
            outcomes: None,
            neg_risk: None,
            order_price_min_tick_size: None,
            active: None,
            closed: None,
        };

        let end = m.parse_end_time().unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 31, 12, 15, 0).unwrap());
    }
}
