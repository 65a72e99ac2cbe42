//! Off-chain positions index client.
//!
//! Used once at startup (and on manual trigger) to find outcome tokens the
//! wallet already holds, so resolved positions that predate this process
//! still get redeemed.

use std::time::Duration;

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

/// Positions index base URL.
const POSITIONS_INDEX_URL: &str = "https://data-api.polymarket.com";

/// One position as the index reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedPosition {
    /// Outcome token id (uint256 decimal string).
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub size: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub cur_price: Option<Decimal>,
    #[serde(default)]
    pub redeemable: Option<bool>,
    #[serde(default)]
    pub negative_risk: Option<bool>,
    #[serde(default)]
    pub title: Option<String>,
}

impl IndexedPosition {
    pub fn size_or_zero(&self) -> Decimal {
        self.size.unwrap_or(Decimal::ZERO)
    }
}

/// Thin read-only client over the positions index.
pub struct PositionsClient {
    http: Client,
    base_url: String,
}

impl PositionsClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: POSITIONS_INDEX_URL.to_string(),
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// All positions for one wallet address; empty on any failure.
    pub async fn positions_for(&self, address: &str) -> Vec<IndexedPosition> {
        let url = format!("{}/positions?user={}&limit=200", self.base_url, address);

        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(address, error = %e, "Positions index request failed");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(address, status = %response.status(), "Positions index non-OK");
            return Vec::new();
        }

        match response.json::<Vec<IndexedPosition>>().await {
            Ok(positions) => {
                debug!(address, count = positions.len(), "Fetched positions");
                positions
            }
            Err(e) => {
                warn!(address, error = %e, "Positions index parse failed");
                Vec::new()
            }
        }
    }
}

impl Default for PositionsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_positions_for_parses_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/positions"))
            .and(query_param("user", "0xabc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "asset": "111",
                    "conditionId": "0xcond",
                    "size": 25.0,
                    "curPrice": 1.0,
                    "redeemable": true,
                    "negativeRisk": true,
                    "title": "BTC Up or Down"
                },
                {
                    "asset": "222",
                    "size": 0.0,
                    "curPrice": 0.4
                }
            ])))
            .mount(&server)
            .await;

        let client = PositionsClient::new().with_base_url(server.uri());
        let positions = client.positions_for("0xabc").await;

        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].condition_id.as_deref(), Some("0xcond"));
        assert_eq!(positions[0].size_or_zero(), dec!(25));
        assert_eq!(positions[0].redeemable, Some(true));
        assert_eq!(positions[1].size_or_zero(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_positions_for_empty_on_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = PositionsClient::new().with_base_url(server.uri());
        assert!(client.positions_for("0xabc").await.is_empty());
    }

    #[tokio::test]
    async fn test_positions_for_tolerates_unknown_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"asset": "1", "size": 5.0, "someNewField": {"nested": true}}
            ])))
            .mount(&server)
            .await;

        let client = PositionsClient::new().with_base_url(server.uri());
        let positions = client.positions_for("0xabc").await;
        assert_eq!(positions.len(), 1);
    }
}
