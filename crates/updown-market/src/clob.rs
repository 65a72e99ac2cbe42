//! Authenticated CLOB order client.
//!
//! Order placement uses the venue's L2 authentication scheme: every request
//! carries HMAC-SHA256 headers derived from the API key, secret, and
//! passphrase. The EIP-712 order-signing internals live behind the venue's
//! order endpoint contract; this client is the typed surface the executor
//! talks to, and tests substitute a fake gateway.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE as BASE64_URL_SAFE;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

use updown_common::TradeSide;

type HmacSha256 = Hmac<Sha256>;

/// CLOB REST base URL.
const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Order endpoint path (also the HMAC signing path).
const ORDER_PATH: &str = "/order";

/// Errors from order submission.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Venue answered but did not accept the order.
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// Geoblock / rate-limit class rejection (HTTP 403 or "blocked" body).
    #[error("Order blocked: {0}")]
    Blocked(String),

    #[error("Invalid credentials: {0}")]
    Credentials(String),
}

impl OrderError {
    /// Hard errors get the doubled backoff in the executor's retry policy.
    pub fn is_hard(&self) -> bool {
        matches!(self, OrderError::Blocked(_))
    }
}

/// API credentials for L2-authenticated endpoints.
#[derive(Debug, Clone)]
pub struct ClobCredentials {
    /// Signing address reported to the venue.
    pub address: String,
    pub api_key: String,
    /// base64url-encoded HMAC secret.
    pub secret: String,
    pub passphrase: String,
}

/// What the executor asks the venue to do.
#[derive(Debug, Clone, Serialize)]
pub struct OrderArgs {
    pub token_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    /// Number of shares, not dollars.
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    pub side: TradeSide,
    pub neg_risk: bool,
    /// Good-till-canceled; the venue treats 0 expiration as its default.
    pub order_type: String,
    pub expiration: u64,
    /// Raised for neg-risk spike entries, 0 otherwise.
    pub fee_rate_bps: u32,
}

impl OrderArgs {
    pub fn gtc(token_id: impl Into<String>, price: Decimal, size: Decimal, side: TradeSide, neg_risk: bool) -> Self {
        Self {
            token_id: token_id.into(),
            price,
            size,
            side,
            neg_risk,
            order_type: "GTC".to_string(),
            expiration: 0,
            fee_rate_bps: 0,
        }
    }

    #[must_use]
    pub fn with_fee_rate(mut self, bps: u32) -> Self {
        self.fee_rate_bps = bps;
        self
    }
}

/// Venue acknowledgment of a placed order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
}

/// The seam between the executor and the venue.
///
/// The production implementation is `ClobOrderClient`; tests plug in fakes.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn post_order(&self, args: &OrderArgs) -> Result<OrderAck, OrderError>;
}

/// reqwest-backed order client with L2 HMAC headers.
pub struct ClobOrderClient {
    http: reqwest::Client,
    base_url: String,
    credentials: ClobCredentials,
}

impl ClobOrderClient {
    pub fn new(credentials: ClobCredentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: CLOB_API_URL.to_string(),
            credentials,
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Builds the L2 auth headers for one request.
    ///
    /// Signature = base64url(HMAC-SHA256(base64url-decoded secret,
    /// `{timestamp}{method}{path}{body}`)).
    fn l2_headers(&self, method: &str, path: &str, body: &str) -> Result<Vec<(&'static str, String)>, OrderError> {
        let timestamp = Utc::now().timestamp().to_string();

        let key = BASE64_URL_SAFE
            .decode(&self.credentials.secret)
            .map_err(|e| OrderError::Credentials(format!("secret is not base64url: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| OrderError::Credentials(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        let signature = BASE64_URL_SAFE.encode(mac.finalize().into_bytes());

        Ok(vec![
            ("POLY_ADDRESS", self.credentials.address.clone()),
            ("POLY_API_KEY", self.credentials.api_key.clone()),
            ("POLY_PASSPHRASE", self.credentials.passphrase.clone()),
            ("POLY_TIMESTAMP", timestamp),
            ("POLY_SIGNATURE", signature),
        ])
    }
}

#[async_trait]
impl OrderGateway for ClobOrderClient {
    async fn post_order(&self, args: &OrderArgs) -> Result<OrderAck, OrderError> {
        let body = serde_json::to_string(args)
            .map_err(|e| OrderError::Rejected(format!("serialize: {}", e)))?;

        let url = format!("{}{}", self.base_url, ORDER_PATH);
        let mut request = self.http.post(&url).header("Content-Type", "application/json");
        for (name, value) in self.l2_headers("POST", ORDER_PATH, &body)? {
            request = request.header(name, value);
        }

        debug!(token_id = %args.token_id, price = %args.price, size = %args.size, "Posting order");

        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.as_u16() == 403 || text.to_lowercase().contains("blocked") {
            warn!(status = %status, "Order blocked by venue");
            return Err(OrderError::Blocked(format!("{}: {}", status, text)));
        }

        if !status.is_success() {
            return Err(OrderError::Rejected(format!("{}: {}", status, text)));
        }

        let parsed: OrderResponse = serde_json::from_str(&text)
            .map_err(|e| OrderError::Rejected(format!("bad order response: {}", e)))?;

        match (parsed.success, parsed.order_id) {
            (true, Some(order_id)) if !order_id.is_empty() => Ok(OrderAck { order_id }),
            _ => Err(OrderError::Rejected(
                parsed.error_msg.unwrap_or_else(|| "no orderID in response".to_string()),
            )),
        }
    }
}
