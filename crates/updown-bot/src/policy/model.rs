//! Model-scored policy.
//!
//! Builds a textual description of the market (minute-by-minute probability
//! changes plus the reference-price context) and asks an external scoring
//! service for `{action, confidence, pattern, reasoning}`. Every failure
//! mode (HTTP error, empty reply, unparseable JSON) yields a skip.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use updown_common::{Action, Confidence, Decision};
use updown_market::MarketSnapshot;

use crate::feed::PriceContext;
use crate::policy::DecisionPolicy;

/// Configuration for the scoring service.
#[derive(Debug, Clone)]
pub struct ModelPolicyConfig {
    /// Chat-completions style endpoint base, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl ModelPolicyConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Strategy 2: model-scored policy.
pub struct ModelPolicy {
    http: Client,
    config: ModelPolicyConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ScoredDecision {
    #[serde(default)]
    action: String,
    #[serde(default)]
    confidence: String,
    #[serde(default)]
    pattern: String,
    #[serde(default)]
    reasoning: String,
}

impl ModelPolicy {
    pub fn new(config: ModelPolicyConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { http, config }
    }

    /// Renders the market and feed state into the scoring prompt.
    fn build_prompt(snapshot: &MarketSnapshot, ctx: &PriceContext) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "Market: {}\nMinutes left: {:.1}\n",
            snapshot.market.question,
            snapshot.market.minutes_left(chrono::Utc::now()),
        ));

        if let Some(mid) = snapshot.up.price.mid {
            prompt.push_str(&format!("UP mid: {}\n", mid));
        }
        if let Some(mid) = snapshot.down.price.mid {
            prompt.push_str(&format!("DOWN mid: {}\n", mid));
        }

        if !snapshot.price_history.is_empty() {
            prompt.push_str("UP probability by minute:\n");
            let mut prev: Option<Decimal> = None;
            for point in &snapshot.price_history {
                let delta = prev
                    .map(|p| format!(" ({:+})", point.price - p))
                    .unwrap_or_default();
                prompt.push_str(&format!(
                    "  {} {}{}\n",
                    point.at.format("%H:%M"),
                    point.price,
                    delta,
                ));
                prev = Some(point.price);
            }
        }

        prompt.push_str(&format_context(ctx));
        prompt.push_str(
            "\nReply with one JSON object: {\"action\": \"BUY_YES|BUY_NO|SKIP\", \
             \"confidence\": \"LOW|MEDIUM|HIGH\", \"pattern\": \"...\", \"reasoning\": \"...\"}",
        );
        prompt
    }

    /// Asks the scoring service; `None` on any transport or shape failure.
    async fn score(&self, prompt: &str) -> Option<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.2,
        });

        let response = match self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Scoring service request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "Scoring service non-OK");
            return None;
        }

        let parsed: ChatResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Scoring service parse failed");
                return None;
            }
        };

        let content = parsed.choices.into_iter().next()?.message.content;
        if content.trim().is_empty() {
            return None;
        }
        Some(content)
    }
}

#[async_trait]
impl DecisionPolicy for ModelPolicy {
    async fn decide(&self, snapshot: &MarketSnapshot, ctx: &PriceContext) -> Decision {
        let prompt = Self::build_prompt(snapshot, ctx);
        debug!(chars = prompt.len(), "Built scoring prompt");

        let content = match self.score(&prompt).await {
            Some(c) => c,
            None => return Decision::skip("model_error", "scoring service unavailable"),
        };

        parse_decision(&content)
    }

    fn name(&self) -> &'static str {
        "model"
    }
}

fn format_context(ctx: &PriceContext) -> String {
    if !ctx.available {
        return "Reference price unavailable\n".to_string();
    }

    let mut out = String::new();
    if let Some(price) = ctx.current_price {
        out.push_str(&format!("Reference price: ${}\n", price));
    }
    out.push_str(&format!(
        "Direction: {:?}, momentum: {:?}\n",
        ctx.direction, ctx.momentum
    ));
    for (label, change) in [("1m", ctx.change_1m), ("3m", ctx.change_3m), ("5m", ctx.change_5m)] {
        if let Some(c) = change {
            out.push_str(&format!("Move {}: ${} ({}%)\n", label, c.dollars, c.percent.round_dp(4)));
        }
    }
    out
}

/// Extracts and normalizes the decision object from the model reply.
///
/// The reply may wrap the JSON in prose or code fences; we take the first
/// balanced `{...}` block. Unknown actions collapse to SKIP, unknown
/// confidences to LOW, and LOW forces SKIP.
fn parse_decision(content: &str) -> Decision {
    let json_block = match extract_json_object(content) {
        Some(block) => block,
        None => return Decision::skip("model_error", "no JSON object in model reply"),
    };

    let scored: ScoredDecision = match serde_json::from_str(&json_block) {
        Ok(s) => s,
        Err(e) => return Decision::skip("model_error", format!("bad model JSON: {}", e)),
    };

    Decision {
        action: Action::from_label(&scored.action),
        confidence: Confidence::from_label(&scored.confidence),
        pattern: if scored.pattern.is_empty() {
            "unspecified".to_string()
        } else {
            scored.pattern
        },
        reasoning: scored.reasoning,
    }
    .normalized()
}

/// First balanced top-level `{...}` in the text.
fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (i, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Direction, Momentum};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use updown_common::OutcomeSide;
    use updown_market::{MarketRecord, TokenRecord};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn snapshot() -> MarketSnapshot {
        let market = MarketRecord {
            condition_id: "0xabc".to_string(),
            question: "BTC up or down?".to_string(),
            slug: "btc-updown-15m-0".to_string(),
            end_time: chrono::Utc::now() + chrono::Duration::minutes(8),
            tokens: vec![
                TokenRecord { token_id: "111".to_string(), outcome: OutcomeSide::Up },
                TokenRecord { token_id: "222".to_string(), outcome: OutcomeSide::Down },
            ],
            neg_risk: false,
            tick_size: dec!(0.01),
        };
        MarketSnapshot {
            market,
            up: Default::default(),
            down: Default::default(),
            price_history: Vec::new(),
            spread: None,
        }
    }

    fn ctx() -> PriceContext {
        PriceContext {
            available: true,
            current_price: Some(dec!(100000)),
            bid: None,
            ask: None,
            direction: Direction::Rising,
            momentum: Momentum::Stable,
            change_1m: None,
            change_3m: None,
            change_5m: None,
            change_10m: None,
            recent_volatility: None,
        }
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("prefix {\"a\": {\"b\": 1}} suffix").unwrap(),
            "{\"a\": {\"b\": 1}}"
        );
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{unbalanced").is_none());
    }

    #[test]
    fn test_parse_decision_happy() {
        let d = parse_decision(
            r#"Sure! {"action": "BUY_YES", "confidence": "HIGH", "pattern": "breakout", "reasoning": "clean move"}"#,
        );
        assert_eq!(d.action, Action::BuyYes);
        assert_eq!(d.confidence, Confidence::High);
        assert_eq!(d.pattern, "breakout");
    }

    #[test]
    fn test_parse_decision_unknown_action_skips() {
        let d = parse_decision(r#"{"action": "HOLD", "confidence": "HIGH"}"#);
        assert_eq!(d.action, Action::Skip);
    }

    #[test]
    fn test_parse_decision_unknown_confidence_is_low_and_skips() {
        let d = parse_decision(r#"{"action": "BUY_YES", "confidence": "EXTREME"}"#);
        assert_eq!(d.confidence, Confidence::Low);
        assert_eq!(d.action, Action::Skip);
    }

    #[test]
    fn test_parse_decision_garbage_skips() {
        let d = parse_decision("I cannot answer that.");
        assert_eq!(d.action, Action::Skip);
        assert_eq!(d.pattern, "model_error");
    }

    #[test]
    fn test_build_prompt_includes_history_deltas() {
        let mut snap = snapshot();
        snap.price_history = vec![
            updown_market::HistoryPoint {
                at: chrono::Utc::now() - chrono::Duration::minutes(2),
                price: dec!(0.50),
            },
            updown_market::HistoryPoint {
                at: chrono::Utc::now() - chrono::Duration::minutes(1),
                price: dec!(0.55),
            },
        ];

        let prompt = ModelPolicy::build_prompt(&snap, &ctx());
        assert!(prompt.contains("UP probability by minute"));
        assert!(prompt.contains("(+0.05)"));
        assert!(prompt.contains("BUY_YES|BUY_NO|SKIP"));
    }

    #[tokio::test]
    async fn test_decide_happy_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content":
                    "{\"action\": \"BUY_NO\", \"confidence\": \"MEDIUM\", \"pattern\": \"fade\", \"reasoning\": \"overextended\"}"
                }}]
            })))
            .mount(&server)
            .await;

        let policy = ModelPolicy::new(ModelPolicyConfig::new(server.uri(), "key", "test-model"));
        let d = policy.decide(&snapshot(), &ctx()).await;
        assert_eq!(d.action, Action::BuyNo);
        assert_eq!(d.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn test_decide_http_error_skips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let policy = ModelPolicy::new(ModelPolicyConfig::new(server.uri(), "key", "test-model"));
        let d = policy.decide(&snapshot(), &ctx()).await;
        assert_eq!(d.action, Action::Skip);
        assert_eq!(d.pattern, "model_error");
    }

    #[tokio::test]
    async fn test_decide_empty_content_skips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": ""}}]
            })))
            .mount(&server)
            .await;

        let policy = ModelPolicy::new(ModelPolicyConfig::new(server.uri(), "key", "test-model"));
        let d = policy.decide(&snapshot(), &ctx()).await;
        assert_eq!(d.action, Action::Skip);
    }
}
