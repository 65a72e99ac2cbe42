//! Configuration for the up/down agent.
//!
//! Supports loading from a TOML file with environment variable overrides;
//! credentials only ever come from the environment.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

use updown_common::ReferenceAsset;

/// Which decision strategy drives the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Deterministic spike detector on the reference feed.
    Spike,
    /// External model-scored policy.
    Model,
}

impl Strategy {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spike" => Some(Strategy::Spike),
            "model" => Some(Strategy::Model),
            _ => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Spike => write!(f, "spike"),
            Strategy::Model => write!(f, "model"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// The single reference asset traded.
    pub asset: ReferenceAsset,
    pub strategy: Strategy,
    pub log_level: String,
    /// HTTP API listen port.
    pub api_port: u16,

    /// Coordinator tick period, seconds.
    pub scan_interval_secs: u64,
    /// HIGH-confidence trade size in dollars; MEDIUM gets half.
    pub max_trade_size: Decimal,
    /// Cumulative daily loss cap in dollars.
    pub daily_loss_limit: Decimal,
    /// Cap on losing trades per day.
    pub max_daily_losses: u32,
    /// Entry gate: the chosen side's mid must not exceed this.
    pub max_entry_price: Decimal,

    /// Spike strategy thresholds.
    pub spike_threshold: Decimal,
    pub min_spike_speed: Decimal,

    /// Model policy endpoint (chat-completions style).
    pub model_api_url: String,
    pub model_name: String,

    /// Primary chain RPC; the engine falls back to a built-in list.
    pub polygon_rpc_url: String,
    /// Static proxy-wallet fallback.
    pub known_proxy_wallet: Option<String>,

    /// Credentials; environment only, never in the TOML file.
    pub wallet_private_key: Option<String>,
    pub clob_api_key: Option<String>,
    pub clob_api_secret: Option<String>,
    pub clob_api_passphrase: Option<String>,
    pub model_api_key: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            asset: ReferenceAsset::Btc,
            strategy: Strategy::Spike,
            log_level: "info".to_string(),
            api_port: 3000,
            scan_interval_secs: 30,
            max_trade_size: Decimal::new(10, 0),
            daily_loss_limit: Decimal::new(50, 0),
            max_daily_losses: 6,
            max_entry_price: Decimal::new(45, 2),
            spike_threshold: Decimal::new(30, 0),
            min_spike_speed: Decimal::new(15, 0),
            model_api_url: "https://api.openai.com/v1".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            polygon_rpc_url: "https://polygon-rpc.com".to_string(),
            known_proxy_wallet: None,
            wallet_private_key: None,
            clob_api_key: None,
            clob_api_secret: None,
            clob_api_passphrase: None,
            model_api_key: None,
        }
    }
}

impl BotConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        Ok(Self::from(file))
    }

    /// Applies the environment overrides enumerated in the runbook.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SCAN_INTERVAL") {
            if let Ok(secs) = v.parse() {
                self.scan_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("MAX_TRADE_SIZE") {
            if let Ok(size) = v.parse() {
                self.max_trade_size = size;
            }
        }
        if let Ok(v) = std::env::var("DAILY_LOSS_LIMIT") {
            if let Ok(limit) = v.parse() {
                self.daily_loss_limit = limit;
            }
        }
        if let Ok(v) = std::env::var("MAX_DAILY_LOSSES") {
            if let Ok(count) = v.parse() {
                self.max_daily_losses = count;
            }
        }
        if let Ok(v) = std::env::var("SPIKE_THRESHOLD") {
            if let Ok(threshold) = v.parse() {
                self.spike_threshold = threshold;
            }
        }
        if let Ok(v) = std::env::var("MIN_SPIKE_SPEED") {
            if let Ok(speed) = v.parse() {
                self.min_spike_speed = speed;
            }
        }
        if let Ok(v) = std::env::var("MAX_ENTRY_PRICE") {
            if let Ok(price) = v.parse() {
                self.max_entry_price = price;
            }
        }
        if let Ok(v) = std::env::var("POLYGON_RPC_URL") {
            self.polygon_rpc_url = v;
        }
        if let Ok(v) = std::env::var("KNOWN_PROXY_WALLET") {
            self.known_proxy_wallet = Some(v);
        }

        if let Ok(v) = std::env::var("WALLET_PRIVATE_KEY") {
            self.wallet_private_key = Some(v);
        }
        if let Ok(v) = std::env::var("POLY_API_KEY") {
            self.clob_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("POLY_API_SECRET") {
            self.clob_api_secret = Some(v);
        }
        if let Ok(v) = std::env::var("POLY_API_PASSPHRASE") {
            self.clob_api_passphrase = Some(v);
        }
        if let Ok(v) = std::env::var("MODEL_API_KEY") {
            self.model_api_key = Some(v);
        }
    }

    /// Validates values and required credentials.
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs < 5 {
            bail!("scan_interval_secs must be at least 5");
        }
        if self.max_trade_size <= Decimal::ZERO {
            bail!("max_trade_size must be positive");
        }
        if self.daily_loss_limit <= Decimal::ZERO {
            bail!("daily_loss_limit must be positive");
        }
        if self.max_daily_losses == 0 {
            bail!("max_daily_losses must be at least 1");
        }
        if self.max_entry_price <= Decimal::ZERO || self.max_entry_price > Decimal::ONE {
            bail!("max_entry_price must be in (0, 1]");
        }
        if self.spike_threshold <= Decimal::ZERO || self.min_spike_speed <= Decimal::ZERO {
            bail!("spike thresholds must be positive");
        }

        if self.wallet_private_key.is_none() {
            bail!("WALLET_PRIVATE_KEY environment variable is required");
        }
        if self.clob_api_key.is_none() || self.clob_api_secret.is_none() || self.clob_api_passphrase.is_none() {
            bail!("POLY_API_KEY, POLY_API_SECRET, and POLY_API_PASSPHRASE are required");
        }
        if self.strategy == Strategy::Model && self.model_api_key.is_none() {
            bail!("MODEL_API_KEY is required for the model strategy");
        }

        Ok(())
    }
}

// ============================================================================
// TOML deserialization structures
// ============================================================================

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    #[serde(default)]
    general: GeneralToml,
    #[serde(default)]
    trading: TradingToml,
    #[serde(default)]
    spike: SpikeToml,
    #[serde(default)]
    model: ModelToml,
    #[serde(default)]
    chain: ChainToml,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralToml {
    asset: String,
    strategy: String,
    log_level: String,
    api_port: u16,
}

impl Default for GeneralToml {
    fn default() -> Self {
        Self {
            asset: "BTC".to_string(),
            strategy: "spike".to_string(),
            log_level: "info".to_string(),
            api_port: 3000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TradingToml {
    scan_interval_secs: u64,
    max_trade_size: f64,
    daily_loss_limit: f64,
    max_daily_losses: u32,
    max_entry_price: f64,
}

impl Default for TradingToml {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            max_trade_size: 10.0,
            daily_loss_limit: 50.0,
            max_daily_losses: 6,
            max_entry_price: 0.45,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SpikeToml {
    threshold: f64,
    min_speed: f64,
}

impl Default for SpikeToml {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            min_speed: 15.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ModelToml {
    api_url: String,
    model: String,
}

impl Default for ModelToml {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ChainToml {
    polygon_rpc_url: String,
    known_proxy_wallet: Option<String>,
}

impl Default for ChainToml {
    fn default() -> Self {
        Self {
            polygon_rpc_url: "https://polygon-rpc.com".to_string(),
            known_proxy_wallet: None,
        }
    }
}

fn f64_to_decimal(val: f64) -> Decimal {
    Decimal::try_from(val).unwrap_or(Decimal::ZERO)
}

impl From<TomlConfig> for BotConfig {
    fn from(toml: TomlConfig) -> Self {
        let defaults = BotConfig::default();
        Self {
            asset: toml.general.asset.parse().unwrap_or(ReferenceAsset::Btc),
            strategy: Strategy::from_str(&toml.general.strategy).unwrap_or(Strategy::Spike),
            log_level: toml.general.log_level,
            api_port: toml.general.api_port,
            scan_interval_secs: toml.trading.scan_interval_secs,
            max_trade_size: f64_to_decimal(toml.trading.max_trade_size),
            daily_loss_limit: f64_to_decimal(toml.trading.daily_loss_limit),
            max_daily_losses: toml.trading.max_daily_losses,
            max_entry_price: f64_to_decimal(toml.trading.max_entry_price),
            spike_threshold: f64_to_decimal(toml.spike.threshold),
            min_spike_speed: f64_to_decimal(toml.spike.min_speed),
            model_api_url: toml.model.api_url,
            model_name: toml.model.model,
            polygon_rpc_url: toml.chain.polygon_rpc_url,
            known_proxy_wallet: toml.chain.known_proxy_wallet,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn with_credentials(mut config: BotConfig) -> BotConfig {
        config.wallet_private_key = Some("0xkey".to_string());
        config.clob_api_key = Some("k".to_string());
        config.clob_api_secret = Some("s".to_string());
        config.clob_api_passphrase = Some("p".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert_eq!(config.asset, ReferenceAsset::Btc);
        assert_eq!(config.strategy, Strategy::Spike);
        assert_eq!(config.max_entry_price, dec!(0.45));
        assert_eq!(config.spike_threshold, dec!(30));
        assert_eq!(config.min_spike_speed, dec!(15));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [general]
            asset = "ETH"
            strategy = "model"
            log_level = "debug"
            api_port = 8080

            [trading]
            scan_interval_secs = 60
            max_trade_size = 25.0
            max_entry_price = 0.40

            [spike]
            threshold = 45.0

            [chain]
            polygon_rpc_url = "https://rpc.example.com"
            known_proxy_wallet = "0xproxy"
        "#;

        let config = BotConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.asset, ReferenceAsset::Eth);
        assert_eq!(config.strategy, Strategy::Model);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.scan_interval_secs, 60);
        assert_eq!(config.max_trade_size, dec!(25));
        assert_eq!(config.max_entry_price, dec!(0.40));
        assert_eq!(config.spike_threshold, dec!(45));
        // Unset sections keep defaults.
        assert_eq!(config.min_spike_speed, dec!(15));
        assert_eq!(config.polygon_rpc_url, "https://rpc.example.com");
        assert_eq!(config.known_proxy_wallet.as_deref(), Some("0xproxy"));
    }

    #[test]
    fn test_validate_requires_credentials() {
        let config = BotConfig::default();
        assert!(config.validate().is_err());
        assert!(with_credentials(BotConfig::default()).validate().is_ok());
    }

    #[test]
    fn test_validate_model_strategy_needs_key() {
        let mut config = with_credentials(BotConfig::default());
        config.strategy = Strategy::Model;
        assert!(config.validate().is_err());
        config.model_api_key = Some("mk".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bounds() {
        let mut config = with_credentials(BotConfig::default());
        config.max_entry_price = dec!(1.5);
        assert!(config.validate().is_err());

        let mut config = with_credentials(BotConfig::default());
        config.scan_interval_secs = 1;
        assert!(config.validate().is_err());

        let mut config = with_credentials(BotConfig::default());
        config.max_trade_size = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_strategy_defaults_to_spike() {
        let config = BotConfig::from_toml_str("[general]\nstrategy = \"yolo\"\n").unwrap();
        assert_eq!(config.strategy, Strategy::Spike);
    }
}
