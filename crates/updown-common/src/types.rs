//! Core market enums shared across the workspace.

use serde::{Deserialize, Serialize};

/// Reference assets with 15-minute up/down markets.
///
/// The agent trades a single asset at a time; the enum exists so the
/// discovery slug and the ticker symbol stay consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReferenceAsset {
    Btc,
    Eth,
    Sol,
    Xrp,
}

impl ReferenceAsset {
    /// Prefix used in the events-index slug (`btc-updown-15m-{ts}`).
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            ReferenceAsset::Btc => "btc",
            ReferenceAsset::Eth => "eth",
            ReferenceAsset::Sol => "sol",
            ReferenceAsset::Xrp => "xrp",
        }
    }

    /// Ticker-feed symbol (`BTC/USD` etc.).
    pub fn ticker_symbol(&self) -> &'static str {
        match self {
            ReferenceAsset::Btc => "BTC/USD",
            ReferenceAsset::Eth => "ETH/USD",
            ReferenceAsset::Sol => "SOL/USD",
            ReferenceAsset::Xrp => "XRP/USD",
        }
    }

    /// Returns the display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceAsset::Btc => "BTC",
            ReferenceAsset::Eth => "ETH",
            ReferenceAsset::Sol => "SOL",
            ReferenceAsset::Xrp => "XRP",
        }
    }
}

impl std::fmt::Display for ReferenceAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReferenceAsset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BTC" | "BITCOIN" => Ok(ReferenceAsset::Btc),
            "ETH" | "ETHEREUM" => Ok(ReferenceAsset::Eth),
            "SOL" | "SOLANA" => Ok(ReferenceAsset::Sol),
            "XRP" | "RIPPLE" => Ok(ReferenceAsset::Xrp),
            _ => Err(format!("Unknown asset: {}", s)),
        }
    }
}

/// The two outcomes of an up/down market as labeled by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeSide {
    Up,
    Down,
}

impl OutcomeSide {
    pub fn opposite(&self) -> Self {
        match self {
            OutcomeSide::Up => OutcomeSide::Down,
            OutcomeSide::Down => OutcomeSide::Up,
        }
    }

    /// Parses venue outcome labels; anything that isn't recognizably
    /// "down" is treated as the up side.
    pub fn from_label(label: &str) -> Self {
        match label.to_lowercase().as_str() {
            "down" | "no" | "lower" => OutcomeSide::Down,
            _ => OutcomeSide::Up,
        }
    }
}

impl std::fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeSide::Up => write!(f, "Up"),
            OutcomeSide::Down => write!(f, "Down"),
        }
    }
}

/// Which side of the binary market a trade takes.
///
/// YES maps to the Up outcome token, NO to the Down token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Yes,
    No,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Yes => write!(f, "YES"),
            TradeSide::No => write!(f, "NO"),
        }
    }
}
