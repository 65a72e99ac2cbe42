//! Shared types for the up/down trading agent.
//!
//! This crate contains:
//! - Common market types (ReferenceAsset, OutcomeSide, TradeSide)
//! - Decision types exchanged between policies and the coordinator
//! - Trade records and the window-key helpers used for per-window dedup
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod decision;
pub mod trade;
pub mod types;
pub mod window;

pub use decision::{Action, Confidence, Decision};
pub use trade::{TradeRecord, TradeResult};
pub use types::{OutcomeSide, ReferenceAsset, TradeSide};
pub use window::window_key;
