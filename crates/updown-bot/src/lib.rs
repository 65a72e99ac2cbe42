//! Autonomous trading agent for 15-minute up/down prediction markets.
//!
//! The agent runs a handful of cooperating subsystems around a shared
//! in-memory safety ledger:
//!
//! - `feed`: reconnecting ticker WebSocket with a bounded price history
//! - `safety`: daily counters, per-window dedup, kill switch, sizing
//! - `policy`: pluggable decision strategies (spike detector, model-scored)
//! - `executor`: order placement with an explicit retry policy
//! - `redemption`: on-chain redemption of resolved positions, with a
//!   neg-risk-adapter → conditional-tokens fallback ladder
//! - `coordinator`: the periodic scan tick that ties everything together
//! - `api`: the read-model and control HTTP surface
//!
//! Nothing is persisted; state is reconstructed from on-chain queries at
//! startup via `positions`.

pub mod activity;
pub mod api;
pub mod config;
pub mod coordinator;
pub mod executor;
pub mod feed;
pub mod policy;
pub mod positions;
pub mod redemption;
pub mod safety;
pub mod state;

pub use activity::{ActivityBus, ActivityEntry, ActivityKind};
pub use config::BotConfig;
pub use coordinator::Coordinator;
pub use executor::{OrderExecutor, RetryPolicy};
pub use feed::{PriceContext, PriceFeed, PriceFeedHandle};
pub use policy::{DecisionPolicy, ModelPolicy, SpikePolicy};
pub use redemption::{PendingRedemption, RedemptionEngine, RedemptionQueue, RedemptionStatus};
pub use safety::SafetyLedger;
pub use state::AppState;
