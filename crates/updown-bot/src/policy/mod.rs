//! Decision policies.
//!
//! A policy is a value implementing one async method; the coordinator holds
//! exactly one and swapping strategies is a restart, not a code change.
//! Policies are pure with respect to state outside themselves: they may log
//! advisory events but never touch the safety ledger or the queues.

use async_trait::async_trait;

use updown_common::Decision;
use updown_market::MarketSnapshot;

use crate::feed::PriceContext;

mod model;
mod spike;

pub use model::{ModelPolicy, ModelPolicyConfig};
pub use spike::{Spike, SpikeConfig, SpikePolicy};

/// The one contract every strategy satisfies.
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    /// Maps a market snapshot plus feed context to a decision.
    ///
    /// Implementations never error: any internal failure is a `Skip`
    /// decision whose reasoning carries the cause.
    async fn decide(&self, snapshot: &MarketSnapshot, ctx: &PriceContext) -> Decision;

    /// Name shown in logs and the status endpoint.
    fn name(&self) -> &'static str;
}
