//! Pending-redemption queue and the on-chain redemption engine.

mod chain;
mod engine;
mod queue;

pub use chain::{classify_failure, normalize_condition_id, signer_from_key, ChainError, ProxyCallOutcome};
pub use engine::{RedemptionEngine, RedemptionEngineConfig};
pub use queue::{PendingCandidate, PendingRedemption, RedemptionQueue, RedemptionStatus, RedemptionTotals};
