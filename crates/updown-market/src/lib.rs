//! Market plumbing for the up/down trading agent.
//!
//! This crate talks to the three off-chain services the agent depends on:
//! - the events index, for resolving the live 15-minute window to a market
//! - the CLOB REST API, for prices/books/history and authenticated orders
//! - the positions index, for enumerating redeemable positions at startup
//!
//! All clients normalize payloads into typed records at the boundary and
//! surface failures as `None`/empty rather than panics; the agent treats
//! "no data" as a normal outcome.

pub mod clob;
pub mod data;
pub mod discovery;
pub mod positions;
pub mod types;

pub use clob::{ClobCredentials, ClobOrderClient, OrderAck, OrderArgs, OrderError, OrderGateway};
pub use data::{BookSummary, HistoryPoint, MarketDataFetcher, MarketSnapshot, TokenPrice, TokenSnapshot};
pub use discovery::{DiscoveryConfig, MarketDiscovery};
pub use positions::{IndexedPosition, PositionsClient};
pub use types::{MarketRecord, TokenRecord};
