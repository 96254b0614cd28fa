//! Trade P&L Engine
//!
//! Incremental enrichment of executed trades against a position snapshot,
//! idempotent daily P&L aggregation per account/symbol, and portfolio facts
//! joining realized and unrealized P&L.

pub mod aggregator;
pub mod config;
pub mod data;
pub mod enricher;
pub mod facts;
pub mod ledger;
pub mod pipeline;
pub mod store;
pub mod types;

pub use aggregator::MetricsAggregator;
pub use config::Config;
pub use enricher::{EnrichmentReport, TradeEnricher};
pub use facts::PortfolioFactBuilder;
pub use ledger::{PositionLedger, PositionSnapshot};
pub use pipeline::{PnlPipeline, RunReport};
pub use store::{Checkpoint, InMemoryStore, PnlStore, SqliteStore};
pub use types::*;
