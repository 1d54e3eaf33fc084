//! Trading Engine
//!
//! Decides which scraped orders to mirror, sizes them against the
//! exchange's minimum quantities and submits them as market orders.

pub mod decision;
pub mod executor;
pub mod quantity;

pub use decision::{
    Decision, DecisionEngine, MirrorOrder, PortfolioRatioSizer, PositionSizer, SizingError,
    SkipReason,
};
pub use executor::{ExecutionMetrics, ExecutionStatus, ExecutorConfig, MirrorExecutor, MirrorReport};
pub use quantity::MinQuantityTable;
