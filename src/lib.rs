//! Trade Mirror: futures trade-history mirroring bot
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the workspace. For actual functionality, use the individual crates:
//!
//! - `mirror-core`: Core types, configuration, Binance futures client
//! - `history-tracker`: Page sources, snapshot parsing, dedup ledger, pagination, persistence
//! - `trading-engine`: Minimum quantities, mirror decisions, order execution
//! - `mirror-bot`: Polling session and CLI

pub use history_tracker as history;
pub use mirror_bot as bot;
pub use mirror_core as core;
pub use trading_engine as trading;
