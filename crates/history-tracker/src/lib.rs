//! History Tracker
//!
//! Turns a paginated, periodically refreshed trade-history page into a
//! deduplicated stream of executed-order records.

pub mod ledger;
pub mod parser;
pub mod persistence;
pub mod replay;
pub mod source;
pub mod walker;
pub mod webdriver;

pub use ledger::{DedupLedger, SharedLedger};
pub use parser::parse_snapshot;
pub use persistence::{JsonFileStore, MemoryStore, SnapshotPersistence, SnapshotStore};
pub use replay::ReplaySource;
pub use source::{PageSnapshot, PageSource, RetryPolicy, SourceError};
pub use walker::{PageStep, PaginationWalker, RecoveryReason, WalkerConfig, WalkerError, WalkerState};
pub use webdriver::WebDriverSource;
