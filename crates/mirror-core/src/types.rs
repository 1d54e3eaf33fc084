//! Core domain types for the trade mirror.

pub mod exchange;
pub mod order;
pub mod portfolio;
pub mod record;

pub use exchange::*;
pub use order::*;
pub use portfolio::*;
pub use record::*;
