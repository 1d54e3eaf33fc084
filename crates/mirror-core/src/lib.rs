//! Mirror Core Library
//!
//! Shared types, configuration and the futures exchange client used by the
//! trade mirror.

pub mod api;
pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
