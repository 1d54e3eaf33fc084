//! Mirror Bot
//!
//! One polling session: page through the trader's history, admit new
//! records, mirror the qualifying ones and persist the snapshot.

pub mod session;

pub use session::{CycleReport, MirrorSession, SessionHandle, SessionStats};
