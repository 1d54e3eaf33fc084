//! Deduplication ledger for executed-order records.

use mirror_core::types::{aggregate_records, OrderKey, OrderRecord};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Ledger shared between the polling loop and the retention timer.
pub type SharedLedger = Arc<Mutex<DedupLedger>>;

/// Records admitted during a session, keyed by order identity.
///
/// The identity set only grows. The accumulated records are cleared by
/// snapshot retention, which does not make their keys admissible again.
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: HashSet<OrderKey>,
    records: Vec<OrderRecord>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedLedger {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Admit a record unless its identity has been seen this session.
    pub fn admit(&mut self, record: OrderRecord) -> bool {
        if !self.seen.insert(record.key()) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn contains(&self, key: &OrderKey) -> bool {
        self.seen.contains(key)
    }

    /// Records accumulated since the last retention expiry, in admission order.
    pub fn records(&self) -> &[OrderRecord] {
        &self.records
    }

    /// Accumulated records summed by identity key.
    pub fn aggregated(&self) -> Vec<OrderRecord> {
        aggregate_records(&self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of identities ever admitted.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Drop accumulated records, returning how many were cleared.
    pub fn clear_records(&mut self) -> usize {
        let cleared = self.records.len();
        self.records.clear();
        cleared
    }
}
