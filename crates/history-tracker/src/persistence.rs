//! Snapshot persistence with a retention window.
//!
//! Every save overwrites the snapshot with the ledger's aggregated records and
//! re-arms a single expiry timer. When the timer fires it clears the ledger's
//! records and overwrites the snapshot with an empty list.

use crate::ledger::{DedupLedger, SharedLedger};
use mirror_core::types::OrderRecord;
use mirror_core::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Durable home of the aggregated snapshot.
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot.
    fn save(&self, records: &[OrderRecord]) -> Result<()>;

    fn load(&self) -> Result<Vec<OrderRecord>>;
}

/// Pretty-printed JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, records: &[OrderRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        // Write then rename so readers never see a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<OrderRecord>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryContents {
    records: Vec<OrderRecord>,
    saves: usize,
}

/// In-process store that counts saves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    contents: Mutex<MemoryContents>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> MutexGuard<'_, MemoryContents> {
        self.contents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotStore for MemoryStore {
    fn save(&self, records: &[OrderRecord]) -> Result<()> {
        let mut contents = self.lock();
        contents.records = records.to_vec();
        contents.saves += 1;
        Ok(())
    }

    fn load(&self) -> Result<Vec<OrderRecord>> {
        Ok(self.lock().records.clone())
    }
}

/// Writes ledger snapshots and owns the retention timer.
pub struct SnapshotPersistence {
    store: Arc<dyn SnapshotStore>,
    ledger: SharedLedger,
    retention: Duration,
    expiry: Option<JoinHandle<()>>,
}

impl SnapshotPersistence {
    pub fn new(store: Arc<dyn SnapshotStore>, ledger: SharedLedger, retention: Duration) -> Self {
        Self {
            store,
            ledger,
            retention,
            expiry: None,
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Lock the ledger and persist it.
    pub async fn save(&mut self) -> Result<usize> {
        let ledger = Arc::clone(&self.ledger);
        let guard = ledger.lock().await;
        self.persist(&guard)
    }

    /// Persist an already-locked ledger and restart the retention window.
    ///
    /// Callers hold the ledger lock, so a pending expiry cannot interleave
    /// with the write.
    pub fn persist(&mut self, ledger: &DedupLedger) -> Result<usize> {
        let aggregated = ledger.aggregated();
        self.store.save(&aggregated)?;
        info!(records = aggregated.len(), "Orders saved to snapshot");
        self.arm_expiry();
        Ok(aggregated.len())
    }

    /// Whether a retention timer is pending.
    pub fn expiry_pending(&self) -> bool {
        self.expiry.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn arm_expiry(&mut self) {
        if let Some(previous) = self.expiry.take() {
            previous.abort();
        }

        let store = Arc::clone(&self.store);
        let ledger = Arc::clone(&self.ledger);
        let retention = self.retention;

        self.expiry = Some(tokio::spawn(async move {
            tokio::time::sleep(retention).await;

            let mut ledger = ledger.lock().await;
            let cleared = ledger.clear_records();
            match store.save(&[]) {
                Ok(()) => info!(
                    cleared,
                    retention_secs = retention.as_secs(),
                    "Retention expired, snapshot cleared"
                ),
                Err(e) => error!(error = %e, "Failed to clear snapshot"),
            }
        }));
        debug!(retention_secs = retention.as_secs(), "Retention timer armed");
    }
}

impl Drop for SnapshotPersistence {
    fn drop(&mut self) {
        if let Some(expiry) = self.expiry.take() {
            expiry.abort();
        }
    }
}
