//! Mirroring session and its polling loop.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use history_tracker::{
    parse_snapshot, DedupLedger, PageSnapshot, PageSource, PageStep, PaginationWalker,
    SharedLedger, SnapshotPersistence, SnapshotStore, WalkerConfig, WalkerState,
};
use mirror_core::api::ExchangeClient;
use mirror_core::config::SessionConfig;
use mirror_core::types::{truncate_to_minute, OrderRecord};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trading_engine::{
    Decision, DecisionEngine, ExecutionStatus, ExecutorConfig, MinQuantityTable, MirrorExecutor,
};
use tracing::{debug, error, info, warn};

/// Stop signal for a running session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    running: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Ask the polling loop to stop after the current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub cycles: u64,
    pub admitted: u64,
    pub mirrored: u64,
    pub simulated: u64,
    pub failed: u64,
    pub skipped: u64,
    pub recoveries: u64,
    pub failed_recoveries: u64,
    pub saves: u64,
}

/// What one polling cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub admitted: usize,
    /// Orders handed to the executor, including failed ones.
    pub submitted: usize,
    pub skipped: usize,
    pub step: Option<PageStep>,
}

pub struct MirrorSession<S: PageSource> {
    config: SessionConfig,
    source: S,
    walker: PaginationWalker,
    ledger: SharedLedger,
    persistence: SnapshotPersistence,
    engine: DecisionEngine,
    executor: MirrorExecutor,
    running: Arc<AtomicBool>,
    stats: SessionStats,
}

impl<S: PageSource> MirrorSession<S> {
    /// Build a session from parts. Refuses invalid configuration.
    pub fn new(
        config: SessionConfig,
        source: S,
        exchange: Arc<dyn ExchangeClient>,
        min_quantities: MinQuantityTable,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        config.validate().context("invalid session configuration")?;

        let offset_secs = config.timing.source_utc_offset_mins.saturating_mul(60);
        let source_offset = FixedOffset::east_opt(offset_secs)
            .with_context(|| format!("invalid source UTC offset: {offset_secs}s"))?;

        let engine = DecisionEngine::new(config.portfolio(), Arc::new(min_quantities))
            .with_staleness(config.timing.staleness())
            .with_source_offset(source_offset);
        let executor = MirrorExecutor::new(
            exchange,
            ExecutorConfig {
                live_trading: config.live_trading,
            },
        );
        let ledger = DedupLedger::shared();
        let persistence =
            SnapshotPersistence::new(store, Arc::clone(&ledger), config.timing.retention());
        let walker = PaginationWalker::new(WalkerConfig::from_session(&config));

        Ok(Self {
            config,
            source,
            walker,
            ledger,
            persistence,
            engine,
            executor,
            running: Arc::new(AtomicBool::new(true)),
            stats: SessionStats::default(),
        })
    }

    /// Load minimum quantities from the exchange, then build the session.
    ///
    /// The source is closed when the session cannot be built.
    pub async fn connect(
        config: SessionConfig,
        mut source: S,
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        if let Err(e) = config.validate() {
            close_source(&mut source).await;
            return Err(e).context("invalid session configuration");
        }
        let min_quantities = match MinQuantityTable::fetch(exchange.as_ref()).await {
            Ok(table) => table,
            Err(e) => {
                close_source(&mut source).await;
                return Err(e).context("failed to load minimum order quantities");
            }
        };

        Self::new(config, source, exchange, min_quantities, store)
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            running: Arc::clone(&self.running),
        }
    }

    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn walker_state(&self) -> WalkerState {
        self.walker.state()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Poll until stopped, then release the page source.
    pub async fn run(mut self) -> Result<SessionStats> {
        info!(
            link = %self.config.source_link,
            live = self.executor.is_live(),
            close_only = self.config.close_only_mode,
            reverse_copy = self.config.reverse_copy,
            "Starting mirror session"
        );

        let result = self.poll().await;
        self.shutdown().await;

        if let Err(e) = &result {
            error!(error = %e, "Mirror session aborted");
        }
        info!(
            cycles = self.stats.cycles,
            admitted = self.stats.admitted,
            mirrored = self.stats.mirrored,
            simulated = self.stats.simulated,
            failed = self.stats.failed,
            skipped = self.stats.skipped,
            recoveries = self.stats.recoveries,
            saves = self.stats.saves,
            "Mirror session stopped"
        );
        result.map(|()| self.stats)
    }

    async fn poll(&mut self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            debug!("Session stopped before the first cycle");
            return Ok(());
        }
        self.start().await?;

        let interval = self.config.timing.poll_interval();
        while self.running.load(Ordering::SeqCst) {
            self.run_cycle(Utc::now()).await;
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }
        Ok(())
    }

    /// Open the history page. Failure stops the session.
    pub async fn start(&mut self) -> Result<()> {
        if let Err(e) = self.walker.start(&mut self.source).await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e).context("failed to open trade history");
        }
        Ok(())
    }

    /// Stop polling and release the page source.
    pub async fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        close_source(&mut self.source).await;
    }

    /// One pass: snapshot, parse, admit, mirror, persist, paginate.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        self.stats.cycles += 1;
        let mut report = CycleReport::default();

        if self.walker.state() == WalkerState::Recovering {
            report.step = self.step(0).await;
            return report;
        }

        let snapshot = match self.source.snapshot(self.walker.rows_selector()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Could not read trade history table");
                PageSnapshot::default()
            }
        };
        let records = parse_snapshot(&snapshot);
        let cycle_minute = self.cycle_minute(now);
        debug!(
            page = ?self.walker.page(),
            rows = snapshot.row_count(),
            parsed = records.len(),
            "Read trade history page"
        );

        // Admission, decisions and the save run under one lock so a
        // retention expiry cannot clear records between them.
        let ledger = Arc::clone(&self.ledger);
        let mut ledger = ledger.lock().await;

        let mut admitted: Vec<OrderRecord> = Vec::new();
        for record in records {
            if !self.within_window(&record, cycle_minute) {
                continue;
            }
            if ledger.admit(record.clone()) {
                info!(key = %record.key(), quantity = %record.quantity, "Added order");
                admitted.push(record);
            }
        }
        report.admitted = admitted.len();
        self.stats.admitted += admitted.len() as u64;

        for record in &admitted {
            match self.engine.evaluate(record, now) {
                Decision::Mirror(order) => {
                    let result = self.executor.submit(&order.request).await;
                    report.submitted += 1;
                    match result.status {
                        ExecutionStatus::Submitted => self.stats.mirrored += 1,
                        ExecutionStatus::Simulated => self.stats.simulated += 1,
                        ExecutionStatus::Failed => self.stats.failed += 1,
                    }
                }
                Decision::Skip(_) => {
                    report.skipped += 1;
                    self.stats.skipped += 1;
                }
            }
        }

        if !admitted.is_empty() {
            match self.persistence.persist(&ledger) {
                Ok(_) => self.stats.saves += 1,
                Err(e) => error!(error = %e, "Failed to save snapshot"),
            }
        }
        drop(ledger);

        report.step = self.step(admitted.len()).await;
        report
    }

    async fn step(&mut self, admitted: usize) -> Option<PageStep> {
        let step = match self.walker.step(&mut self.source, admitted).await {
            Ok(step) => Some(step),
            Err(e) => {
                self.stats.failed_recoveries += 1;
                warn!(error = %e, "Return to first page failed, retrying next cycle");
                None
            }
        };
        self.stats.recoveries = self.walker.recoveries();
        step
    }

    /// Evaluation time in the source's wall clock, truncated to the minute.
    fn cycle_minute(&self, now: DateTime<Utc>) -> chrono::NaiveDateTime {
        let offset_secs = self.config.timing.source_utc_offset_mins.saturating_mul(60);
        let local = match FixedOffset::east_opt(offset_secs) {
            Some(offset) => now.with_timezone(&offset).naive_local(),
            None => now.naive_utc(),
        };
        truncate_to_minute(local)
    }

    fn within_window(&self, record: &OrderRecord, cycle_minute: chrono::NaiveDateTime) -> bool {
        let distance = (cycle_minute - record.minute()).num_minutes().abs();
        distance <= self.config.timing.admission_window_mins
    }
}

async fn close_source<S: PageSource>(source: &mut S) {
    if let Err(e) = source.close().await {
        warn!(error = %e, "Failed to close page source");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use history_tracker::{MemoryStore, ReplaySource};
    use mirror_core::types::{ExchangeInfo, MarketOrderRequest, OrderAck};
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExchange {
        orders: Mutex<Vec<MarketOrderRequest>>,
    }

    #[async_trait]
    impl ExchangeClient for RecordingExchange {
        async fn exchange_info(&self) -> mirror_core::Result<ExchangeInfo> {
            Ok(ExchangeInfo::default())
        }

        async fn submit_market_order(
            &self,
            request: &MarketOrderRequest,
        ) -> mirror_core::Result<OrderAck> {
            let mut orders = self.orders.lock().unwrap();
            orders.push(request.clone());
            Ok(OrderAck {
                order_id: orders.len() as i64,
                symbol: request.symbol.clone(),
                status: "NEW".to_string(),
                executed_qty: Decimal::ZERO,
            })
        }
    }

    fn row(time: &str, side: &str, profit: &str) -> Vec<String> {
        [time, "BTCUSDT Perpetual", side, "50,000", "0.5", profit]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 20).unwrap()
    }

    fn session(
        config: SessionConfig,
        pages: Vec<PageSnapshot>,
        exchange: Arc<RecordingExchange>,
    ) -> MirrorSession<ReplaySource> {
        let source = ReplaySource::new(config.locators.clone(), pages);
        let table = MinQuantityTable::new().with_symbol("BTCUSDT", Decimal::new(1, 3));
        MirrorSession::new(config, source, exchange, table, Arc::new(MemoryStore::new())).unwrap()
    }

    fn live_config() -> SessionConfig {
        let mut config = SessionConfig::for_testing("https://example.com/trader");
        config.live_trading = true;
        config
    }

    #[tokio::test]
    async fn test_cycle_admits_and_mirrors() {
        let exchange = Arc::new(RecordingExchange::default());
        let pages = vec![
            PageSnapshot {
                rows: Some(vec![
                    row("2024-01-01 10:00:00", "Open long", "0"),
                    row("2024-01-01 10:00:05", "Close short", "12.5 USDT"),
                ]),
            },
            PageSnapshot {
                rows: Some(vec![row("2024-01-01 09:59:50", "Open short", "0")]),
            },
        ];
        let mut session = session(live_config(), pages, exchange.clone());
        session.start().await.unwrap();

        let report = session.run_cycle(now()).await;
        assert_eq!(report.admitted, 2);
        assert_eq!(report.submitted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            report.step,
            Some(PageStep::Recovered {
                reason: history_tracker::RecoveryReason::NoNextPage
            })
        );

        let orders = exchange.orders.lock().unwrap().clone();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].quantity, Decimal::new(1, 2));
        assert_eq!(session.stats().mirrored, 1);
        assert_eq!(session.stats().saves, 1);
    }

    #[tokio::test]
    async fn test_repeat_cycle_admits_nothing_and_recovers() {
        let exchange = Arc::new(RecordingExchange::default());
        let pages = vec![PageSnapshot {
            rows: Some(vec![row("2024-01-01 10:00:00", "Open long", "0")]),
        }];
        let mut session = session(live_config(), pages, exchange.clone());
        session.start().await.unwrap();

        session.run_cycle(now()).await;
        let report = session.run_cycle(now()).await;

        assert_eq!(report.admitted, 0);
        assert_eq!(
            report.step,
            Some(PageStep::Recovered {
                reason: history_tracker::RecoveryReason::NoNewData
            })
        );
        assert_eq!(exchange.orders.lock().unwrap().len(), 1);
        assert_eq!(session.ledger().lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rows_outside_window_are_not_admitted() {
        let exchange = Arc::new(RecordingExchange::default());
        let pages = vec![PageSnapshot {
            rows: Some(vec![row("2024-01-01 09:50:00", "Open long", "0")]),
        }];
        let mut session = session(live_config(), pages, exchange.clone());
        session.start().await.unwrap();

        let report = session.run_cycle(now()).await;
        assert_eq!(report.admitted, 0);
        assert!(session.ledger().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_refused() {
        let mut config = live_config();
        config.api_key.clear();
        let source = ReplaySource::new(config.locators.clone(), vec![]);
        let result = MirrorSession::new(
            config,
            source,
            Arc::new(RecordingExchange::default()),
            MinQuantityTable::new(),
            Arc::new(MemoryStore::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stopped_session_closes_source() {
        let exchange = Arc::new(RecordingExchange::default());
        let session = session(live_config(), vec![PageSnapshot::default()], exchange);
        let source = session.source().clone();
        let handle = session.handle();
        handle.stop();

        let stats = session.run().await.unwrap();
        assert_eq!(stats.cycles, 0);
        assert_eq!(source.opens(), 0);
        assert!(source.is_closed());
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_start_failure_closes_source() {
        let config = live_config();
        let source = ReplaySource::new(config.locators.clone(), vec![]).with_missing_history_tab(1000);
        let handle_source = source.clone();
        let session = MirrorSession::new(
            config,
            source,
            Arc::new(RecordingExchange::default()),
            MinQuantityTable::new(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        let handle = session.handle();

        assert!(session.run().await.is_err());
        assert!(handle_source.is_closed());
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_exhausted_recovery_retries_next_cycle() {
        let exchange = Arc::new(RecordingExchange::default());
        let pages = vec![PageSnapshot {
            rows: Some(vec![row("2024-01-01 10:00:00", "Open long", "0")]),
        }];
        let mut session = session(live_config(), pages, exchange.clone());
        session.start().await.unwrap();

        // Five load attempts with three clicks each.
        session.source().hide_history_tab(15);
        let first = session.run_cycle(now()).await;
        assert_eq!(first.admitted, 1);
        assert_eq!(first.step, None);
        assert_eq!(session.walker_state(), WalkerState::Recovering);
        assert_eq!(session.stats().failed_recoveries, 1);
        assert!(session.handle().is_running());

        let second = session.run_cycle(now()).await;
        assert_eq!(second.admitted, 0);
        assert_eq!(
            second.step,
            Some(PageStep::Recovered {
                reason: history_tracker::RecoveryReason::PreviousRecoveryFailed
            })
        );
        assert_eq!(session.walker_state(), WalkerState::OnPage(1));
        assert_eq!(session.stats().failed_recoveries, 1);
        assert_eq!(session.stats().recoveries, 2);
        assert_eq!(exchange.orders.lock().unwrap().len(), 1);
    }
}
