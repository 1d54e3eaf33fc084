//! Pagination over the trade-history table.
//!
//! The walker owns the page counter. Each polling cycle reports how many
//! records it admitted; the walker then either advances to the next page or
//! returns to the first one.

use crate::source::{click_with_retry, PageSource, RetryPolicy, SourceError};
use mirror_core::config::{LocatorConfig, SessionConfig};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    OnPage(u32),
    Recovering,
}

/// Why the walker went back to the first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    /// The cycle admitted no new records.
    NoNewData,
    /// Advanced, but the page after this one does not exist.
    NoNextPage,
    /// The next-page control could not be clicked.
    AdvanceFailed,
    /// An earlier recovery ran out of attempts.
    PreviousRecoveryFailed,
}

impl fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RecoveryReason::NoNewData => "no new data",
            RecoveryReason::NoNextPage => "no next page",
            RecoveryReason::AdvanceFailed => "advance failed",
            RecoveryReason::PreviousRecoveryFailed => "previous recovery failed",
        };
        f.write_str(reason)
    }
}

/// Outcome of one walker step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStep {
    Advanced { page: u32 },
    Recovered { reason: RecoveryReason },
}

#[derive(Debug, Error)]
pub enum WalkerError {
    /// Bounded reload attempts ran out. The walker stays in `Recovering`.
    #[error("could not return to the first page after {attempts} attempts: {last}")]
    RecoveryExhausted {
        attempts: u32,
        #[source]
        last: SourceError,
    },
}

#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub link: String,
    pub locators: LocatorConfig,
    pub element_retry: RetryPolicy,
    pub settle_delay: Duration,
    pub max_recovery_attempts: u32,
}

impl WalkerConfig {
    pub fn from_session(config: &SessionConfig) -> Self {
        Self {
            link: config.source_link.clone(),
            locators: config.locators.clone(),
            element_retry: RetryPolicy {
                attempts: config.timing.element_retry_attempts,
                backoff: config.timing.element_retry_backoff(),
            },
            settle_delay: config.timing.settle_delay(),
            max_recovery_attempts: config.timing.max_recovery_attempts,
        }
    }
}

/// Page-sequence state machine: `OnPage(n)` and `Recovering`.
pub struct PaginationWalker {
    config: WalkerConfig,
    state: WalkerState,
    recoveries: u64,
}

impl PaginationWalker {
    pub fn new(config: WalkerConfig) -> Self {
        Self {
            config,
            state: WalkerState::OnPage(1),
            recoveries: 0,
        }
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    /// Current page, or `None` while recovering.
    pub fn page(&self) -> Option<u32> {
        match self.state {
            WalkerState::OnPage(page) => Some(page),
            WalkerState::Recovering => None,
        }
    }

    /// Number of returns to the first page started so far.
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    pub fn rows_selector(&self) -> &str {
        &self.config.locators.table_rows
    }

    /// Open the trader's page, dismiss the cookie banner and show the history tab.
    pub async fn start<S>(&mut self, source: &mut S) -> Result<(), WalkerError>
    where
        S: PageSource + ?Sized,
    {
        info!(link = %self.config.link, "Opening trade history");
        self.load_history(source, true).await?;
        self.state = WalkerState::OnPage(1);
        Ok(())
    }

    /// Decide what to do after a cycle that admitted `admitted` records.
    pub async fn step<S>(&mut self, source: &mut S, admitted: usize) -> Result<PageStep, WalkerError>
    where
        S: PageSource + ?Sized,
    {
        let page = match self.state {
            WalkerState::OnPage(page) => page,
            WalkerState::Recovering => {
                return self
                    .recover(source, RecoveryReason::PreviousRecoveryFailed)
                    .await
            }
        };

        if admitted == 0 {
            debug!(page, "No new data found on current page");
            return self.recover(source, RecoveryReason::NoNewData).await;
        }

        let next_page = &self.config.locators.next_page;
        if let Err(e) = click_with_retry(source, next_page, self.config.element_retry).await {
            warn!(page, error = %e, "Could not advance to next page");
            return self.recover(source, RecoveryReason::AdvanceFailed).await;
        }
        self.settle().await;

        let page = page + 1;
        self.state = WalkerState::OnPage(page);
        debug!(page, "Navigated to next page");

        let has_next = match source.is_enabled(next_page).await {
            Ok(enabled) => enabled,
            Err(e) => {
                debug!(error = %e, "Next-page lookup failed");
                false
            }
        };
        if !has_next {
            return self.recover(source, RecoveryReason::NoNextPage).await;
        }

        Ok(PageStep::Advanced { page })
    }

    /// Reload from the link, re-open the history tab and reset to page 1.
    pub async fn recover<S>(
        &mut self,
        source: &mut S,
        reason: RecoveryReason,
    ) -> Result<PageStep, WalkerError>
    where
        S: PageSource + ?Sized,
    {
        let from_page = self.page();
        self.state = WalkerState::Recovering;
        self.recoveries += 1;
        info!(reason = %reason, from_page = ?from_page, "Returning to first page");

        self.load_history(source, false).await?;
        self.state = WalkerState::OnPage(1);
        Ok(PageStep::Recovered { reason })
    }

    /// Open the link and click the history tab, reloading between failed attempts.
    async fn load_history<S>(&self, source: &mut S, accept_cookies: bool) -> Result<(), WalkerError>
    where
        S: PageSource + ?Sized,
    {
        let attempts = self.config.max_recovery_attempts;
        let history_tab = &self.config.locators.history_tab;
        let mut last = SourceError::missing(history_tab.as_str());

        for attempt in 1..=attempts {
            let loaded = if attempt == 1 {
                source.open(&self.config.link).await
            } else {
                source.reload().await
            };
            if let Err(e) = loaded {
                warn!(attempt, max_attempts = attempts, error = %e, "Page load failed");
                last = e;
                continue;
            }
            self.settle().await;

            if accept_cookies && attempt == 1 {
                self.accept_cookies(source).await;
            }

            match click_with_retry(source, history_tab, self.config.element_retry).await {
                Ok(()) => {
                    self.settle().await;
                    debug!("Navigated to trade history tab");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Trade history tab not found, refreshing");
                    last = e;
                }
            }
        }

        Err(WalkerError::RecoveryExhausted { attempts, last })
    }

    async fn accept_cookies<S>(&self, source: &mut S)
    where
        S: PageSource + ?Sized,
    {
        let selector = &self.config.locators.cookie_accept;
        match click_with_retry(source, selector, self.config.element_retry).await {
            Ok(()) => {
                debug!("Accepted cookies");
                self.settle().await;
            }
            Err(e) => warn!(error = %e, "Cookie banner not dismissed"),
        }
    }

    async fn settle(&self) {
        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }
    }
}
