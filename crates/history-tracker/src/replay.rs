//! Scripted page source.
//!
//! Serves a fixed sequence of table pages behind the configured locators,
//! so sessions can be driven without a browser. Clones share state, which
//! lets a test keep a handle while the session owns the source.

use crate::source::{PageSnapshot, PageSource, SourceError};
use async_trait::async_trait;
use mirror_core::config::LocatorConfig;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ReplayState {
    pages: Vec<PageSnapshot>,
    current: usize,
    loaded: bool,
    history_open: bool,
    cookie_accepted: bool,
    missing_history_tab: u32,
    opens: u32,
    reloads: u32,
    snapshots: u32,
    closed: bool,
}

#[derive(Debug, Clone)]
pub struct ReplaySource {
    locators: LocatorConfig,
    state: Arc<Mutex<ReplayState>>,
}

impl ReplaySource {
    pub fn new(locators: LocatorConfig, pages: Vec<PageSnapshot>) -> Self {
        Self {
            locators,
            state: Arc::new(Mutex::new(ReplayState {
                pages,
                ..ReplayState::default()
            })),
        }
    }

    /// Fail the next `lookups` history-tab clicks as if the tab had not rendered.
    pub fn with_missing_history_tab(self, lookups: u32) -> Self {
        self.hide_history_tab(lookups);
        self
    }

    /// Fail the next `lookups` history-tab clicks from now on.
    pub fn hide_history_tab(&self, lookups: u32) {
        self.lock().missing_history_tab = lookups;
    }

    /// Replace all pages, e.g. when the trader has placed new orders.
    pub fn set_pages(&self, pages: Vec<PageSnapshot>) {
        let mut state = self.lock();
        state.current = state.current.min(pages.len().saturating_sub(1));
        state.pages = pages;
    }

    /// One-based index of the page currently shown.
    pub fn current_page(&self) -> usize {
        self.lock().current + 1
    }

    pub fn opens(&self) -> u32 {
        self.lock().opens
    }

    pub fn reloads(&self) -> u32 {
        self.lock().reloads
    }

    pub fn snapshots(&self) -> u32 {
        self.lock().snapshots
    }

    pub fn cookie_accepted(&self) -> bool {
        self.lock().cookie_accepted
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PageSource for ReplaySource {
    async fn open(&mut self, _url: &str) -> Result<(), SourceError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SourceError::Session("session closed".to_string()));
        }
        state.loaded = true;
        state.history_open = false;
        state.current = 0;
        state.opens += 1;
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), SourceError> {
        let mut state = self.lock();
        if !state.loaded {
            return Err(SourceError::Navigation("nothing to reload".to_string()));
        }
        state.history_open = false;
        state.current = 0;
        state.reloads += 1;
        Ok(())
    }

    async fn snapshot(&mut self, rows_selector: &str) -> Result<PageSnapshot, SourceError> {
        let mut state = self.lock();
        state.snapshots += 1;
        if !state.history_open || rows_selector != self.locators.table_rows {
            return Ok(PageSnapshot::default());
        }
        Ok(state.pages.get(state.current).cloned().unwrap_or_default())
    }

    async fn click(&mut self, selector: &str) -> Result<(), SourceError> {
        let mut state = self.lock();
        if !state.loaded {
            return Err(SourceError::Session("no page loaded".to_string()));
        }

        if selector == self.locators.cookie_accept && !state.cookie_accepted {
            state.cookie_accepted = true;
            Ok(())
        } else if selector == self.locators.history_tab {
            if state.missing_history_tab > 0 {
                state.missing_history_tab -= 1;
                return Err(SourceError::missing(selector));
            }
            state.history_open = true;
            Ok(())
        } else if selector == self.locators.next_page
            && state.history_open
            && state.current + 1 < state.pages.len()
        {
            state.current += 1;
            Ok(())
        } else {
            Err(SourceError::missing(selector))
        }
    }

    async fn is_enabled(&mut self, selector: &str) -> Result<bool, SourceError> {
        let state = self.lock();
        let enabled = if selector == self.locators.next_page {
            state.history_open && state.current + 1 < state.pages.len()
        } else if selector == self.locators.history_tab {
            state.loaded && state.missing_history_tab == 0
        } else if selector == self.locators.cookie_accept {
            state.loaded && !state.cookie_accepted
        } else {
            false
        };
        Ok(enabled)
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        let mut state = self.lock();
        state.closed = true;
        state.loaded = false;
        Ok(())
    }
}
