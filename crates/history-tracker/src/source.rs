//! Page-source seam between the polling loop and the rendering browser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Rendered trade-history table, one entry of cell texts per row.
///
/// `rows` is `None` when the table is not on the page at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub rows: Option<Vec<Vec<String>>>,
}

impl PageSnapshot {
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            rows: Some(
                rows.into_iter()
                    .map(|row| row.into_iter().map(Into::into).collect())
                    .collect(),
            ),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.as_ref().map_or(0, Vec::len)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("element not found: {selector}")]
    ElementMissing { selector: String },

    #[error("element {selector} not found after {attempts} attempts")]
    RetriesExhausted { selector: String, attempts: u32 },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser session error: {0}")]
    Session(String),

    #[error("browser driver request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl SourceError {
    pub fn missing(selector: impl Into<String>) -> Self {
        Self::ElementMissing {
            selector: selector.into(),
        }
    }

    /// Whether retrying after a pause may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ElementMissing { .. })
    }
}

/// A browser-like view of the trader's trade history.
#[async_trait]
pub trait PageSource: Send {
    /// Load `url` from scratch.
    async fn open(&mut self, url: &str) -> Result<(), SourceError>;

    /// Reload the current page.
    async fn reload(&mut self) -> Result<(), SourceError>;

    /// Cell texts of every row matched by `rows_selector`.
    async fn snapshot(&mut self, rows_selector: &str) -> Result<PageSnapshot, SourceError>;

    /// Scroll the element into view and click it.
    async fn click(&mut self, selector: &str) -> Result<(), SourceError>;

    /// Whether the element exists and is enabled. Absent elements are not enabled.
    async fn is_enabled(&mut self, selector: &str) -> Result<bool, SourceError>;

    /// Release the underlying browser session.
    async fn close(&mut self) -> Result<(), SourceError>;
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Click an element that may not have rendered yet.
pub async fn click_with_retry<S>(
    source: &mut S,
    selector: &str,
    policy: RetryPolicy,
) -> Result<(), SourceError>
where
    S: PageSource + ?Sized,
{
    for attempt in 1..=policy.attempts {
        match source.click(selector).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => {
                warn!(
                    selector = selector,
                    attempt,
                    max_attempts = policy.attempts,
                    error = %e,
                    "Element not available yet"
                );
                if attempt < policy.attempts && !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(SourceError::RetriesExhausted {
        selector: selector.to_string(),
        attempts: policy.attempts,
    })
}
