//! Configuration management for the trade mirror.
//!
//! Values are layered from an optional TOML file and `MIRROR_*` environment
//! variables (a `.env` file is loaded first). Nested locator settings use a
//! double underscore, e.g. `MIRROR_LOCATORS__NEXT_PAGE`.

use crate::types::PortfolioConfig;
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Settings supplied when a mirroring session starts.
#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    /// Public trade-history page of the trader being mirrored.
    pub source_link: String,
    pub api_key: String,
    pub api_secret: String,
    /// Leverage for opening orders, 0 for none.
    #[serde(default)]
    pub leverage: u32,
    pub trader_portfolio_size: Decimal,
    pub your_portfolio_size: Decimal,
    #[serde(default)]
    pub close_only_mode: bool,
    #[serde(default)]
    pub reverse_copy: bool,
    #[serde(default)]
    pub hedge_mode: bool,
    /// Submit real orders (false = paper trading).
    #[serde(default)]
    pub live_trading: bool,
    #[serde(default)]
    pub exchange_base_url: Option<String>,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub locators: LocatorConfig,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("source_link", &self.source_link)
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("leverage", &self.leverage)
            .field("trader_portfolio_size", &self.trader_portfolio_size)
            .field("your_portfolio_size", &self.your_portfolio_size)
            .field("close_only_mode", &self.close_only_mode)
            .field("reverse_copy", &self.reverse_copy)
            .field("hedge_mode", &self.hedge_mode)
            .field("live_trading", &self.live_trading)
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

/// Delays, windows and retry bounds for the polling loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Maximum order age still eligible for mirroring.
    pub staleness_secs: u64,
    /// Rows further than this from the cycle minute are not admitted.
    pub admission_window_mins: i64,
    /// Snapshot retention after the last save.
    pub retention_secs: u64,
    /// Pause after each navigation action.
    pub settle_delay_ms: u64,
    pub element_retry_attempts: u32,
    pub element_retry_backoff_ms: u64,
    pub max_recovery_attempts: u32,
    pub poll_interval_ms: u64,
    /// Offset of the timestamps rendered by the source, in minutes east of UTC.
    pub source_utc_offset_mins: i32,
    pub recv_window_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 60,
            admission_window_mins: 2,
            retention_secs: 300,
            settle_delay_ms: 2000,
            element_retry_attempts: 3,
            element_retry_backoff_ms: 2000,
            max_recovery_attempts: 5,
            poll_interval_ms: 1000,
            source_utc_offset_mins: 0,
            recv_window_ms: 60_000,
        }
    }
}

impl TimingConfig {
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn element_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.element_retry_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Zero delays everywhere, for scripted sources.
    pub fn immediate() -> Self {
        Self {
            settle_delay_ms: 0,
            element_retry_backoff_ms: 0,
            poll_interval_ms: 0,
            ..Self::default()
        }
    }
}

/// CSS selectors for elements on the trade-history page.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub cookie_accept: String,
    pub history_tab: String,
    pub table_rows: String,
    pub next_page: String,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            cookie_accept: "#onetrust-accept-btn-handler".to_string(),
            history_tab: "#tab-tradeHistory > div".to_string(),
            table_rows: ".css-g5h8k8 > div > div > div > table > tbody > tr".to_string(),
            next_page: "div.bn-pagination-next".to_string(),
        }
    }
}

/// `MIRROR_API_KEY` sets `api_key`; `MIRROR_LOCATORS__NEXT_PAGE` sets `locators.next_page`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("MIRROR")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("trade_history.json")
}

impl SessionConfig {
    /// Load from an optional file and the environment.
    #[allow(clippy::result_large_err)]
    pub fn load(file: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(file, environment())
    }

    #[allow(clippy::result_large_err)]
    fn load_from(file: Option<&str>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        let settings = builder.add_source(env).build()?;

        let config: SessionConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Refuse configurations a session cannot start with.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.source_link.trim().is_empty() {
            return Err(Error::config("source link is empty"));
        }
        if self.api_key.trim().is_empty() || self.api_secret.trim().is_empty() {
            return Err(Error::config("exchange API credentials are missing"));
        }
        if self.timing.element_retry_attempts == 0 || self.timing.max_recovery_attempts == 0 {
            return Err(Error::config("retry attempt bounds must be at least 1"));
        }
        self.portfolio().validate()
    }

    pub fn portfolio(&self) -> PortfolioConfig {
        PortfolioConfig::new(self.trader_portfolio_size, self.your_portfolio_size)
            .with_leverage(self.leverage)
            .close_only(self.close_only_mode)
            .reversed(self.reverse_copy)
            .hedged(self.hedge_mode)
    }

    /// Configuration for tests and scripted runs.
    pub fn for_testing(source_link: impl Into<String>) -> Self {
        Self {
            source_link: source_link.into(),
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
            leverage: 0,
            trader_portfolio_size: Decimal::new(10_000, 0),
            your_portfolio_size: Decimal::new(1, 2),
            close_only_mode: false,
            reverse_copy: false,
            hedge_mode: false,
            live_trading: false,
            exchange_base_url: None,
            webdriver_url: default_webdriver_url(),
            snapshot_path: default_snapshot_path(),
            timing: TimingConfig::immediate(),
            locators: LocatorConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_defaults() {
        let timing = TimingConfig::default();
        assert_eq!(timing.staleness(), Duration::from_secs(60));
        assert_eq!(timing.retention(), Duration::from_secs(300));
        assert_eq!(timing.admission_window_mins, 2);
        assert_eq!(timing.element_retry_attempts, 3);
    }

    #[test]
    fn test_validate_missing_credentials() {
        let mut config = SessionConfig::for_testing("https://example.com/trader");
        assert!(config.validate().is_ok());

        config.api_secret = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn test_validate_portfolio_sizes() {
        let mut config = SessionConfig::for_testing("https://example.com/trader");
        config.trader_portfolio_size = Decimal::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_debug_does_not_expose_credentials() {
        let mut config = SessionConfig::for_testing("https://example.com/trader");
        config.api_key = "very-secret-key".to_string();
        config.api_secret = "very-secret-secret".to_string();
        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("very-secret"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let raw = r#"{
            "source_link": "https://example.com/trader",
            "api_key": "k",
            "api_secret": "s",
            "trader_portfolio_size": "1000",
            "your_portfolio_size": "0.5",
            "leverage": 3,
            "locators": { "next_page": "button.next" }
        }"#;
        let config: SessionConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.portfolio().leverage, Some(3));
        assert_eq!(config.locators.next_page, "button.next");
        assert_eq!(config.locators.history_tab, "#tab-tradeHistory > div");
        assert_eq!(config.timing.retention_secs, 300);
        assert_eq!(config.snapshot_path, PathBuf::from("trade_history.json"));
        assert!(!config.live_trading);
    }

    #[test]
    fn test_load_from_environment() {
        let vars: config::Map<String, String> = [
            ("MIRROR_SOURCE_LINK", "https://example.com/trader"),
            ("MIRROR_API_KEY", "env-key"),
            ("MIRROR_API_SECRET", "env-secret"),
            ("MIRROR_TRADER_PORTFOLIO_SIZE", "1000"),
            ("MIRROR_YOUR_PORTFOLIO_SIZE", "20"),
            ("MIRROR_CLOSE_ONLY_MODE", "true"),
            ("MIRROR_TIMING__RETENTION_SECS", "120"),
            ("MIRROR_LOCATORS__NEXT_PAGE", "button.next"),
            ("OTHER_API_KEY", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = SessionConfig::load_from(None, environment().source(Some(vars))).unwrap();

        assert_eq!(config.source_link, "https://example.com/trader");
        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.api_secret, "env-secret");
        assert_eq!(config.trader_portfolio_size, Decimal::new(1_000, 0));
        assert_eq!(config.your_portfolio_size, Decimal::new(20, 0));
        assert!(config.close_only_mode);
        assert_eq!(config.timing.retention_secs, 120);
        assert_eq!(config.timing.staleness_secs, 60);
        assert_eq!(config.locators.next_page, "button.next");
        assert_eq!(config.locators.history_tab, "#tab-tradeHistory > div");
    }

    #[test]
    fn test_load_from_environment_requires_link() {
        let vars: config::Map<String, String> = [("MIRROR_API_KEY", "env-key")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let err = SessionConfig::load_from(None, environment().source(Some(vars))).unwrap_err();
        assert!(matches!(err, Error::ConfigFile(_)));
    }
}
