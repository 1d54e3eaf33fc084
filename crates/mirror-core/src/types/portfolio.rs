//! Portfolio and mirroring settings fixed for the lifetime of a session.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub trader_portfolio_size: Decimal,
    pub your_portfolio_size: Decimal,
    /// Leverage for opening orders; `None` leaves the account setting alone.
    pub leverage: Option<u32>,
    /// Only mirror closing orders.
    pub close_only_mode: bool,
    /// Mirror onto the opposite position direction.
    pub reverse_copy: bool,
    /// Send an explicit position side with each order.
    pub hedge_mode: bool,
}

impl PortfolioConfig {
    pub fn new(trader_portfolio_size: Decimal, your_portfolio_size: Decimal) -> Self {
        Self {
            trader_portfolio_size,
            your_portfolio_size,
            leverage: None,
            close_only_mode: false,
            reverse_copy: false,
            hedge_mode: false,
        }
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = (leverage > 0).then_some(leverage);
        self
    }

    pub fn close_only(mut self, enabled: bool) -> Self {
        self.close_only_mode = enabled;
        self
    }

    pub fn reversed(mut self, enabled: bool) -> Self {
        self.reverse_copy = enabled;
        self
    }

    pub fn hedged(mut self, enabled: bool) -> Self {
        self.hedge_mode = enabled;
        self
    }

    /// Reject sizes that make the sizing formula meaningless.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.trader_portfolio_size <= Decimal::ZERO {
            return Err(Error::config(format!(
                "trader portfolio size must be positive, got {}",
                self.trader_portfolio_size
            )));
        }
        if self.your_portfolio_size <= Decimal::ZERO {
            return Err(Error::config(format!(
                "your portfolio size must be positive, got {}",
                self.your_portfolio_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_zero_trader_size() {
        let config = PortfolioConfig::new(Decimal::ZERO, Decimal::new(100, 0));
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_zero_leverage_means_none() {
        let config = PortfolioConfig::new(Decimal::ONE, Decimal::ONE).with_leverage(0);
        assert_eq!(config.leverage, None);
        let config = config.with_leverage(10);
        assert_eq!(config.leverage, Some(10));
        assert!(config.validate().is_ok());
    }
}
