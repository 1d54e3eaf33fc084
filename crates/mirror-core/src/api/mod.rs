//! Exchange client seam and the Binance USDⓈ-M futures implementation.

pub mod binance;

use crate::types::{ExchangeInfo, MarketOrderRequest, OrderAck};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

pub use binance::{BinanceCredentials, BinanceFuturesClient};

/// Operations the mirror needs from the connected exchange account.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Symbol metadata including trading filters.
    async fn exchange_info(&self) -> Result<ExchangeInfo>;

    /// Minimum tradable quantity for one symbol.
    async fn min_quantity(&self, symbol: &str) -> Result<Option<Decimal>> {
        Ok(self.exchange_info().await?.min_quantity(symbol))
    }

    /// Submit a market order.
    async fn submit_market_order(&self, request: &MarketOrderRequest) -> Result<OrderAck>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Listing;

    #[async_trait]
    impl ExchangeClient for Listing {
        async fn exchange_info(&self) -> Result<ExchangeInfo> {
            Ok(serde_json::from_str(
                r#"{"symbols": [{"symbol": "BTCUSDT", "filters": [{"filterType": "LOT_SIZE", "minQty": "0.001"}]}]}"#,
            )?)
        }

        async fn submit_market_order(&self, _request: &MarketOrderRequest) -> Result<OrderAck> {
            unreachable!()
        }
    }

    #[test]
    fn test_min_quantity_from_exchange_info() {
        let btc = tokio_test::block_on(Listing.min_quantity("BTCUSDT")).unwrap();
        let eth = tokio_test::block_on(Listing.min_quantity("ETHUSDT")).unwrap();
        assert_eq!(btc, Some(Decimal::new(1, 3)));
        assert_eq!(eth, None);
    }
}
