//! Minimum order quantities per symbol.

use mirror_core::api::ExchangeClient;
use mirror_core::types::ExchangeInfo;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

/// Symbol to minimum tradable quantity, loaded once per session.
#[derive(Debug, Clone, Default)]
pub struct MinQuantityTable {
    minimums: HashMap<String, Decimal>,
}

impl MinQuantityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `LOT_SIZE` filters of every listed symbol.
    pub fn from_exchange_info(info: &ExchangeInfo) -> Self {
        let mut minimums = HashMap::with_capacity(info.symbols.len());
        for symbol in &info.symbols {
            match symbol.min_quantity() {
                Some(min_qty) => {
                    minimums.insert(symbol.symbol.clone(), min_qty);
                }
                None => warn!(symbol = %symbol.symbol, "No lot size filter for symbol"),
            }
        }
        Self { minimums }
    }

    pub async fn fetch(client: &dyn ExchangeClient) -> mirror_core::Result<Self> {
        let info = client.exchange_info().await?;
        let table = Self::from_exchange_info(&info);
        info!(symbols = table.len(), "Minimum order quantities loaded");
        Ok(table)
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>, min_qty: Decimal) -> Self {
        self.minimums.insert(symbol.into(), min_qty);
        self
    }

    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        self.minimums.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.minimums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minimums.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_exchange_info() {
        let raw = r#"{
            "symbols": [
                {
                    "symbol": "BTCUSDT",
                    "filters": [
                        {"filterType": "PRICE_FILTER", "minPrice": "0.10"},
                        {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "1000", "stepSize": "0.001"}
                    ]
                },
                {"symbol": "NOLOT", "filters": [{"filterType": "PRICE_FILTER"}]}
            ]
        }"#;
        let info: ExchangeInfo = serde_json::from_str(raw).unwrap();
        let table = MinQuantityTable::from_exchange_info(&info);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("BTCUSDT"), Some(Decimal::new(1, 3)));
        assert_eq!(table.get("NOLOT"), None);
    }

    #[test]
    fn test_with_symbol() {
        let table = MinQuantityTable::new().with_symbol("ETHUSDT", Decimal::new(1, 2));
        assert_eq!(table.get("ETHUSDT"), Some(Decimal::new(1, 2)));
        assert!(!table.is_empty());
    }

    #[test]
    fn test_fetch_from_exchange() {
        struct Listing;

        #[async_trait::async_trait]
        impl ExchangeClient for Listing {
            async fn exchange_info(&self) -> mirror_core::Result<ExchangeInfo> {
                Ok(serde_json::from_str(
                    r#"{"symbols": [{"symbol": "ETHUSDT", "filters": [{"filterType": "LOT_SIZE", "minQty": "0.01"}]}]}"#,
                )?)
            }

            async fn submit_market_order(
                &self,
                _request: &mirror_core::types::MarketOrderRequest,
            ) -> mirror_core::Result<mirror_core::types::OrderAck> {
                unreachable!()
            }
        }

        let table = tokio_test::block_on(MinQuantityTable::fetch(&Listing)).unwrap();
        assert_eq!(table.get("ETHUSDT"), Some(Decimal::new(1, 2)));
    }
}
