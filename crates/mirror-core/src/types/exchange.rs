//! Exchange metadata returned by the futures `exchangeInfo` endpoint.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Trading filter attached to a symbol. Only the lot size is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { min_qty: Decimal },
    #[serde(other)]
    Other,
}

impl SymbolInfo {
    /// Minimum order quantity from the `LOT_SIZE` filter.
    pub fn min_quantity(&self) -> Option<Decimal> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::LotSize { min_qty } => Some(*min_qty),
            SymbolFilter::Other => None,
        })
    }
}

impl ExchangeInfo {
    pub fn min_quantity(&self, symbol: &str) -> Option<Decimal> {
        self.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .and_then(SymbolInfo::min_quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "timezone": "UTC",
        "symbols": [
            {
                "symbol": "BTCUSDT",
                "status": "TRADING",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "556.80", "maxPrice": "4529764", "tickSize": "0.10"},
                    {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "1000", "stepSize": "0.001"},
                    {"filterType": "MIN_NOTIONAL", "notional": "100"}
                ]
            },
            {
                "symbol": "ETHUSDT",
                "filters": [
                    {"filterType": "LOT_SIZE", "minQty": "0.001", "maxQty": "10000", "stepSize": "0.001"}
                ]
            },
            {"symbol": "NOFILTERS"}
        ]
    }"#;

    #[test]
    fn test_parse_exchange_info() {
        let info: ExchangeInfo = serde_json::from_str(PAYLOAD).unwrap();
        assert_eq!(info.symbols.len(), 3);
        assert_eq!(info.min_quantity("BTCUSDT"), Some(Decimal::new(1, 3)));
        assert_eq!(info.min_quantity("NOFILTERS"), None);
        assert_eq!(info.min_quantity("MISSING"), None);
    }
}
