//! Snapshot parsing into executed-order records.
//!
//! Column layout of the trade-history table:
//! time, symbol, side, price, quantity, realized profit.

use crate::source::PageSnapshot;
use chrono::NaiveDateTime;
use mirror_core::types::{OrderRecord, Side, SideLabelError, SOURCE_TIME_FORMAT};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

const COLUMN_COUNT: usize = 6;

/// Trailing market-type markers appended to symbol labels.
const MARKET_QUALIFIERS: [&str; 1] = ["Perpetual"];

/// Why a single row was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("expected 6 columns, found {0}")]
    MissingColumns(usize),

    #[error("invalid time {0:?}")]
    InvalidTime(String),

    #[error(transparent)]
    InvalidSide(#[from] SideLabelError),

    #[error("invalid {field} {raw:?}")]
    InvalidNumber { field: &'static str, raw: String },
}

/// Extract order records from one snapshot.
///
/// An absent table yields no records. Malformed rows are dropped and the
/// remaining rows are still returned in page order.
pub fn parse_snapshot(snapshot: &PageSnapshot) -> Vec<OrderRecord> {
    let Some(rows) = &snapshot.rows else {
        debug!("Trade history table not present in snapshot");
        return Vec::new();
    };

    rows.iter()
        .filter_map(|cells| match parse_row(cells) {
            Ok(record) => Some(record),
            Err(RowError::InvalidSide(e)) => {
                warn!(error = %e, "Unsupported order side, skipping row");
                None
            }
            Err(e) => {
                warn!(error = %e, row = ?cells, "Dropping malformed row");
                None
            }
        })
        .collect()
}

/// Parse one table row.
pub fn parse_row(cells: &[String]) -> Result<OrderRecord, RowError> {
    if cells.len() < COLUMN_COUNT {
        return Err(RowError::MissingColumns(cells.len()));
    }

    let raw_time = cells[0].trim();
    let time = NaiveDateTime::parse_from_str(raw_time, SOURCE_TIME_FORMAT)
        .map_err(|_| RowError::InvalidTime(raw_time.to_string()))?;
    let symbol = normalize_symbol(&cells[1]);
    let side = Side::from_label(&cells[2])?;

    Ok(OrderRecord {
        time,
        symbol,
        side,
        price: number(&cells[3], "price")?,
        quantity: number(&cells[4], "quantity")?,
        realized_profit: number(&cells[5], "realized profit")?,
    })
}

fn number(raw: &str, field: &'static str) -> Result<Decimal, RowError> {
    parse_amount(raw).ok_or_else(|| RowError::InvalidNumber {
        field,
        raw: raw.trim().to_string(),
    })
}

/// Parse a displayed amount such as `"50,000.1"`, `"0.010 BTC"` or `"-1.25 USDT"`.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let compact: String = raw
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    let cleaned = compact
        .trim_start_matches('$')
        .trim_end_matches(|c: char| c.is_alphabetic());

    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(cleaned).ok()
}

/// Strip a trailing market-type marker and collapse whitespace.
pub fn normalize_symbol(raw: &str) -> String {
    let mut symbol = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    for qualifier in MARKET_QUALIFIERS {
        if let Some(start) = symbol.len().checked_sub(qualifier.len()) {
            if symbol.is_char_boundary(start) && symbol[start..].eq_ignore_ascii_case(qualifier) {
                symbol.truncate(start);
            }
        }
    }

    symbol.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: [&str; 6]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_parse_row() {
        let record = parse_row(&row([
            " 2024-01-01 10:00:00 ",
            "BTCUSDT Perpetual",
            "Open long",
            "50,000.10",
            "0.010 BTC",
            "0.00 USDT",
        ]))
        .unwrap();

        assert_eq!(record.symbol, "BTCUSDT");
        assert_eq!(record.side, Side::OpenLong);
        assert_eq!(record.price, Decimal::new(5000010, 2));
        assert_eq!(record.quantity, Decimal::new(10, 3));
        assert_eq!(record.realized_profit, Decimal::ZERO);
        assert_eq!(record.time.format(SOURCE_TIME_FORMAT).to_string(), "2024-01-01 10:00:00");
    }

    #[test]
    fn test_negative_profit_keeps_sign() {
        assert_eq!(parse_amount("-1,234.50 USDT"), Some(Decimal::new(-123450, 2)));
        assert_eq!(parse_amount("$12"), Some(Decimal::new(12, 0)));
        assert_eq!(parse_amount("--"), None);
        assert_eq!(parse_amount("USDT"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("ETHUSDT Perpetual"), "ETHUSDT");
        assert_eq!(normalize_symbol("ETHUSDTPerpetual"), "ETHUSDT");
        assert_eq!(normalize_symbol("  1000PEPE   USDT  perpetual "), "1000PEPE USDT");
        assert_eq!(normalize_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn test_malformed_rows_are_dropped() {
        let snapshot = PageSnapshot {
            rows: Some(vec![
                row(["2024-01-01 10:00:00", "BTCUSDT", "Open long", "50000", "0.01", "0"]),
                row(["2024-01-01 10:00:00", "BTCUSDT", "Open long", "n/a", "0.01", "0"]),
                row(["yesterday", "BTCUSDT", "Open long", "50000", "0.01", "0"]),
                row(["2024-01-01 10:00:00", "BTCUSDT", "Buy/long", "50000", "0.01", "0"]),
                vec!["2024-01-01 10:00:00".to_string()],
                row(["2024-01-01 10:01:00", "ETHUSDT", "Close short", "3,000", "1", "12.5 USDT"]),
            ]),
        };

        let records = parse_snapshot(&snapshot);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].symbol, "BTCUSDT");
        assert_eq!(records[1].symbol, "ETHUSDT");
        assert_eq!(records[1].realized_profit, Decimal::new(125, 1));
    }

    #[test]
    fn test_missing_table_is_empty() {
        assert!(parse_snapshot(&PageSnapshot::default()).is_empty());
        assert!(parse_snapshot(&PageSnapshot { rows: Some(vec![]) }).is_empty());
    }

    #[test]
    fn test_row_errors() {
        assert_eq!(
            parse_row(&["x".to_string()]),
            Err(RowError::MissingColumns(1))
        );
        assert!(matches!(
            parse_row(&row(["2024-01-01 10:00:00", "BTCUSDT", "Sideways", "1", "1", "0"])),
            Err(RowError::InvalidSide(SideLabelError::Unrecognized(_)))
        ));
        assert!(matches!(
            parse_row(&row(["2024-01-01 10:00:00", "BTCUSDT", "Open long", "1", "1.2.3", "0"])),
            Err(RowError::InvalidNumber { field: "quantity", .. })
        ));
    }
}
