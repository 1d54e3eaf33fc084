//! Executed-order records scraped from a trader's public trade history.

use chrono::{NaiveDateTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Timestamp layout used by the trade-history table and the snapshot file.
pub const SOURCE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Position action of an executed order as shown in the history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "Open long")]
    OpenLong,
    #[serde(rename = "Close long")]
    CloseLong,
    #[serde(rename = "Open short")]
    OpenShort,
    #[serde(rename = "Close short")]
    CloseShort,
}

/// A side label that cannot be mapped onto exactly one [`Side`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SideLabelError {
    /// Label seen in the wild that could mean more than one side.
    #[error("ambiguous side label: {0:?}")]
    Ambiguous(String),
    #[error("unrecognized side label: {0:?}")]
    Unrecognized(String),
}

/// Labels that have been observed for more than one side.
const AMBIGUOUS_LABELS: [&str; 2] = ["buy/long", "sell/short"];

impl Side {
    pub const ALL: [Side; 4] = [
        Side::OpenLong,
        Side::CloseLong,
        Side::OpenShort,
        Side::CloseShort,
    ];

    /// Canonical label as rendered by the history table.
    pub fn label(&self) -> &'static str {
        match self {
            Side::OpenLong => "Open long",
            Side::CloseLong => "Close long",
            Side::OpenShort => "Open short",
            Side::CloseShort => "Close short",
        }
    }

    /// Map a raw label onto a side. Matching is trimmed and case-insensitive.
    pub fn from_label(raw: &str) -> Result<Side, SideLabelError> {
        let normalized = raw.trim().to_lowercase();
        if let Some(side) = Side::ALL
            .iter()
            .find(|side| side.label().to_lowercase() == normalized)
        {
            return Ok(*side);
        }
        if AMBIGUOUS_LABELS.contains(&normalized.as_str()) {
            return Err(SideLabelError::Ambiguous(raw.trim().to_string()));
        }
        Err(SideLabelError::Unrecognized(raw.trim().to_string()))
    }

    pub fn is_opening(&self) -> bool {
        matches!(self, Side::OpenLong | Side::OpenShort)
    }

    pub fn is_closing(&self) -> bool {
        !self.is_opening()
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Side::OpenLong | Side::CloseLong)
    }

    /// Same action on the opposite position direction.
    pub fn reversed(&self) -> Side {
        match self {
            Side::OpenLong => Side::OpenShort,
            Side::CloseLong => Side::CloseShort,
            Side::OpenShort => Side::OpenLong,
            Side::CloseShort => Side::CloseLong,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Side {
    type Err = SideLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Side::from_label(s)
    }
}

/// One executed order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderRecord {
    /// Wall-clock time as displayed by the source.
    #[serde(with = "source_time")]
    pub time: NaiveDateTime,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub realized_profit: Decimal,
}

impl OrderRecord {
    /// Identity used for deduplication and aggregation.
    pub fn key(&self) -> OrderKey {
        OrderKey {
            time: self.time,
            symbol: self.symbol.clone(),
            side: self.side,
            price: self.price.normalize(),
        }
    }

    /// Order time truncated to the minute.
    pub fn minute(&self) -> NaiveDateTime {
        truncate_to_minute(self.time)
    }
}

/// Identity of a real-world order occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub time: NaiveDateTime,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.time.format(SOURCE_TIME_FORMAT),
            self.symbol,
            self.side,
            self.price
        )
    }
}

/// Sum quantity and realized profit over records sharing an identity key.
///
/// Output keeps the order in which each key was first seen.
pub fn aggregate_records(records: &[OrderRecord]) -> Vec<OrderRecord> {
    let mut index: HashMap<OrderKey, usize> = HashMap::new();
    let mut aggregated: Vec<OrderRecord> = Vec::new();

    for record in records {
        match index.get(&record.key()) {
            Some(&i) => {
                aggregated[i].quantity += record.quantity;
                aggregated[i].realized_profit += record.realized_profit;
            }
            None => {
                index.insert(record.key(), aggregated.len());
                aggregated.push(record.clone());
            }
        }
    }

    aggregated
}

/// Truncate a timestamp to minute precision.
pub fn truncate_to_minute(time: NaiveDateTime) -> NaiveDateTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

mod source_time {
    use super::SOURCE_TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(SOURCE_TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, SOURCE_TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: &str, side: Side, price: Decimal, quantity: Decimal) -> OrderRecord {
        OrderRecord {
            time: NaiveDateTime::parse_from_str(time, SOURCE_TIME_FORMAT).unwrap(),
            symbol: "BTCUSDT".to_string(),
            side,
            price,
            quantity,
            realized_profit: Decimal::ZERO,
        }
    }

    #[test]
    fn test_side_labels() {
        assert_eq!(Side::from_label("Open long"), Ok(Side::OpenLong));
        assert_eq!(Side::from_label("  close SHORT "), Ok(Side::CloseShort));
        assert_eq!(
            Side::from_label("Buy/Long"),
            Err(SideLabelError::Ambiguous("Buy/Long".to_string()))
        );
        assert_eq!(
            Side::from_label("Sell/Short"),
            Err(SideLabelError::Ambiguous("Sell/Short".to_string()))
        );
        assert!(matches!(
            Side::from_label("Liquidation"),
            Err(SideLabelError::Unrecognized(_))
        ));
    }

    #[test]
    fn test_side_reversal_keeps_action() {
        for side in Side::ALL {
            assert_eq!(side.reversed().is_opening(), side.is_opening());
            assert_ne!(side.reversed().is_long(), side.is_long());
            assert_eq!(side.reversed().reversed(), side);
        }
    }

    #[test]
    fn test_key_ignores_price_scale() {
        let a = record("2024-01-01 10:00:00", Side::OpenLong, Decimal::new(50000, 0), Decimal::ONE);
        let b = record("2024-01-01 10:00:00", Side::OpenLong, Decimal::new(5000000, 2), Decimal::ONE);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_aggregate_sums_duplicates() {
        let records = vec![
            record("2024-01-01 10:00:00", Side::OpenLong, Decimal::new(50000, 0), Decimal::new(1, 2)),
            record("2024-01-01 10:01:00", Side::CloseLong, Decimal::new(50100, 0), Decimal::new(5, 2)),
            record("2024-01-01 10:00:00", Side::OpenLong, Decimal::new(50000, 0), Decimal::new(2, 2)),
        ];

        let aggregated = aggregate_records(&records);
        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated[0].side, Side::OpenLong);
        assert_eq!(aggregated[0].quantity, Decimal::new(3, 2));
        assert_eq!(aggregated[1].quantity, Decimal::new(5, 2));
    }

    #[test]
    fn test_minute_truncation() {
        let r = record("2024-01-01 10:00:59", Side::OpenLong, Decimal::ONE, Decimal::ONE);
        assert_eq!(r.minute().format(SOURCE_TIME_FORMAT).to_string(), "2024-01-01 10:00:00");
    }

    #[test]
    fn test_snapshot_field_names() {
        let r = record("2024-01-01 10:00:00", Side::CloseShort, Decimal::new(50000, 0), Decimal::ONE);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["Time"], "2024-01-01 10:00:00");
        assert_eq!(json["Side"], "Close short");
        assert!(json.get("RealizedProfit").is_some());

        let back: OrderRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
