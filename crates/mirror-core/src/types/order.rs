//! Order types for mirrored futures orders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position leg an order applies to in hedge mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

/// A fully specified market order for the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Only sent when the account runs in hedge mode.
    pub position_side: Option<PositionSide>,
    /// Leverage to apply before an opening order.
    pub leverage: Option<u32>,
}

impl MarketOrderRequest {
    pub fn new(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            position_side: None,
            leverage: None,
        }
    }

    pub fn with_position_side(mut self, position_side: PositionSide) -> Self {
        self.position_side = Some(position_side);
        self
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = Some(leverage);
        self
    }
}

/// Exchange acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub executed_qty: Decimal,
}
