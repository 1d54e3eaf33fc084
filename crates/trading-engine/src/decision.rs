//! Mirror decisions for scraped order records.
//!
//! A record is mirrored when it is an actionable, fresh, unsettled order on a
//! symbol whose minimum quantity is known. The mirrored size comes from a
//! [`PositionSizer`], gets a markup on closing sides and is raised to the
//! symbol minimum when it falls below it.

use crate::quantity::MinQuantityTable;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDateTime, Offset, Utc};
use mirror_core::types::{
    MarketOrderRequest, OrderKey, OrderRecord, OrderSide, PortfolioConfig, PositionSide, Side,
};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Quantity multiplier applied when unwinding a position.
pub fn closing_markup() -> Decimal {
    Decimal::new(105, 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SizingError {
    #[error("trader portfolio size is zero")]
    ZeroTraderPortfolio,
    #[error("position size overflowed")]
    Overflow,
}

/// Base quantity for a mirrored order, before markup and minimum adjustment.
pub trait PositionSizer: Send + Sync {
    fn base_quantity(&self, record: &OrderRecord) -> Result<Decimal, SizingError>;
}

/// `(trader * yours) / trader`, evaluated literally.
#[derive(Debug, Clone, Copy)]
pub struct PortfolioRatioSizer {
    trader_portfolio_size: Decimal,
    your_portfolio_size: Decimal,
}

impl PortfolioRatioSizer {
    pub fn new(portfolio: &PortfolioConfig) -> Self {
        Self {
            trader_portfolio_size: portfolio.trader_portfolio_size,
            your_portfolio_size: portfolio.your_portfolio_size,
        }
    }
}

impl PositionSizer for PortfolioRatioSizer {
    fn base_quantity(&self, _record: &OrderRecord) -> Result<Decimal, SizingError> {
        if self.trader_portfolio_size.is_zero() {
            return Err(SizingError::ZeroTraderPortfolio);
        }
        self.trader_portfolio_size
            .checked_mul(self.your_portfolio_size)
            .and_then(|product| product.checked_div(self.trader_portfolio_size))
            .ok_or(SizingError::Overflow)
    }
}

/// Why a record was not mirrored.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Opening order while only closing orders are mirrored.
    CloseOnly,
    /// The row already carries realized profit.
    Settled { realized_profit: Decimal },
    Stale { age_secs: i64 },
    Sizing(SizingError),
    /// No minimum quantity is known for the symbol.
    UnknownSymbol,
    NonPositiveQuantity { quantity: Decimal },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::CloseOnly => write!(f, "close-only mode"),
            SkipReason::Settled { realized_profit } => {
                write!(f, "realized profit {realized_profit}")
            }
            SkipReason::Stale { age_secs } => write!(f, "stale by {age_secs}s"),
            SkipReason::Sizing(e) => write!(f, "sizing failed: {e}"),
            SkipReason::UnknownSymbol => write!(f, "unknown minimum quantity"),
            SkipReason::NonPositiveQuantity { quantity } => {
                write!(f, "non-positive quantity {quantity}")
            }
        }
    }
}

/// A record that qualified, with the order to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorOrder {
    pub key: OrderKey,
    /// Side after reverse-copy was applied.
    pub side: Side,
    pub request: MarketOrderRequest,
    /// Sized quantity before it was raised to the symbol minimum.
    pub adjusted_from: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Mirror(MirrorOrder),
    Skip(SkipReason),
}

impl Decision {
    pub fn is_mirror(&self) -> bool {
        matches!(self, Decision::Mirror(_))
    }
}

pub struct DecisionEngine {
    portfolio: PortfolioConfig,
    min_quantities: Arc<MinQuantityTable>,
    sizer: Box<dyn PositionSizer>,
    staleness: Duration,
    source_offset: FixedOffset,
}

impl DecisionEngine {
    /// Default staleness threshold.
    pub const DEFAULT_STALENESS: Duration = Duration::from_secs(60);

    pub fn new(portfolio: PortfolioConfig, min_quantities: Arc<MinQuantityTable>) -> Self {
        let sizer = PortfolioRatioSizer::new(&portfolio);
        Self {
            portfolio,
            min_quantities,
            sizer: Box::new(sizer),
            staleness: Self::DEFAULT_STALENESS,
            source_offset: Utc.fix(),
        }
    }

    pub fn with_sizer(mut self, sizer: impl PositionSizer + 'static) -> Self {
        self.sizer = Box::new(sizer);
        self
    }

    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    /// Offset of the wall-clock times rendered by the source.
    pub fn with_source_offset(mut self, offset: FixedOffset) -> Self {
        self.source_offset = offset;
        self
    }

    pub fn portfolio(&self) -> &PortfolioConfig {
        &self.portfolio
    }

    pub fn should_mirror(&self, record: &OrderRecord, now: DateTime<Utc>) -> bool {
        self.evaluate(record, now).is_mirror()
    }

    pub fn evaluate(&self, record: &OrderRecord, now: DateTime<Utc>) -> Decision {
        let decision = self.decide(record, now);
        match &decision {
            Decision::Mirror(order) => debug!(
                key = %order.key,
                side = %order.request.side,
                quantity = %order.request.quantity,
                "Record qualifies for mirroring"
            ),
            Decision::Skip(reason @ (SkipReason::Sizing(_) | SkipReason::UnknownSymbol)) => warn!(
                key = %record.key(),
                reason = %reason,
                "Not mirroring order"
            ),
            Decision::Skip(reason) => info!(
                key = %record.key(),
                reason = %reason,
                "Not mirroring order"
            ),
        }
        decision
    }

    fn decide(&self, record: &OrderRecord, now: DateTime<Utc>) -> Decision {
        if self.portfolio.close_only_mode && record.side.is_opening() {
            return Decision::Skip(SkipReason::CloseOnly);
        }
        if !record.realized_profit.is_zero() {
            return Decision::Skip(SkipReason::Settled {
                realized_profit: record.realized_profit,
            });
        }

        let age = self.age(record.time, now);
        if let Ok(elapsed) = age.to_std() {
            if elapsed > self.staleness {
                return Decision::Skip(SkipReason::Stale {
                    age_secs: age.num_seconds(),
                });
            }
        }

        let side = if self.portfolio.reverse_copy {
            record.side.reversed()
        } else {
            record.side
        };

        let base = match self.sizer.base_quantity(record) {
            Ok(base) => base,
            Err(e) => return Decision::Skip(SkipReason::Sizing(e)),
        };
        let sized = if side.is_closing() {
            match base.checked_mul(closing_markup()) {
                Some(q) => q,
                None => return Decision::Skip(SkipReason::Sizing(SizingError::Overflow)),
            }
        } else {
            base
        };

        let Some(minimum) = self.min_quantities.get(&record.symbol) else {
            return Decision::Skip(SkipReason::UnknownSymbol);
        };

        let (quantity, adjusted_from) = if sized < minimum {
            info!(
                symbol = %record.symbol,
                from = %sized,
                to = %minimum,
                "Adjusting quantity up to exchange minimum"
            );
            (minimum, Some(sized))
        } else {
            (sized, None)
        };
        if quantity <= Decimal::ZERO {
            return Decision::Skip(SkipReason::NonPositiveQuantity { quantity });
        }

        Decision::Mirror(MirrorOrder {
            key: record.key(),
            side,
            request: self.order_request(&record.symbol, side, quantity),
            adjusted_from,
        })
    }

    fn order_request(&self, symbol: &str, side: Side, quantity: Decimal) -> MarketOrderRequest {
        let (direction, position_side) = match side {
            Side::OpenLong => (OrderSide::Buy, PositionSide::Long),
            Side::CloseLong => (OrderSide::Sell, PositionSide::Long),
            Side::OpenShort => (OrderSide::Sell, PositionSide::Short),
            Side::CloseShort => (OrderSide::Buy, PositionSide::Short),
        };

        let mut request = MarketOrderRequest::new(symbol, direction, quantity.normalize());
        if self.portfolio.hedge_mode {
            request = request.with_position_side(position_side);
        }
        if let (true, Some(leverage)) = (side.is_opening(), self.portfolio.leverage) {
            request = request.with_leverage(leverage);
        }
        request
    }

    /// Age of a source timestamp relative to `now`. Negative for future times.
    fn age(&self, time: NaiveDateTime, now: DateTime<Utc>) -> ChronoDuration {
        let offset = ChronoDuration::seconds(i64::from(self.source_offset.local_minus_utc()));
        now.naive_utc() - (time - offset)
    }
}
