//! Mirror order submission.
//!
//! Submission is at-most-once and best effort: a rejected or failed order is
//! logged and reported, never retried, and never stops the polling loop.

use chrono::{DateTime, Utc};
use mirror_core::api::ExchangeClient;
use mirror_core::types::{MarketOrderRequest, OrderSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Counters for submitted mirror orders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionMetrics {
    pub orders_submitted: u64,
    pub orders_simulated: u64,
    pub orders_failed: u64,
    pub total_quantity: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Whether to actually execute orders (false = paper trading).
    pub live_trading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Accepted by the exchange.
    Submitted,
    /// Paper trade, nothing sent.
    Simulated,
    Failed,
}

/// Outcome of one submission attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorReport {
    pub id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub status: ExecutionStatus,
    pub exchange_order_id: Option<i64>,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl MirrorReport {
    fn new(request: &MarketOrderRequest, status: ExecutionStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            status,
            exchange_order_id: None,
            error_message: None,
            executed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != ExecutionStatus::Failed
    }
}

pub struct MirrorExecutor {
    client: Arc<dyn ExchangeClient>,
    config: ExecutorConfig,
    metrics: ExecutionMetrics,
}

impl MirrorExecutor {
    pub fn new(client: Arc<dyn ExchangeClient>, config: ExecutorConfig) -> Self {
        Self {
            client,
            config,
            metrics: ExecutionMetrics::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.config.live_trading
    }

    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    /// Submit one market order. Failures are reported, not returned.
    pub async fn submit(&mut self, request: &MarketOrderRequest) -> MirrorReport {
        info!(
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            position_side = ?request.position_side,
            leverage = ?request.leverage,
            live = self.config.live_trading,
            "Submitting mirror order"
        );

        let report = if self.config.live_trading {
            self.submit_live(request).await
        } else {
            self.simulate(request)
        };

        match report.status {
            ExecutionStatus::Submitted => {
                self.metrics.orders_submitted += 1;
                self.metrics.total_quantity += report.quantity;
            }
            ExecutionStatus::Simulated => {
                self.metrics.orders_simulated += 1;
                self.metrics.total_quantity += report.quantity;
            }
            ExecutionStatus::Failed => self.metrics.orders_failed += 1,
        }
        report
    }

    async fn submit_live(&self, request: &MarketOrderRequest) -> MirrorReport {
        match self.client.submit_market_order(request).await {
            Ok(ack) => {
                info!(
                    symbol = %request.symbol,
                    exchange_order_id = ack.order_id,
                    status = %ack.status,
                    "Mirror order accepted"
                );
                let mut report = MirrorReport::new(request, ExecutionStatus::Submitted);
                report.exchange_order_id = Some(ack.order_id);
                report
            }
            Err(e) => {
                error!(
                    symbol = %request.symbol,
                    side = %request.side,
                    quantity = %request.quantity,
                    error = %e,
                    "Mirror order failed"
                );
                let mut report = MirrorReport::new(request, ExecutionStatus::Failed);
                report.error_message = Some(e.to_string());
                report
            }
        }
    }

    fn simulate(&self, request: &MarketOrderRequest) -> MirrorReport {
        info!(
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            "[PAPER] Simulated mirror order"
        );
        MirrorReport::new(request, ExecutionStatus::Simulated)
    }
}
