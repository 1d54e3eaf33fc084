//! Binance USDⓈ-M futures REST client.
//!
//! Public metadata is fetched with retry; order and leverage requests are
//! signed with HMAC-SHA256 over the query string.

use super::ExchangeClient;
use crate::types::{ExchangeInfo, MarketOrderRequest, OrderAck};
use crate::{Error, Result};
use async_trait::async_trait;
use hmac::{Hmac, KeyInit, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// API credentials for signed requests.
#[derive(Clone)]
pub struct BinanceCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for BinanceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceCredentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

impl BinanceCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

/// Error body returned by the futures API.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

pub struct BinanceFuturesClient {
    base_url: String,
    credentials: Option<BinanceCredentials>,
    recv_window_ms: u64,
    /// HTTP client for API requests.
    pub http_client: reqwest::Client,
}

impl BinanceFuturesClient {
    /// Default futures API base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://fapi.binance.com";

    /// Maximum retry attempts for public API calls.
    const MAX_RETRIES: u32 = 3;

    #[allow(clippy::result_large_err)]
    pub fn new(base_url: Option<String>, credentials: Option<BinanceCredentials>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(30))
            .connect_timeout(StdDuration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
            credentials,
            recv_window_ms: 60_000,
            http_client,
        })
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// GET with bounded retry.
    ///
    /// Transport errors, 5xx responses and Binance's rate-limit statuses
    /// (429, and 418 once an IP is banned) are retried; other 4xx fail at once.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let (error, backoff) = match self.http_client.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let Some(backoff) = retry_backoff(status, retry_after(&response), attempt)
                    else {
                        return Err(api_error(response).await);
                    };
                    (api_error(response).await, backoff)
                }
                Err(e) => (Error::Http(e), transport_backoff(attempt)),
            };

            attempt += 1;
            if attempt >= Self::MAX_RETRIES {
                return Err(error);
            }
            warn!(
                attempt,
                max_attempts = Self::MAX_RETRIES,
                backoff_ms = backoff.as_millis() as u64,
                url = url,
                error = %error,
                "Exchange request failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Fetch symbol metadata for all futures contracts.
    pub async fn get_exchange_info(&self) -> Result<ExchangeInfo> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let response = self.get_with_retry(&url).await?;
        let info: ExchangeInfo = response.json().await?;
        info!(symbols = info.symbols.len(), "Fetched futures exchange info");
        Ok(info)
    }

    /// Set the initial leverage for a symbol.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        self.signed_post("/fapi/v1/leverage", params).await?;
        info!(symbol = %symbol, leverage, "Leverage updated");
        Ok(())
    }

    /// Place a market order, applying leverage first when requested.
    pub async fn place_market_order(&self, request: &MarketOrderRequest) -> Result<OrderAck> {
        if let Some(leverage) = request.leverage {
            self.set_leverage(&request.symbol, leverage).await?;
        }

        let response = self
            .signed_post("/fapi/v1/order", order_params(request))
            .await?;
        let ack: OrderAck = response.json().await?;

        info!(
            order_id = ack.order_id,
            symbol = %ack.symbol,
            status = %ack.status,
            "Market order accepted"
        );
        Ok(ack)
    }

    async fn signed_post(
        &self,
        path: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<reqwest::Response> {
        let credentials = self.credentials.as_ref().ok_or_else(|| Error::Signing {
            message: "API credentials not set".to_string(),
        })?;

        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", current_timestamp_ms().to_string()));
        let query = encode_query(&params);
        let signature = sign_query(&credentials.api_secret, &query)?;

        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        debug!(path = path, query = %query, "Signed POST");

        let response = self
            .http_client
            .post(&url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    async fn exchange_info(&self) -> Result<ExchangeInfo> {
        self.get_exchange_info().await
    }

    async fn submit_market_order(&self, request: &MarketOrderRequest) -> Result<OrderAck> {
        self.place_market_order(request).await
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("base_url", &self.base_url)
            .field("has_credentials", &self.has_credentials())
            .finish()
    }
}

/// Turn a non-success response into an API error, keeping the exchange message.
async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) => format!("{} (code {})", body.msg, body.code),
        Err(_) => format!("API error: {} - {}", status, text),
    };
    Error::Api {
        message,
        status: Some(status),
    }
}

/// Pause before retrying a response with `status`, or `None` when it is final.
///
/// Rate limits wait at least as long as the exchange's `Retry-After`.
fn retry_backoff(status: u16, retry_after: Option<StdDuration>, attempt: u32) -> Option<StdDuration> {
    match status {
        418 | 429 => {
            let doubling = StdDuration::from_millis(2000 * 2u64.pow(attempt));
            Some(retry_after.map_or(doubling, |wait| wait.max(doubling)))
        }
        500..=599 => Some(transport_backoff(attempt)),
        _ => None,
    }
}

fn transport_backoff(attempt: u32) -> StdDuration {
    StdDuration::from_millis(500 * 2u64.pow(attempt))
}

fn retry_after(response: &reqwest::Response) -> Option<StdDuration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(StdDuration::from_secs)
}

/// Query parameters for a market order, without timing fields.
fn order_params(request: &MarketOrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", request.symbol.clone()),
        ("side", request.side.as_str().to_string()),
        ("type", "MARKET".to_string()),
        ("quantity", request.quantity.normalize().to_string()),
    ];
    if let Some(position_side) = request.position_side {
        params.push(("positionSide", position_side.as_str().to_string()));
    }
    params
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Hex-encoded HMAC-SHA256 of the query string.
#[allow(clippy::result_large_err)]
fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| Error::Signing {
        message: format!("Failed to create HMAC: {}", e),
    })?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, PositionSide};
    use rust_decimal::Decimal;

    #[test]
    fn test_sign_query_known_vector() {
        // Example from the Binance signed endpoint documentation.
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let signature = sign_query(secret, query).unwrap();
        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_order_params() {
        let request = MarketOrderRequest::new("BTCUSDT", OrderSide::Buy, Decimal::new(10500, 6))
            .with_position_side(PositionSide::Long)
            .with_leverage(10);

        let query = encode_query(&order_params(&request));
        assert_eq!(
            query,
            "symbol=BTCUSDT&side=BUY&type=MARKET&quantity=0.0105&positionSide=LONG"
        );
    }

    #[test]
    fn test_order_params_without_position_side() {
        let request = MarketOrderRequest::new("ETHUSDT", OrderSide::Sell, Decimal::ONE);
        let params = order_params(&request);
        assert!(params.iter().all(|(k, _)| *k != "positionSide"));
    }

    #[test]
    fn test_debug_does_not_expose_credentials() {
        let client = BinanceFuturesClient::new(
            None,
            Some(BinanceCredentials::new("secret-key", "secret-secret")),
        )
        .unwrap();
        let debug_str = format!("{:?} {:?}", client, BinanceCredentials::new("a-key", "a-secret"));
        assert!(!debug_str.contains("secret-key"));
        assert!(!debug_str.contains("a-secret"));
        assert!(debug_str.contains("has_credentials: true"));
    }

    #[tokio::test]
    async fn test_signed_request_requires_credentials() {
        let client = BinanceFuturesClient::new(Some("http://127.0.0.1:9".to_string()), None).unwrap();
        let request = MarketOrderRequest::new("BTCUSDT", OrderSide::Buy, Decimal::ONE);
        let err = client.place_market_order(&request).await.unwrap_err();
        assert!(matches!(err, Error::Signing { .. }));
    }

    #[test]
    fn test_retry_backoff_by_status() {
        assert_eq!(retry_backoff(400, None, 0), None);
        assert_eq!(retry_backoff(401, None, 1), None);
        assert_eq!(retry_backoff(503, None, 0), Some(StdDuration::from_millis(500)));
        assert_eq!(retry_backoff(500, None, 2), Some(StdDuration::from_secs(2)));
        assert_eq!(retry_backoff(429, None, 1), Some(StdDuration::from_secs(4)));
        assert_eq!(
            retry_backoff(418, Some(StdDuration::from_secs(30)), 0),
            Some(StdDuration::from_secs(30))
        );
        assert_eq!(
            retry_backoff(429, Some(StdDuration::from_secs(1)), 0),
            Some(StdDuration::from_secs(2))
        );
    }
}
