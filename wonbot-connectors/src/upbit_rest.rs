//! Upbit REST API Client for Spot Trading
//!
//! Provides REST API integration for:
//! - Placing market buy (by KRW notional) and market sell orders
//! - Polling order state and trades
//! - Ticker prices and account balances
//! - Authentication via JWT bearer tokens (HS256)
//!
//! # Authentication
//!
//! Private endpoints take an `Authorization: Bearer <jwt>` header. The
//! token embeds a SHA512 hash of the exact query string sent, so the
//! query is built once and shared between the URL and the signature
//! (see `auth`).

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use wonbot_domain::{Market, OrderSide, Price, Quantity};
use wonbot_exec::{
    AccountBalance, ExchangeError, ExchangePort, OrderSnapshot, OrderState, PlacedOrder, TradeFill,
};

use crate::auth::{build_query_string, create_jwt_token, AuthError};

// =============================================================================
// Constants
// =============================================================================

/// Upbit REST API base URL
const UPBIT_API_URL: &str = "https://api.upbit.com";

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the Upbit REST client.
#[derive(Debug, Clone, Error)]
pub enum UpbitRestError {
    /// Failed to build the auth token
    #[error("Failed to build auth token: {0}")]
    Auth(#[from] AuthError),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// API returned an error response
    #[error("Upbit API error {status}: {message}")]
    ApiError {
        status: u16,
        name: Option<String>,
        message: String,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,
}

impl From<UpbitRestError> for ExchangeError {
    fn from(err: UpbitRestError) -> Self {
        match err {
            UpbitRestError::Auth(e) => ExchangeError::Transport(e.to_string()),
            UpbitRestError::RequestFailed(msg) => ExchangeError::Transport(msg),
            UpbitRestError::ApiError { status, name, message } => {
                ExchangeError::Api { status, name, message }
            },
            UpbitRestError::ParseError(msg) => ExchangeError::Parse(msg),
            UpbitRestError::Timeout => ExchangeError::Timeout,
        }
    }
}

// =============================================================================
// Upbit REST Client
// =============================================================================

/// Upbit REST API client for KRW spot trading.
pub struct UpbitRestClient {
    /// HTTP client
    client: Client,
    /// API access key
    access_key: String,
    /// API secret key
    secret_key: String,
    /// API base URL (overridable for tests)
    base_url: String,
}

impl UpbitRestClient {
    /// Create a new Upbit REST client against the production API.
    pub fn new(access_key: String, secret_key: String) -> Self {
        Self::with_base_url(access_key, secret_key, UPBIT_API_URL.to_string())
    }

    /// Create a client against a custom base URL.
    pub fn with_base_url(access_key: String, secret_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            access_key,
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Send a request, optionally authenticated.
    ///
    /// Upbit accepts all parameters in the query string, for POST and
    /// DELETE included.
    async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        auth: bool,
    ) -> Result<String, UpbitRestError> {
        let query = build_query_string(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self.client.request(method.clone(), &url);
        if auth {
            let query_opt = (!query.is_empty()).then_some(query.as_str());
            let token = create_jwt_token(&self.access_key, &self.secret_key, query_opt)?;
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), request.send())
            .await
            .map_err(|_| UpbitRestError::Timeout)?
            .map_err(|e| UpbitRestError::RequestFailed(e.to_string()))?;

        if let Some(remaining) = response.headers().get("remaining-req") {
            debug!(remaining = ?remaining, %path, "Upbit rate limit");
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UpbitRestError::ParseError(e.to_string()))?;

        debug!(method = %method, %path, status = status.as_u16(), "Upbit response");

        if !status.is_success() {
            let (name, message) = parse_error_body(&body);
            return Err(UpbitRestError::ApiError {
                status: status.as_u16(),
                name,
                message: message.unwrap_or_else(|| body.clone()),
            });
        }

        Ok(body)
    }

    // =========================================================================
    // Order API
    // =========================================================================

    /// Place a market buy spending `notional_krw`.
    ///
    /// # Endpoint
    ///
    /// `POST /v1/orders` with `ord_type=price`: Upbit fills the order
    /// for the given KRW amount at market.
    pub async fn place_market_buy_order(
        &self,
        market: &str,
        notional_krw: Decimal,
    ) -> Result<UpbitOrder, UpbitRestError> {
        let params = vec![
            ("market", market.to_string()),
            ("side", OrderSide::Bid.to_string()),
            ("price", notional_krw.to_string()),
            ("ord_type", "price".to_string()),
        ];

        let body = self.request(Method::POST, "/v1/orders", &params, true).await?;
        serde_json::from_str(&body).map_err(|e| UpbitRestError::ParseError(e.to_string()))
    }

    /// Place a market sell of `volume` base asset.
    ///
    /// # Endpoint
    ///
    /// `POST /v1/orders` with `ord_type=market`.
    pub async fn place_market_sell_order(
        &self,
        market: &str,
        volume: Decimal,
    ) -> Result<UpbitOrder, UpbitRestError> {
        let params = vec![
            ("market", market.to_string()),
            ("side", OrderSide::Ask.to_string()),
            ("volume", volume.to_string()),
            ("ord_type", "market".to_string()),
        ];

        let body = self.request(Method::POST, "/v1/orders", &params, true).await?;
        serde_json::from_str(&body).map_err(|e| UpbitRestError::ParseError(e.to_string()))
    }

    /// Query an order with its trades.
    ///
    /// # Endpoint
    ///
    /// `GET /v1/order`
    pub async fn get_order_status(&self, order_uuid: &str) -> Result<UpbitOrder, UpbitRestError> {
        let params = vec![("uuid", order_uuid.to_string())];

        let body = self.request(Method::GET, "/v1/order", &params, true).await?;
        serde_json::from_str(&body).map_err(|e| UpbitRestError::ParseError(e.to_string()))
    }

    /// Cancel an open order.
    ///
    /// # Endpoint
    ///
    /// `DELETE /v1/order`
    pub async fn cancel_order_by_uuid(&self, order_uuid: &str) -> Result<UpbitOrder, UpbitRestError> {
        let params = vec![("uuid", order_uuid.to_string())];

        let body = self.request(Method::DELETE, "/v1/order", &params, true).await?;
        serde_json::from_str(&body).map_err(|e| UpbitRestError::ParseError(e.to_string()))
    }

    // =========================================================================
    // Market Data / Account API
    // =========================================================================

    /// Get the last trade price for a market.
    ///
    /// Uses the public ticker endpoint, no authentication required.
    pub async fn get_ticker(&self, market: &str) -> Result<Decimal, UpbitRestError> {
        let params = vec![("markets", market.to_string())];

        let body = self.request(Method::GET, "/v1/ticker", &params, false).await?;
        let tickers: Vec<UpbitTicker> =
            serde_json::from_str(&body).map_err(|e| UpbitRestError::ParseError(e.to_string()))?;

        tickers
            .into_iter()
            .next()
            .map(|t| t.trade_price)
            .ok_or_else(|| UpbitRestError::ParseError(format!("Empty ticker response for {market}")))
    }

    /// Get all account balances.
    ///
    /// # Endpoint
    ///
    /// `GET /v1/accounts`
    pub async fn get_account_list(&self) -> Result<Vec<UpbitAccount>, UpbitRestError> {
        let body = self.request(Method::GET, "/v1/accounts", &[], true).await?;
        serde_json::from_str(&body).map_err(|e| UpbitRestError::ParseError(e.to_string()))
    }
}

fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(payload) = serde_json::from_str::<UpbitErrorResponse>(body) else {
        return (None, None);
    };
    (payload.error.name, payload.error.message)
}

// =============================================================================
// Upbit Types (from API responses)
// =============================================================================

/// Upbit error response: `{"error": {"name": ..., "message": ...}}`.
#[derive(Debug, Deserialize)]
struct UpbitErrorResponse {
    error: UpbitErrorBody,
}

#[derive(Debug, Deserialize)]
struct UpbitErrorBody {
    name: Option<String>,
    message: Option<String>,
}

/// An order as returned by `/v1/orders` and `/v1/order`.
///
/// Upbit encodes decimals as JSON strings; `rust_decimal` parses them
/// directly.
#[derive(Debug, Clone, Deserialize)]
pub struct UpbitOrder {
    /// Exchange order id
    pub uuid: String,
    /// "bid" or "ask"
    pub side: String,
    /// "price" (notional buy), "market" (sell), or "limit"
    pub ord_type: String,
    /// Lifecycle state: "wait", "watch", "done", "cancel"
    pub state: String,
    /// Market code (e.g., "KRW-BTC")
    pub market: String,
    /// KRW notional for `ord_type=price`, limit price otherwise
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Average fill price, when reported
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    /// Requested volume
    #[serde(default)]
    pub volume: Option<Decimal>,
    /// Unexecuted volume
    #[serde(default)]
    pub remaining_volume: Option<Decimal>,
    /// Executed volume
    #[serde(default)]
    pub executed_volume: Option<Decimal>,
    /// Individual executions (present on `/v1/order`)
    #[serde(default)]
    pub trades: Vec<UpbitTrade>,
}

/// A single execution of an order.
#[derive(Debug, Clone, Deserialize)]
pub struct UpbitTrade {
    pub price: Decimal,
    pub volume: Decimal,
}

/// Ticker response entry.
#[derive(Debug, Deserialize)]
struct UpbitTicker {
    trade_price: Decimal,
}

/// An account balance entry from `/v1/accounts`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpbitAccount {
    /// Asset code (e.g., "KRW", "BTC")
    pub currency: String,
    /// Available balance
    pub balance: Decimal,
    /// Balance locked in open orders
    #[serde(default)]
    pub locked: Option<Decimal>,
    /// Exchange-tracked average buy price
    #[serde(default)]
    pub avg_buy_price: Option<Decimal>,
}

impl From<UpbitOrder> for OrderSnapshot {
    fn from(order: UpbitOrder) -> Self {
        let state = match order.state.as_str() {
            "done" => OrderState::Done,
            "cancel" => OrderState::Cancelled,
            _ => OrderState::Wait,
        };

        OrderSnapshot {
            order_id: order.uuid,
            state,
            executed_volume: order.executed_volume.unwrap_or(Decimal::ZERO),
            remaining_volume: order.remaining_volume.unwrap_or(Decimal::ZERO),
            avg_price: order.avg_price,
            // For notional buys `price` is the KRW spent, which lets the
            // average fill price be recovered without trade detail.
            total_notional: (order.ord_type == "price").then_some(order.price).flatten(),
            trades: order
                .trades
                .into_iter()
                .map(|t| TradeFill { price: t.price, volume: t.volume })
                .collect(),
            observed_at: Utc::now(),
        }
    }
}

// =============================================================================
// ExchangePort implementation
// =============================================================================

#[async_trait]
impl ExchangePort for UpbitRestClient {
    async fn place_market_buy(
        &self,
        market: &Market,
        notional_krw: Decimal,
    ) -> Result<PlacedOrder, ExchangeError> {
        let order = self.place_market_buy_order(&market.as_code(), notional_krw).await?;
        Ok(PlacedOrder { order_id: order.uuid })
    }

    async fn place_market_sell(
        &self,
        market: &Market,
        volume: Quantity,
    ) -> Result<PlacedOrder, ExchangeError> {
        let order = self.place_market_sell_order(&market.as_code(), volume.as_decimal()).await?;
        Ok(PlacedOrder { order_id: order.uuid })
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot, ExchangeError> {
        let order = self.get_order_status(order_id).await?;
        Ok(order.into())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        self.cancel_order_by_uuid(order_id).await?;
        Ok(())
    }

    async fn get_price(&self, market: &Market) -> Result<Price, ExchangeError> {
        let price = self.get_ticker(&market.as_code()).await?;
        Price::new(price)
            .map_err(|e| ExchangeError::Parse(format!("Invalid ticker price: {e}")))
    }

    async fn get_accounts(&self) -> Result<Vec<AccountBalance>, ExchangeError> {
        let accounts = self.get_account_list().await?;
        Ok(accounts
            .into_iter()
            .map(|a| AccountBalance {
                currency: a.currency,
                balance: a.balance,
                avg_buy_price: a.avg_buy_price.unwrap_or(Decimal::ZERO),
            })
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
