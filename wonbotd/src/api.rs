//! HTTP API for the wonbot daemon.
//!
//! Provides REST endpoints for:
//! - TradingView webhook intake (opens the position)
//! - Status (position, last price, telemetry)
//! - Account balances
//! - Health check

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use wonbot_domain::{DomainError, Fraction, Market, Position};
use wonbot_exec::{AccountBalance, ExchangeError, ExchangePort, ExecError, Executor, OrderIntent};

use crate::config::Config;
use crate::error::DaemonError;
use crate::position::PositionManager;
use crate::signal_guard::SignalGuard;
use crate::telemetry::{ApiStatus, EventKind, Telemetry, TelemetryEvent, WebhookStatus};
use crate::watcher::PriceWatcher;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct AppState<E: ExchangePort + 'static> {
    pub config: Config,
    pub manager: Arc<PositionManager>,
    pub guard: SignalGuard,
    pub executor: Arc<Executor<E>>,
    pub watcher: Arc<PriceWatcher<E>>,
    pub telemetry: Arc<Telemetry>,
    /// Serializes webhook order placement end to end
    pub order_lock: Mutex<()>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response after a successful webhook entry.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: String,
    pub position: Position,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_price: Option<Decimal>,
    pub server_time: DateTime<Utc>,
    pub webhook: WebhookStatus,
    pub api: ApiStatus,
    pub events: Vec<TelemetryEvent>,
}

/// Balances response.
#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    pub accounts: Vec<AccountBalance>,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message.into() }))
}

// =============================================================================
// Signal parsing
// =============================================================================

/// A validated webhook signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSignal {
    pub market: Market,
    pub signal_id: String,
    /// KRW notional to spend on entry
    pub notional_krw: Decimal,
    pub tp: Fraction,
    pub sl: Fraction,
}

fn field_as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// Validate the webhook payload.
///
/// TradingView templates produce numbers as either JSON numbers or
/// strings, so both are accepted. Missing required fields are all
/// listed in one rejection.
pub fn parse_signal(payload: &Value) -> Result<ParsedSignal, DaemonError> {
    const REQUIRED: [&str; 6] = ["market", "action", "signal_id", "tp", "sl", "price"];

    let missing: Vec<&str> = REQUIRED
        .iter()
        .filter(|field| payload.get(**field).is_none())
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(DaemonError::Validation(format!(
            "Missing fields: {}",
            missing.join(", ")
        )));
    }

    let action = payload["action"].as_str().unwrap_or_default();
    if action != "BUY" {
        return Err(DaemonError::Validation("Only BUY action supported".to_string()));
    }

    let notional_krw = field_as_decimal(&payload["price"]);
    let tp = field_as_decimal(&payload["tp"]);
    let sl = field_as_decimal(&payload["sl"]);
    let (Some(notional_krw), Some(tp), Some(sl)) = (notional_krw, tp, sl) else {
        return Err(DaemonError::Validation("Invalid numeric fields".to_string()));
    };

    if notional_krw <= Decimal::ZERO || tp <= Decimal::ZERO || sl <= Decimal::ZERO {
        return Err(DaemonError::Validation("price, tp, sl must be positive".to_string()));
    }

    let tp = Fraction::new(tp)
        .map_err(|_| DaemonError::Validation("tp must be between 0 and 1".to_string()))?;
    let sl = Fraction::new(sl)
        .map_err(|_| DaemonError::Validation("sl must be between 0 and 1".to_string()))?;

    let market_str = payload["market"].as_str().unwrap_or_default();
    let market = Market::from_code(market_str)
        .map_err(|e| DaemonError::Validation(format!("Invalid market: {e}")))?;

    let signal_id = match &payload["signal_id"] {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(DaemonError::Validation("Invalid signal_id".to_string())),
    };

    Ok(ParsedSignal { market, signal_id, notional_krw, tp, sl })
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<E>(state: Arc<AppState<E>>) -> Router
where
    E: ExchangePort + 'static,
{
    Router::new()
        .route("/webhook/tradingview", post(webhook_handler))
        .route("/status", get(status_handler))
        .route("/account/balances", get(balances_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// TradingView webhook: validate, deduplicate, open the position.
async fn webhook_handler<E>(
    State(state): State<Arc<AppState<E>>>,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError>
where
    E: ExchangePort + 'static,
{
    let payload: Value =
        serde_json::from_str(&body).map_err(|_| bad_request("Invalid JSON"))?;

    let signal = parse_signal(&payload).map_err(|e| match e {
        DaemonError::Validation(message) => bad_request(message),
        other => bad_request(other.to_string()),
    })?;
    state.telemetry.record_webhook(&signal.signal_id);

    if signal.notional_krw < state.config.trading.min_order_krw {
        return Err(bad_request("Price below minimum order size"));
    }

    // One entry at a time: dedup check, state reservation, and order
    // placement happen under the same lock.
    let _order_guard = state.order_lock.lock().await;

    if !state.guard.register(&signal.signal_id).await {
        warn!(signal_id = %signal.signal_id, "Duplicate signal rejected");
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse { error: "Duplicate signal_id".to_string() }),
        ));
    }

    state.manager.try_open(signal.market.clone(), signal.tp, signal.sl).await.map_err(|e| {
        match e {
            DomainError::PositionAlreadyOpen => (
                StatusCode::CONFLICT,
                Json(ErrorResponse { error: "Position already open".to_string() }),
            ),
            other => bad_request(other.to_string()),
        }
    })?;

    info!(
        market = %signal.market.as_code(),
        signal_id = %signal.signal_id,
        notional = %signal.notional_krw,
        "Entry signal accepted"
    );

    let intent = OrderIntent::Entry {
        market: signal.market.clone(),
        notional_krw: signal.notional_krw,
    };
    let fill = match state.executor.execute(intent).await {
        Ok(fill) => fill,
        Err(e) => {
            // The reservation must not outlive the failed entry.
            if let Err(abort_err) = state.manager.abort_open().await {
                error!(error = %abort_err, "Open abort failed");
            }
            state.telemetry.record_api_error(&e.user_message());
            state.telemetry.add_event(
                &format!("Order failed {}: {}", signal.market.as_code(), e.user_message()),
                EventKind::Error,
                None,
            );
            error!(market = %signal.market.as_code(), error = %e, "Entry order failed");
            return Err(exec_error_response(e));
        },
    };
    state.telemetry.record_api_ok();

    let position = state
        .manager
        .commit_open(fill.avg_price, fill.volume, fill.order_id)
        .await
        .map_err(|e| {
            error!(error = %e, "Open commit failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: "Order failed".to_string() }),
            )
        })?;

    info!(
        market = %position.market.as_code(),
        entry = %position.entry_price,
        quantity = %position.quantity,
        tp = %position.tp_price,
        sl = %position.sl_price,
        "Position opened"
    );
    state.telemetry.add_event(
        &format!("Opened {}", position.market.as_code()),
        EventKind::Open,
        None,
    );

    state.watcher.ensure_running().await;

    Ok(Json(WebhookResponse { status: "ok".to_string(), position }))
}

/// Get daemon status.
async fn status_handler<E>(State(state): State<Arc<AppState<E>>>) -> Json<StatusResponse>
where
    E: ExchangePort + 'static,
{
    let book_status = state.manager.status().await;
    Json(StatusResponse {
        state: book_status.to_string(),
        position: state.manager.snapshot().await,
        last_price: state.watcher.last_price(),
        server_time: Utc::now(),
        webhook: state.telemetry.webhook_status(),
        api: state.telemetry.api_status(),
        events: state.telemetry.events(),
    })
}

/// Get account balances from the exchange.
async fn balances_handler<E>(
    State(state): State<Arc<AppState<E>>>,
) -> Result<Json<BalancesResponse>, ApiError>
where
    E: ExchangePort + 'static,
{
    match state.executor.exchange().get_accounts().await {
        Ok(accounts) => {
            state.telemetry.record_api_ok();
            Ok(Json(BalancesResponse { accounts }))
        },
        Err(e) => {
            state.telemetry.record_api_error(&e.user_message());
            error!(error = %e, "Account fetch failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: "Failed to fetch accounts".to_string() }),
            ))
        },
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Map an execution failure to an HTTP response.
///
/// Exchange rejections keep their upstream status where it is a client
/// error (e.g., insufficient funds), upstream 5xx becomes 502, and
/// everything else is an opaque 500.
fn exec_error_response(error: ExecError) -> ApiError {
    let (status, message) = match &error {
        ExecError::BelowMinNotional { .. } => {
            (StatusCode::BAD_REQUEST, "Price below minimum order size".to_string())
        },
        ExecError::Rejected(e) | ExecError::Exchange(e) => match e {
            ExchangeError::Api { status, .. } if *status < 500 => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
                e.user_message(),
            ),
            ExchangeError::Api { .. } => (StatusCode::BAD_GATEWAY, e.user_message()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Order failed".to_string()),
        },
        ExecError::Unconfirmed { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Order failed".to_string())
        },
    };

    (status, Json(ErrorResponse { error: message }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_signal_accepts_numbers_and_strings() {
        let payload = json!({
            "market": "KRW-BTC",
            "action": "BUY",
            "signal_id": "tv-1",
            "price": 10000,
            "tp": "0.015",
            "sl": 0.01,
            "timeframe": "5m"
        });

        let signal = parse_signal(&payload).unwrap();
        assert_eq!(signal.market.as_code(), "KRW-BTC");
        assert_eq!(signal.notional_krw, dec!(10000));
        assert_eq!(signal.tp.as_decimal(), dec!(0.015));
        assert_eq!(signal.sl.as_decimal(), dec!(0.01));
        assert_eq!(signal.signal_id, "tv-1");
    }

    #[test]
    fn test_parse_signal_lists_all_missing_fields() {
        let payload = json!({"market": "KRW-BTC", "action": "BUY"});

        let err = parse_signal(&payload).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("signal_id"));
        assert!(message.contains("tp"));
        assert!(message.contains("sl"));
        assert!(message.contains("price"));
        assert!(!message.contains("market,"));
    }

    #[test]
    fn test_parse_signal_rejects_sell_action() {
        let payload = json!({
            "market": "KRW-BTC",
            "action": "SELL",
            "signal_id": "tv-1",
            "price": 10000,
            "tp": 0.015,
            "sl": 0.01
        });

        let err = parse_signal(&payload).unwrap_err().to_string();
        assert!(err.contains("Only BUY action supported"));
    }

    #[test]
    fn test_parse_signal_rejects_non_positive_numerics() {
        for (price, tp, sl) in [(0, 1, 1), (10000, 0, 1), (10000, 1, 0)] {
            let payload = json!({
                "market": "KRW-BTC",
                "action": "BUY",
                "signal_id": "tv-1",
                "price": price,
                "tp": Decimal::new(tp, 2),
                "sl": Decimal::new(sl, 2)
            });
            assert!(parse_signal(&payload).is_err());
        }
    }

    #[test]
    fn test_parse_signal_rejects_fraction_of_one_or_more() {
        let payload = json!({
            "market": "KRW-BTC",
            "action": "BUY",
            "signal_id": "tv-1",
            "price": 10000,
            "tp": 0.015,
            "sl": 1.5
        });

        let err = parse_signal(&payload).unwrap_err().to_string();
        assert!(err.contains("sl must be between 0 and 1"));
    }

    #[test]
    fn test_parse_signal_rejects_bad_market() {
        let payload = json!({
            "market": "BTCUSDT",
            "action": "BUY",
            "signal_id": "tv-1",
            "price": 10000,
            "tp": 0.015,
            "sl": 0.01
        });

        assert!(parse_signal(&payload).is_err());
    }

    #[test]
    fn test_exec_error_mapping() {
        let upstream_4xx = ExecError::Rejected(ExchangeError::Api {
            status: 400,
            name: Some("insufficient_funds_bid".to_string()),
            message: "not enough KRW".to_string(),
        });
        assert_eq!(exec_error_response(upstream_4xx).0, StatusCode::BAD_REQUEST);

        let upstream_5xx = ExecError::Exchange(ExchangeError::Api {
            status: 503,
            name: None,
            message: "maintenance".to_string(),
        });
        assert_eq!(exec_error_response(upstream_5xx).0, StatusCode::BAD_GATEWAY);

        let unconfirmed = ExecError::Unconfirmed { order_id: "o".to_string(), attempts: 5 };
        assert_eq!(
            exec_error_response(unconfirmed).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let below_min = ExecError::BelowMinNotional { notional: dec!(100), min: dec!(5000) };
        assert_eq!(exec_error_response(below_min).0, StatusCode::BAD_REQUEST);
    }
}
