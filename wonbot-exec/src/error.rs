//! Execution layer error types.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by exchange adapters.
///
/// `is_transient` drives retry decisions: transport failures, timeouts,
/// rate limiting and upstream 5xx responses may be retried; exchange
/// validation errors are terminal.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// HTTP/transport failure before a response was received
    #[error("transport error: {0}")]
    Transport(String),

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Exchange returned an error response
    #[error("exchange API error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Exchange error name, when provided
        name: Option<String>,
        /// Exchange error message (or raw body)
        message: String,
    },

    /// Response body could not be parsed
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Transport(_) | ExchangeError::Timeout => true,
            ExchangeError::Api { status, .. } => *status >= 500 || *status == 429,
            ExchangeError::Parse(_) => false,
        }
    }

    /// Short message suitable for webhook callers and telemetry.
    pub fn user_message(&self) -> String {
        match self {
            ExchangeError::Api { name: Some(name), message, .. } => format!("{name}: {message}"),
            ExchangeError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors that can occur while executing an order intent.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Entry notional is below the exchange minimum; never submitted
    #[error("order below minimum notional: {notional} KRW < {min} KRW")]
    BelowMinNotional { notional: Decimal, min: Decimal },

    /// Exchange rejected the order placement (not retried)
    #[error("order rejected: {0}")]
    Rejected(ExchangeError),

    /// Order was placed but no fill was confirmed within the attempt budget
    #[error("order fill unconfirmed after {attempts} attempts (order {order_id})")]
    Unconfirmed { order_id: String, attempts: u32 },

    /// Other exchange communication error
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

impl ExecError {
    /// Short message suitable for webhook callers and telemetry.
    pub fn user_message(&self) -> String {
        match self {
            ExecError::Rejected(e) | ExecError::Exchange(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::Transport("reset".into()).is_transient());
        assert!(ExchangeError::Timeout.is_transient());
        assert!(ExchangeError::Api { status: 500, name: None, message: "oops".into() }.is_transient());
        assert!(ExchangeError::Api { status: 429, name: None, message: "slow down".into() }.is_transient());

        assert!(!ExchangeError::Api { status: 400, name: None, message: "bad".into() }.is_transient());
        assert!(!ExchangeError::Parse("garbage".into()).is_transient());
    }

    #[test]
    fn test_user_message_prefers_error_name() {
        let err = ExchangeError::Api {
            status: 400,
            name: Some("insufficient_funds_bid".into()),
            message: "주문가능한 금액(KRW)이 부족합니다.".into(),
        };
        assert!(err.user_message().starts_with("insufficient_funds_bid:"));
    }
}
