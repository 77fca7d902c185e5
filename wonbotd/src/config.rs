//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Upbit credentials and endpoint
    pub upbit: UpbitConfig,

    /// Order execution and price watching parameters
    pub trading: TradingConfig,

    /// Startup recovery parameters
    pub recovery: RecoveryConfig,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Upbit API configuration.
#[derive(Debug, Clone)]
pub struct UpbitConfig {
    /// API access key
    pub access_key: String,
    /// API secret key
    pub secret_key: String,
    /// Base URL (overridable for tests)
    pub base_url: String,
}

/// Trading parameters.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Minimum order notional in KRW (Upbit: 5000)
    pub min_order_krw: Decimal,
    /// Order placement attempts (including the first)
    pub order_retry_attempts: u32,
    /// Backoff floor between placement attempts
    pub order_retry_wait_min: Duration,
    /// Backoff cap between placement attempts
    pub order_retry_wait_max: Duration,
    /// Total time budget waiting for a fill
    pub order_fill_timeout: Duration,
    /// Delay between fill status polls
    pub order_fill_poll: Duration,
    /// Delay between watcher price polls
    pub price_poll: Duration,
    /// Ticker fetch attempts per watcher tick
    pub price_retry_attempts: u32,
    /// Backoff floor between ticker attempts
    pub price_retry_wait_min: Duration,
    /// Backoff cap between ticker attempts
    pub price_retry_wait_max: Duration,
    /// How long a signal_id stays deduplicated
    pub signal_ttl: Duration,
}

impl TradingConfig {
    /// Number of fill status polls covered by the fill timeout.
    pub fn fill_poll_attempts(&self) -> u32 {
        let poll = self.order_fill_poll.as_secs_f64().max(0.001);
        let polls = (self.order_fill_timeout.as_secs_f64() / poll).ceil() as u32;
        polls.max(1)
    }
}

/// Startup recovery configuration.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Skip recovery even when holdings exist
    pub skip: bool,
    /// Market to recover (e.g., "KRW-BTC")
    pub market: Option<String>,
    /// Take-profit fraction for a recovered position
    pub tp: Decimal,
    /// Stop-loss fraction for a recovered position
    pub sl: Decimal,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Ok(Self {
            api: Self::load_api_config()?,
            upbit: Self::load_upbit_config()?,
            trading: Self::load_trading_config()?,
            recovery: Self::load_recovery_config()?,
        })
    }

    /// Create test configuration: no real credentials, fast timers.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            upbit: UpbitConfig {
                access_key: "test-access".to_string(),
                secret_key: "test-secret".to_string(),
                base_url: "https://api.upbit.com".to_string(),
            },
            trading: TradingConfig {
                min_order_krw: Decimal::new(5000, 0),
                order_retry_attempts: 3,
                order_retry_wait_min: Duration::from_millis(1),
                order_retry_wait_max: Duration::from_millis(2),
                order_fill_timeout: Duration::from_millis(20),
                order_fill_poll: Duration::from_millis(2),
                price_poll: Duration::from_millis(5),
                price_retry_attempts: 3,
                price_retry_wait_min: Duration::from_millis(1),
                price_retry_wait_max: Duration::from_millis(2),
                signal_ttl: Duration::from_secs(86400),
            },
            recovery: RecoveryConfig {
                skip: false,
                market: None,
                tp: Decimal::ZERO,
                sl: Decimal::ZERO,
            },
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("WONBOT_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port_str = env::var("WONBOT_API_PORT").unwrap_or_else(|_| "8080".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| DaemonError::Config(format!("Invalid WONBOT_API_PORT: {}", port_str)))?;

        Ok(ApiConfig { host, port })
    }

    fn load_upbit_config() -> DaemonResult<UpbitConfig> {
        let access_key = env::var("UPBIT_ACCESS_KEY")
            .map_err(|_| DaemonError::Config("Missing UPBIT_ACCESS_KEY".to_string()))?;
        let secret_key = env::var("UPBIT_SECRET_KEY")
            .map_err(|_| DaemonError::Config("Missing UPBIT_SECRET_KEY".to_string()))?;
        let base_url =
            env::var("UPBIT_BASE_URL").unwrap_or_else(|_| "https://api.upbit.com".to_string());

        Ok(UpbitConfig { access_key, secret_key, base_url })
    }

    fn load_trading_config() -> DaemonResult<TradingConfig> {
        Ok(TradingConfig {
            min_order_krw: Self::load_decimal_env("MIN_ORDER_KRW", Decimal::new(5000, 0))?,
            order_retry_attempts: Self::load_u32_env("ORDER_RETRY_ATTEMPTS", 3)?,
            order_retry_wait_min: Self::load_secs_env("ORDER_RETRY_WAIT_MIN", 1.0)?,
            order_retry_wait_max: Self::load_secs_env("ORDER_RETRY_WAIT_MAX", 4.0)?,
            order_fill_timeout: Self::load_secs_env("ORDER_FILL_TIMEOUT_SEC", 10.0)?,
            order_fill_poll: Self::load_secs_env("ORDER_FILL_POLL_SEC", 1.0)?,
            price_poll: Self::load_secs_env("PRICE_POLL_SEC", 1.0)?,
            price_retry_attempts: Self::load_u32_env("PRICE_RETRY_ATTEMPTS", 3)?,
            price_retry_wait_min: Self::load_secs_env("PRICE_RETRY_WAIT_MIN", 0.5)?,
            price_retry_wait_max: Self::load_secs_env("PRICE_RETRY_WAIT_MAX", 2.0)?,
            signal_ttl: Self::load_secs_env("SIGNAL_TTL_SEC", 86400.0)?,
        })
    }

    fn load_recovery_config() -> DaemonResult<RecoveryConfig> {
        let market = env::var("RECOVERY_MARKET")
            .ok()
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty());

        Ok(RecoveryConfig {
            skip: Self::load_bool_env("RECOVERY_SKIP", false),
            market,
            tp: Self::load_decimal_env("RECOVERY_TP", Decimal::ZERO)?,
            sl: Self::load_decimal_env("RECOVERY_SL", Decimal::ZERO)?,
        })
    }

    fn load_decimal_env(key: &str, default: Decimal) -> DaemonResult<Decimal> {
        match env::var(key) {
            Ok(val) if !val.is_empty() => Decimal::from_str(&val)
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            _ => Ok(default),
        }
    }

    fn load_u32_env(key: &str, default: u32) -> DaemonResult<u32> {
        match env::var(key) {
            Ok(val) if !val.is_empty() => val
                .parse::<u32>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            _ => Ok(default),
        }
    }

    fn load_secs_env(key: &str, default: f64) -> DaemonResult<Duration> {
        let secs = match env::var(key) {
            Ok(val) if !val.is_empty() => val
                .parse::<f64>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val)))?,
            _ => default,
        };
        if !secs.is_finite() || secs < 0.0 {
            return Err(DaemonError::Config(format!("Invalid {} value: {}", key, secs)));
        }
        Ok(Duration::from_secs_f64(secs))
    }

    fn load_bool_env(key: &str, default: bool) -> bool {
        match env::var(key) {
            Ok(val) if !val.is_empty() => {
                matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on")
            },
            _ => default,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.api.port, 0);
        assert_eq!(config.trading.min_order_krw, Decimal::new(5000, 0));
        assert!(config.recovery.market.is_none());
    }

    #[test]
    fn test_fill_poll_attempts_covers_timeout() {
        let mut trading = Config::test().trading;
        trading.order_fill_timeout = Duration::from_secs(10);
        trading.order_fill_poll = Duration::from_secs(1);
        assert_eq!(trading.fill_poll_attempts(), 10);

        trading.order_fill_poll = Duration::from_secs(3);
        assert_eq!(trading.fill_poll_attempts(), 4);

        // Always at least one poll
        trading.order_fill_timeout = Duration::ZERO;
        assert_eq!(trading.fill_poll_attempts(), 1);
    }
}
