//! Daemon: main runtime orchestrator.
//!
//! Ties together all components:
//! - Position Manager (position lifecycle)
//! - Executor (order placement and confirmation)
//! - Price Watcher (autonomous TP/SL exits)
//! - API Server (webhook and status endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Recover an orphaned holding into the book (best-effort)
//! 4. Start API server
//! 5. Wait for shutdown (SIGINT)

use std::net::SocketAddr;
use std::sync::Arc;

use rust_decimal_macros::dec;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info};

use wonbot_connectors::UpbitRestClient;
use wonbot_exec::{ExchangePort, Executor, RetryPolicy, StubExchange};

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::position::PositionManager;
use crate::recovery::recover_position;
use crate::signal_guard::SignalGuard;
use crate::telemetry::Telemetry;
use crate::watcher::PriceWatcher;

// =============================================================================
// Daemon
// =============================================================================

/// The main wonbot daemon.
pub struct Daemon<E: ExchangePort + 'static> {
    config: Config,
    manager: Arc<PositionManager>,
    executor: Arc<Executor<E>>,
    watcher: Arc<PriceWatcher<E>>,
    telemetry: Arc<Telemetry>,
}

impl Daemon<StubExchange> {
    /// Create a daemon backed by the stub exchange (testing/development).
    pub fn new_stub(config: Config) -> Self {
        let exchange = Arc::new(StubExchange::new(dec!(100000)));
        Self::with_exchange(config, exchange)
    }
}

impl Daemon<UpbitRestClient> {
    /// Create a daemon backed by the live Upbit REST API.
    pub fn new_upbit(config: Config) -> Self {
        let exchange = Arc::new(UpbitRestClient::with_base_url(
            config.upbit.access_key.clone(),
            config.upbit.secret_key.clone(),
            config.upbit.base_url.clone(),
        ));
        Self::with_exchange(config, exchange)
    }
}

impl<E: ExchangePort + 'static> Daemon<E> {
    /// Create a daemon around any exchange implementation.
    pub fn with_exchange(config: Config, exchange: Arc<E>) -> Self {
        let trading = &config.trading;
        let executor = Arc::new(Executor::new(
            exchange,
            trading.min_order_krw,
            RetryPolicy::new(
                trading.order_retry_attempts,
                trading.order_retry_wait_min,
                trading.order_retry_wait_max,
            ),
            trading.fill_poll_attempts(),
            trading.order_fill_poll,
        ));
        let manager = Arc::new(PositionManager::new());
        let telemetry = Arc::new(Telemetry::new());
        let watcher = Arc::new(PriceWatcher::new(
            manager.clone(),
            executor.clone(),
            config.trading.clone(),
            telemetry.clone(),
        ));

        Self { config, manager, executor, watcher, telemetry }
    }

    /// The exchange behind the executor (stub scripting in tests).
    pub fn exchange(&self) -> &Arc<E> {
        self.executor.exchange()
    }

    /// Run the daemon.
    ///
    /// Blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            api_host = %self.config.api.host,
            api_port = self.config.api.port,
            "Starting wonbot daemon"
        );

        // 1. Recover an orphaned holding, if any
        if self.recover().await {
            self.watcher.ensure_running().await;
        }

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Wait for shutdown
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to listen for shutdown: {}", e)))?;
        info!("Received shutdown signal");

        self.shutdown().await;

        Ok(())
    }

    /// Best-effort startup recovery; true when a position was seeded.
    pub async fn recover(&self) -> bool {
        recover_position(
            self.executor.exchange().as_ref(),
            &self.manager,
            &self.config.recovery,
            &self.telemetry,
        )
        .await
    }

    /// Start the API server on the configured host/port.
    ///
    /// Returns the bound address (the OS picks the port when the
    /// configured port is 0).
    pub async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            manager: self.manager.clone(),
            guard: SignalGuard::new(self.config.trading.signal_ttl),
            executor: self.executor.clone(),
            watcher: self.watcher.clone(),
            telemetry: self.telemetry.clone(),
            order_lock: Mutex::new(()),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    async fn shutdown(&self) {
        // The watcher loop stops on its own when the book empties; an
        // open position stays on the exchange and is picked up by
        // recovery on the next start.
        let status = self.manager.status().await;
        info!(position_state = %status, "Shutdown complete");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wonbot_domain::BookStatus;

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let config = Config::test();
        let daemon = Daemon::new_stub(config);

        assert_eq!(daemon.manager.status().await, BookStatus::None);
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let config = Config::test();
        let daemon = Daemon::new_stub(config);

        let addr = daemon.start_api_server().await.unwrap();

        // Server should be running on a port
        assert!(addr.port() > 0);

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_daemon_recover_with_empty_account() {
        let config = Config::test();
        let daemon = Daemon::new_stub(config);

        assert!(!daemon.recover().await);
        assert_eq!(daemon.manager.status().await, BookStatus::None);
    }
}
