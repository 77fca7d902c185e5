//! Price watcher: the autonomous exit loop.
//!
//! While a position is open, one background task polls the ticker and
//! places the exit order when the take-profit or stop-loss threshold
//! is crossed. A failed exit returns the book to OPEN and the loop
//! keeps retrying on subsequent ticks; the watcher never gives up
//! while a position is held. The task terminates itself once the book
//! is empty.

use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use wonbot_domain::{BookStatus, ExitReason, Market, Position};
use wonbot_exec::{ExchangeError, ExchangePort, Executor, OrderIntent, RetryPolicy};

use crate::config::TradingConfig;
use crate::position::PositionManager;
use crate::telemetry::{EventKind, Telemetry};

/// Watches the market price and exits the open position on TP/SL.
pub struct PriceWatcher<E: ExchangePort + 'static> {
    manager: Arc<PositionManager>,
    executor: Arc<Executor<E>>,
    config: TradingConfig,
    telemetry: Arc<Telemetry>,
    task: Mutex<Option<JoinHandle<()>>>,
    last_price: RwLock<Option<Decimal>>,
}

impl<E: ExchangePort + 'static> PriceWatcher<E> {
    pub fn new(
        manager: Arc<PositionManager>,
        executor: Arc<Executor<E>>,
        config: TradingConfig,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            manager,
            executor,
            config,
            telemetry,
            task: Mutex::new(None),
            last_price: RwLock::new(None),
        }
    }

    /// Last ticker price the loop observed, for the status endpoint.
    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price.read().ok().and_then(|p| *p)
    }

    /// Start the watch loop if it is not already live. Safe to call on
    /// every position open; at most one loop runs at a time.
    pub async fn ensure_running(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        info!("Starting price watcher");
        let watcher = Arc::clone(self);
        *task = Some(tokio::spawn(async move { watcher.run().await }));
    }

    async fn run(&self) {
        loop {
            let position = match self.manager.status().await {
                BookStatus::Open | BookStatus::Closing => self.manager.snapshot().await,
                _ => None,
            };
            let Some(position) = position else {
                info!("No open position, price watcher stopping");
                return;
            };

            match self.fetch_price(&position.market).await {
                Ok(price) => {
                    if let Ok(mut last) = self.last_price.write() {
                        *last = Some(price);
                    }
                    self.telemetry.record_api_ok();

                    if price >= position.tp_price.as_decimal() {
                        self.trigger_exit(&position, ExitReason::TakeProfit, price).await;
                    } else if price <= position.sl_price.as_decimal() {
                        self.trigger_exit(&position, ExitReason::StopLoss, price).await;
                    }
                },
                Err(e) => {
                    // Transient price outage: keep the position, try
                    // again next tick.
                    error!(
                        market = %position.market.as_code(),
                        error = %e,
                        "Ticker fetch failed"
                    );
                    self.telemetry.record_api_error(&e.user_message());
                },
            }

            tokio::time::sleep(self.config.price_poll).await;
        }
    }

    /// Fetch the ticker with bounded retry inside one tick.
    async fn fetch_price(&self, market: &Market) -> Result<Decimal, ExchangeError> {
        let policy = RetryPolicy::new(
            self.config.price_retry_attempts,
            self.config.price_retry_wait_min,
            self.config.price_retry_wait_max,
        );

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.executor.exchange().get_price(market).await {
                Ok(price) => return Ok(price.as_decimal()),
                Err(e) => match policy.delay_for(attempt) {
                    Some(delay) => {
                        warn!(
                            market = %market.as_code(),
                            attempt,
                            error = %e,
                            "Ticker fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    },
                    None => return Err(e),
                },
            }
        }
    }

    /// Place the exit order for a crossed threshold.
    ///
    /// On execution failure the book returns to OPEN via abort_close
    /// and the trigger fires again on the next tick.
    async fn trigger_exit(&self, position: &Position, reason: ExitReason, trigger_price: Decimal) {
        info!(
            market = %position.market.as_code(),
            %reason,
            trigger = %trigger_price,
            entry = %position.entry_price,
            "Exit threshold crossed"
        );

        let closing = match self.manager.try_close().await {
            Ok(position) => position,
            Err(e) => {
                // Lost the race against another transition; the next
                // tick re-evaluates from fresh state.
                warn!(error = %e, "Close not started");
                return;
            },
        };

        let intent = OrderIntent::Exit {
            market: closing.market.clone(),
            volume: closing.quantity,
            reason,
        };

        match self.executor.execute(intent).await {
            Ok(fill) => {
                if let Err(e) = self.manager.commit_close().await {
                    error!(error = %e, "Close commit failed");
                    return;
                }

                let roi = fill.avg_price.as_decimal() / closing.entry_price.as_decimal()
                    - Decimal::ONE;
                info!(
                    market = %closing.market.as_code(),
                    %reason,
                    close_price = %fill.avg_price,
                    roi = %roi,
                    "Position closed"
                );
                self.telemetry.add_event(
                    &format!("Closed {} {}", closing.market.as_code(), reason),
                    EventKind::Close,
                    Some(roi),
                );
            },
            Err(e) => {
                if let Err(abort_err) = self.manager.abort_close().await {
                    error!(error = %abort_err, "Close abort failed");
                }
                error!(
                    market = %closing.market.as_code(),
                    %reason,
                    error = %e,
                    "Exit order failed, will retry"
                );
                self.telemetry.record_api_error(&e.user_message());
                self.telemetry.add_event(
                    &format!("Close failed {} {}", closing.market.as_code(), reason),
                    EventKind::Error,
                    None,
                );
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
