//! Executor: turns order intents into confirmed fills.
//!
//! The Executor is the bridge between position bookkeeping and the
//! exchange. Placement retries transient failures with backoff, then
//! the fill is confirmed by polling the order until it is done.
//!
//! # Flow
//!
//! ```text
//! OrderIntent → notional gate → place (retry) → confirm (poll) → Fill
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use wonbot_domain::{ExitReason, Market, Price, Quantity};

use crate::error::{ExecError, ExecResult, ExchangeError};
use crate::ports::{ExchangePort, OrderSnapshot};
use crate::retry::RetryPolicy;

// =============================================================================
// Intents and Fills
// =============================================================================

/// An order the daemon wants executed.
#[derive(Debug, Clone)]
pub enum OrderIntent {
    /// Market buy spending `notional_krw` of KRW
    Entry { market: Market, notional_krw: Decimal },
    /// Market sell of the full position volume
    Exit { market: Market, volume: Quantity, reason: ExitReason },
}

impl OrderIntent {
    pub fn market(&self) -> &Market {
        match self {
            OrderIntent::Entry { market, .. } | OrderIntent::Exit { market, .. } => market,
        }
    }
}

/// A confirmed execution.
#[derive(Debug, Clone)]
pub struct Fill {
    /// Exchange order id
    pub order_id: String,
    /// Volume-weighted average execution price
    pub avg_price: Price,
    /// Executed base-asset volume
    pub volume: Quantity,
    /// When the fill was confirmed
    pub filled_at: DateTime<Utc>,
}

// =============================================================================
// Executor
// =============================================================================

/// Executes order intents against an exchange port.
pub struct Executor<E: ExchangePort> {
    exchange: Arc<E>,
    /// Exchange minimum order notional in KRW (Upbit: 5000)
    min_notional: Decimal,
    /// Retry policy for order placement
    place_retry: RetryPolicy,
    /// Fill confirmation polls before giving up
    confirm_attempts: u32,
    /// Delay between confirmation polls
    confirm_delay: Duration,
}

impl<E: ExchangePort> Executor<E> {
    pub fn new(
        exchange: Arc<E>,
        min_notional: Decimal,
        place_retry: RetryPolicy,
        confirm_attempts: u32,
        confirm_delay: Duration,
    ) -> Self {
        Self { exchange, min_notional, place_retry, confirm_attempts, confirm_delay }
    }

    pub fn exchange(&self) -> &Arc<E> {
        &self.exchange
    }

    /// Execute an intent to a confirmed fill.
    ///
    /// Entry notionals below the exchange minimum are refused without
    /// touching the exchange. Exits are never gated: the position must
    /// come off the book regardless of its residual value.
    pub async fn execute(&self, intent: OrderIntent) -> ExecResult<Fill> {
        if let OrderIntent::Entry { ref market, notional_krw } = intent {
            if notional_krw < self.min_notional {
                warn!(
                    market = %market.as_code(),
                    notional = %notional_krw,
                    min = %self.min_notional,
                    "Entry notional below exchange minimum, refusing"
                );
                return Err(ExecError::BelowMinNotional {
                    notional: notional_krw,
                    min: self.min_notional,
                });
            }
        }

        let order_id = self.place_with_retry(&intent).await?;
        self.confirm_fill(&intent, &order_id).await
    }

    /// Place the order, retrying transient failures with backoff.
    /// Non-transient exchange errors are terminal rejections.
    async fn place_with_retry(&self, intent: &OrderIntent) -> ExecResult<String> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match intent {
                OrderIntent::Entry { market, notional_krw } => {
                    info!(
                        market = %market.as_code(),
                        notional = %notional_krw,
                        attempt,
                        "Placing entry order"
                    );
                    self.exchange.place_market_buy(market, *notional_krw).await
                },
                OrderIntent::Exit { market, volume, reason } => {
                    info!(
                        market = %market.as_code(),
                        volume = %volume.as_decimal(),
                        %reason,
                        attempt,
                        "Placing exit order"
                    );
                    self.exchange.place_market_sell(market, *volume).await
                },
            };

            match result {
                Ok(placed) => {
                    info!(
                        market = %intent.market().as_code(),
                        order_id = %placed.order_id,
                        "Order accepted"
                    );
                    return Ok(placed.order_id);
                },
                Err(e) if e.is_transient() => match self.place_retry.delay_for(attempt) {
                    Some(delay) => {
                        warn!(
                            market = %intent.market().as_code(),
                            attempt,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Order placement failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    },
                    None => {
                        warn!(
                            market = %intent.market().as_code(),
                            attempt,
                            error = %e,
                            "Order placement retries exhausted"
                        );
                        return Err(ExecError::Exchange(e));
                    },
                },
                Err(e) => {
                    warn!(
                        market = %intent.market().as_code(),
                        error = %e,
                        "Order rejected by exchange"
                    );
                    return Err(ExecError::Rejected(e));
                },
            }
        }
    }

    /// Poll the order until it is fully executed.
    ///
    /// On exhausting the poll budget the order is cancelled best-effort
    /// and fetched one last time: a fill that landed in the meantime
    /// (including a partial fill cut short by the cancel) is still
    /// accepted. Only an order with no executed volume is unconfirmed.
    async fn confirm_fill(&self, intent: &OrderIntent, order_id: &str) -> ExecResult<Fill> {
        let mut polls = 0u32;

        while polls < self.confirm_attempts {
            polls += 1;
            tokio::time::sleep(self.confirm_delay).await;

            match self.exchange.get_order(order_id).await {
                Ok(snapshot) if snapshot.is_filled() => {
                    return self.fill_from_snapshot(intent, snapshot).await;
                },
                Ok(_) => {},
                Err(e) => {
                    warn!(order_id, poll = polls, error = %e, "Fill status check failed");
                },
            }
        }

        warn!(
            order_id,
            polls,
            "Fill not confirmed within poll budget, cancelling"
        );
        if let Err(e) = self.exchange.cancel_order(order_id).await {
            warn!(order_id, error = %e, "Cancel failed (order may already be done)");
        }

        // The order may have filled between the last poll and the cancel.
        match self.exchange.get_order(order_id).await {
            Ok(snapshot) if snapshot.filled_volume() > Decimal::ZERO => {
                info!(
                    order_id,
                    executed = %snapshot.filled_volume(),
                    "Accepting fill found after cancel"
                );
                self.fill_from_snapshot(intent, snapshot).await
            },
            Ok(_) => Err(ExecError::Unconfirmed {
                order_id: order_id.to_string(),
                attempts: self.confirm_attempts,
            }),
            Err(e) => {
                warn!(order_id, error = %e, "Final order fetch failed");
                Err(ExecError::Unconfirmed {
                    order_id: order_id.to_string(),
                    attempts: self.confirm_attempts,
                })
            },
        }
    }

    /// Build a `Fill` from a snapshot with executed volume.
    ///
    /// The average price is taken from the order itself when possible;
    /// the current ticker price is the fallback of last resort so a
    /// confirmed fill is never thrown away over missing trade detail.
    async fn fill_from_snapshot(
        &self,
        intent: &OrderIntent,
        snapshot: OrderSnapshot,
    ) -> ExecResult<Fill> {
        let volume = snapshot.filled_volume();
        let volume = Quantity::new(volume).map_err(|_| {
            ExecError::Exchange(ExchangeError::Parse(format!(
                "order {} reports non-positive executed volume",
                snapshot.order_id
            )))
        })?;

        let avg = match snapshot.average_fill_price() {
            Some(avg) => avg,
            None => {
                warn!(
                    order_id = %snapshot.order_id,
                    "No fill price on order, falling back to ticker"
                );
                self.exchange.get_price(intent.market()).await?.as_decimal()
            },
        };
        let avg_price = Price::new(avg).map_err(|_| {
            ExecError::Exchange(ExchangeError::Parse(format!(
                "order {} resolved to non-positive fill price",
                snapshot.order_id
            )))
        })?;

        info!(
            market = %intent.market().as_code(),
            order_id = %snapshot.order_id,
            avg_price = %avg_price.as_decimal(),
            volume = %volume.as_decimal(),
            "Fill confirmed"
        );

        Ok(Fill {
            order_id: snapshot.order_id,
            avg_price,
            volume,
            filled_at: snapshot.observed_at,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubExchange;
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market::from_code("KRW-BTC").unwrap()
    }

    fn fast_executor(exchange: Arc<StubExchange>) -> Executor<StubExchange> {
        Executor::new(
            exchange,
            dec!(5000),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)),
            5,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_entry_below_min_notional_is_refused() {
        let exchange = Arc::new(StubExchange::new(dec!(95000000)));
        let executor = fast_executor(exchange.clone());

        let result = executor
            .execute(OrderIntent::Entry { market: market(), notional_krw: dec!(4999) })
            .await;

        assert!(matches!(result, Err(ExecError::BelowMinNotional { .. })));
        assert_eq!(exchange.order_count(), 0);
    }

    #[tokio::test]
    async fn test_entry_fills_at_stub_price() {
        let exchange = Arc::new(StubExchange::new(dec!(100000)));
        let executor = fast_executor(exchange.clone());

        let fill = executor
            .execute(OrderIntent::Entry { market: market(), notional_krw: dec!(10000) })
            .await
            .unwrap();

        assert_eq!(fill.avg_price.as_decimal(), dec!(100000));
        // 10000 KRW at 100000/unit = 0.1 units
        assert_eq!(fill.volume.as_decimal(), dec!(0.1));
    }

    #[tokio::test]
    async fn test_transient_placement_failure_is_retried() {
        let exchange = Arc::new(StubExchange::new(dec!(100000)));
        exchange.fail_transient_times(2);
        let executor = fast_executor(exchange.clone());

        let fill = executor
            .execute(OrderIntent::Entry { market: market(), notional_krw: dec!(10000) })
            .await
            .unwrap();

        assert_eq!(fill.avg_price.as_decimal(), dec!(100000));
        assert_eq!(exchange.order_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_retry_budget() {
        let exchange = Arc::new(StubExchange::new(dec!(100000)));
        exchange.fail_transient_times(10);
        let executor = fast_executor(exchange.clone());

        let result = executor
            .execute(OrderIntent::Entry { market: market(), notional_krw: dec!(10000) })
            .await;

        assert!(matches!(result, Err(ExecError::Exchange(_))));
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let exchange = Arc::new(StubExchange::new(dec!(100000)));
        exchange.reject_next("insufficient_funds_bid", "not enough KRW");
        let executor = fast_executor(exchange.clone());

        let result = executor
            .execute(OrderIntent::Entry { market: market(), notional_krw: dec!(10000) })
            .await;

        match result {
            Err(ExecError::Rejected(e)) => {
                assert!(e.user_message().contains("insufficient_funds_bid"));
            },
            other => panic!("expected Rejected, got {other:?}"),
        }
        // No retry happened
        assert_eq!(exchange.order_count(), 1);
    }

    #[tokio::test]
    async fn test_delayed_fill_is_confirmed_by_polling() {
        let exchange = Arc::new(StubExchange::new(dec!(100000)));
        exchange.fill_after_polls(3);
        let executor = fast_executor(exchange.clone());

        let fill = executor
            .execute(OrderIntent::Entry { market: market(), notional_krw: dec!(10000) })
            .await
            .unwrap();

        assert_eq!(fill.volume.as_decimal(), dec!(0.1));
    }

    #[tokio::test]
    async fn test_never_filled_order_is_cancelled_and_unconfirmed() {
        let exchange = Arc::new(StubExchange::new(dec!(100000)));
        exchange.never_fill();
        let executor = fast_executor(exchange.clone());

        let result = executor
            .execute(OrderIntent::Entry { market: market(), notional_krw: dec!(10000) })
            .await;

        assert!(matches!(result, Err(ExecError::Unconfirmed { .. })));
        assert_eq!(exchange.cancelled_count(), 1);
    }

    #[tokio::test]
    async fn test_exit_is_not_notional_gated() {
        let exchange = Arc::new(StubExchange::new(dec!(100000)));
        let executor = fast_executor(exchange.clone());

        // Tiny residual position still exits cleanly
        let fill = executor
            .execute(OrderIntent::Exit {
                market: market(),
                volume: Quantity::new(dec!(0.00001)).unwrap(),
                reason: ExitReason::StopLoss,
            })
            .await
            .unwrap();

        assert_eq!(fill.volume.as_decimal(), dec!(0.00001));
    }
}
