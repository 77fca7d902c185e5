//! Stub exchange for testing.
//!
//! Simulates Upbit order behavior without making real API calls:
//! immediate fills by default, with knobs for transient failures,
//! rejections, and delayed or missing fills.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use wonbot_domain::{Market, Price, Quantity};

use crate::error::ExchangeError;
use crate::ports::{
    AccountBalance, ExchangePort, OrderSnapshot, OrderState, PlacedOrder, TradeFill,
};

#[derive(Debug, Clone)]
struct StubOrder {
    market: String,
    /// Executed volume once the order fills
    volume: Decimal,
    /// Fill price
    price: Decimal,
    /// KRW notional for buys
    notional: Option<Decimal>,
    /// get_order calls remaining before the order reports Done
    polls_until_fill: Option<u32>,
    cancelled: bool,
}

#[derive(Default)]
struct StubState {
    prices: HashMap<String, Decimal>,
    accounts: Vec<AccountBalance>,
    orders: HashMap<String, StubOrder>,
    order_counter: u64,
    /// Remaining placements to fail with a transient error
    transient_failures: u32,
    /// Pending rejection for the next placement (name, message)
    rejection: Option<(String, String)>,
    /// Polls each new order waits before filling (None = immediate)
    fill_delay_polls: Option<u32>,
    /// New orders never fill until cancelled
    never_fill: bool,
    /// Price fetches to fail with a transient error
    price_failures: u32,
    /// Account fetches to fail with a transient error
    account_failures: u32,
    cancelled: u64,
}

/// Scriptable in-memory exchange.
pub struct StubExchange {
    default_price: Decimal,
    state: Mutex<StubState>,
}

impl StubExchange {
    pub fn new(default_price: Decimal) -> Self {
        Self { default_price, state: Mutex::new(StubState::default()) }
    }

    /// Set the ticker price for a market code.
    pub fn set_price(&self, market: &str, price: Decimal) {
        let mut state = self.state.lock().unwrap();
        state.prices.insert(market.to_string(), price);
    }

    /// Replace the account balances returned by `get_accounts`.
    pub fn set_accounts(&self, accounts: Vec<AccountBalance>) {
        let mut state = self.state.lock().unwrap();
        state.accounts = accounts;
    }

    /// Fail the next `n` order placements with a transient error.
    pub fn fail_transient_times(&self, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.transient_failures = n;
    }

    /// Reject the next order placement with an exchange error.
    pub fn reject_next(&self, name: &str, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.rejection = Some((name.to_string(), message.to_string()));
    }

    /// New orders report Wait for `n` status polls, then Done.
    pub fn fill_after_polls(&self, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.fill_delay_polls = Some(n);
    }

    /// New orders never fill; they stay Wait until cancelled.
    pub fn never_fill(&self) {
        let mut state = self.state.lock().unwrap();
        state.never_fill = true;
    }

    /// Fail the next `n` price fetches with a transient error.
    pub fn fail_price_times(&self, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.price_failures = n;
    }

    /// Fail the next `n` account fetches with a transient error.
    pub fn fail_accounts_times(&self, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.account_failures = n;
    }

    /// Orders placed so far (accepted placements only).
    pub fn order_count(&self) -> u64 {
        self.state.lock().unwrap().order_counter
    }

    /// Cancel calls received so far.
    pub fn cancelled_count(&self) -> u64 {
        self.state.lock().unwrap().cancelled
    }

    fn price_for(state: &StubState, default: Decimal, market: &Market) -> Decimal {
        state.prices.get(&market.as_code()).copied().unwrap_or(default)
    }

    fn place(
        &self,
        market: &Market,
        volume: Decimal,
        notional: Option<Decimal>,
    ) -> Result<PlacedOrder, ExchangeError> {
        let mut state = self.state.lock().unwrap();

        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(ExchangeError::Transport("simulated connection reset".to_string()));
        }
        if let Some((name, message)) = state.rejection.take() {
            return Err(ExchangeError::Api { status: 400, name: Some(name), message });
        }

        let price = Self::price_for(&state, self.default_price, market);
        state.order_counter += 1;
        let order_id = format!("stub-{}", state.order_counter);

        let polls_until_fill = if state.never_fill {
            None
        } else {
            Some(state.fill_delay_polls.unwrap_or(0))
        };

        state.orders.insert(
            order_id.clone(),
            StubOrder {
                market: market.as_code(),
                volume,
                price,
                notional,
                polls_until_fill,
                cancelled: false,
            },
        );

        Ok(PlacedOrder { order_id })
    }
}

#[async_trait]
impl ExchangePort for StubExchange {
    async fn place_market_buy(
        &self,
        market: &Market,
        notional_krw: Decimal,
    ) -> Result<PlacedOrder, ExchangeError> {
        let price = Self::price_for(&self.state.lock().unwrap(), self.default_price, market);
        let volume = notional_krw / price;
        self.place(market, volume, Some(notional_krw))
    }

    async fn place_market_sell(
        &self,
        market: &Market,
        volume: Quantity,
    ) -> Result<PlacedOrder, ExchangeError> {
        self.place(market, volume.as_decimal(), None)
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        let order = state.orders.get_mut(order_id).ok_or_else(|| ExchangeError::Api {
            status: 404,
            name: Some("order_not_found".to_string()),
            message: format!("no such order: {order_id}"),
        })?;

        let filled = match order.polls_until_fill {
            Some(0) => !order.cancelled,
            Some(ref mut n) if !order.cancelled => {
                *n -= 1;
                *n == 0
            },
            _ => false,
        };

        let (state_field, executed, remaining, trades) = if filled {
            (
                OrderState::Done,
                order.volume,
                Decimal::ZERO,
                vec![TradeFill { price: order.price, volume: order.volume }],
            )
        } else if order.cancelled {
            (OrderState::Cancelled, Decimal::ZERO, order.volume, Vec::new())
        } else {
            (OrderState::Wait, Decimal::ZERO, order.volume, Vec::new())
        };

        Ok(OrderSnapshot {
            order_id: order_id.to_string(),
            state: state_field,
            executed_volume: executed,
            remaining_volume: remaining,
            avg_price: filled.then_some(order.price),
            total_notional: order.notional,
            trades,
            observed_at: Utc::now(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().unwrap();
        state.cancelled += 1;
        if let Some(order) = state.orders.get_mut(order_id) {
            if order.polls_until_fill != Some(0) {
                order.cancelled = true;
            }
        }
        Ok(())
    }

    async fn get_price(&self, market: &Market) -> Result<Price, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        if state.price_failures > 0 {
            state.price_failures -= 1;
            return Err(ExchangeError::Timeout);
        }
        let price = Self::price_for(&state, self.default_price, market);
        Price::new(price).map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    async fn get_accounts(&self) -> Result<Vec<AccountBalance>, ExchangeError> {
        let mut state = self.state.lock().unwrap();
        if state.account_failures > 0 {
            state.account_failures -= 1;
            return Err(ExchangeError::Transport("simulated connection reset".to_string()));
        }
        Ok(state.accounts.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market::from_code("KRW-BTC").unwrap()
    }

    #[tokio::test]
    async fn test_buy_fills_immediately_by_default() {
        let exchange = StubExchange::new(dec!(100000));

        let placed = exchange.place_market_buy(&market(), dec!(10000)).await.unwrap();
        let snap = exchange.get_order(&placed.order_id).await.unwrap();

        assert!(snap.is_filled());
        assert_eq!(snap.filled_volume(), dec!(0.1));
        assert_eq!(snap.average_fill_price(), Some(dec!(100000)));
    }

    #[tokio::test]
    async fn test_fill_after_polls_counts_status_checks() {
        let exchange = StubExchange::new(dec!(100000));
        exchange.fill_after_polls(2);

        let placed = exchange.place_market_buy(&market(), dec!(10000)).await.unwrap();

        assert!(!exchange.get_order(&placed.order_id).await.unwrap().is_filled());
        assert!(exchange.get_order(&placed.order_id).await.unwrap().is_filled());
    }

    #[tokio::test]
    async fn test_cancel_marks_unfilled_order_cancelled() {
        let exchange = StubExchange::new(dec!(100000));
        exchange.never_fill();

        let placed = exchange.place_market_buy(&market(), dec!(10000)).await.unwrap();
        exchange.cancel_order(&placed.order_id).await.unwrap();

        let snap = exchange.get_order(&placed.order_id).await.unwrap();
        assert_eq!(snap.state, OrderState::Cancelled);
        assert_eq!(snap.filled_volume(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_price_override_per_market() {
        let exchange = StubExchange::new(dec!(100000));
        exchange.set_price("KRW-ETH", dec!(5000000));

        let eth = Market::from_code("KRW-ETH").unwrap();
        assert_eq!(exchange.get_price(&eth).await.unwrap().as_decimal(), dec!(5000000));
        assert_eq!(exchange.get_price(&market()).await.unwrap().as_decimal(), dec!(100000));
    }

    #[tokio::test]
    async fn test_transient_price_failures_recover() {
        let exchange = StubExchange::new(dec!(100000));
        exchange.fail_price_times(1);

        assert!(exchange.get_price(&market()).await.is_err());
        assert!(exchange.get_price(&market()).await.is_ok());
    }
}
