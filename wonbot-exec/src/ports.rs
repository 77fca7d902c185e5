//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services. Adapters
//! implement these ports for specific services (Upbit, stub).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wonbot_domain::{Market, Price, Quantity};

use crate::error::ExchangeError;

// =============================================================================
// Exchange Port
// =============================================================================

/// Port for exchange operations.
///
/// Implementations:
/// - `StubExchange` - For testing (scriptable prices and fills)
/// - `UpbitRestClient` - Real Upbit spot trading (wonbot-connectors)
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Place a market buy spending `notional_krw` of quote currency
    /// (Upbit `ord_type=price`). Returns the exchange order id.
    async fn place_market_buy(
        &self,
        market: &Market,
        notional_krw: Decimal,
    ) -> Result<PlacedOrder, ExchangeError>;

    /// Place a market sell of `volume` base asset (Upbit
    /// `ord_type=market`). Returns the exchange order id.
    async fn place_market_sell(
        &self,
        market: &Market,
        volume: Quantity,
    ) -> Result<PlacedOrder, ExchangeError>;

    /// Fetch the current status of an order, including its trades.
    async fn get_order(&self, order_id: &str) -> Result<OrderSnapshot, ExchangeError>;

    /// Cancel an open order. Used best-effort when confirmation fails.
    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;

    /// Get the last trade price for a market.
    async fn get_price(&self, market: &Market) -> Result<Price, ExchangeError>;

    /// Get account balances for all held assets.
    async fn get_accounts(&self) -> Result<Vec<AccountBalance>, ExchangeError>;
}

// =============================================================================
// Port Types
// =============================================================================

/// Acknowledgement of an accepted order placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    /// Exchange-assigned order id (Upbit uuid)
    pub order_id: String,
}

/// Order lifecycle state as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Resting / being matched
    Wait,
    /// Fully executed
    Done,
    /// Cancelled (possibly after partial execution)
    Cancelled,
}

/// One execution of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    pub price: Decimal,
    pub volume: Decimal,
}

/// Point-in-time view of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    /// Exchange order id
    pub order_id: String,
    /// Current lifecycle state
    pub state: OrderState,
    /// Executed base-asset volume so far
    pub executed_volume: Decimal,
    /// Remaining unexecuted volume
    pub remaining_volume: Decimal,
    /// Average price, when the exchange reports one directly
    pub avg_price: Option<Decimal>,
    /// Total KRW notional for `ord_type=price` buys
    pub total_notional: Option<Decimal>,
    /// Individual executions
    pub trades: Vec<TradeFill>,
    /// When this snapshot was taken
    pub observed_at: DateTime<Utc>,
}

impl OrderSnapshot {
    /// Whether the order is fully executed.
    pub fn is_filled(&self) -> bool {
        self.state == OrderState::Done && self.remaining_volume <= Decimal::ZERO
    }

    /// Executed volume: the exchange's `executed_volume` field, or the
    /// sum over trades when it is absent/zero.
    pub fn filled_volume(&self) -> Decimal {
        if self.executed_volume > Decimal::ZERO {
            return self.executed_volume;
        }
        self.trades.iter().map(|t| t.volume).sum()
    }

    /// Volume-weighted average fill price.
    ///
    /// Preference order mirrors Upbit's response shapes: trades when
    /// present, the reported `avg_price`, and for notional (`ord_type=
    /// price`) buys the spent notional divided by executed volume.
    pub fn average_fill_price(&self) -> Option<Decimal> {
        let trade_volume: Decimal = self.trades.iter().map(|t| t.volume).sum();
        if trade_volume > Decimal::ZERO {
            let total: Decimal = self.trades.iter().map(|t| t.price * t.volume).sum();
            return Some(total / trade_volume);
        }

        if let Some(avg) = self.avg_price {
            if avg > Decimal::ZERO {
                return Some(avg);
            }
        }

        if let Some(notional) = self.total_notional {
            let volume = self.filled_volume();
            if notional > Decimal::ZERO && volume > Decimal::ZERO {
                return Some(notional / volume);
            }
        }

        None
    }
}

/// One asset balance from the exchange accounts endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Asset code (e.g., "KRW", "BTC")
    pub currency: String,
    /// Available balance
    pub balance: Decimal,
    /// Exchange-tracked average buy price (zero when unknown)
    pub avg_buy_price: Decimal,
}

// =============================================================================
// Tests
// =============================================================================
