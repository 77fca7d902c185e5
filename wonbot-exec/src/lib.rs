//! Wonbot Exec
//!
//! Order execution: the exchange port, the retry policy, and the
//! executor that turns intents into confirmed fills. A stub exchange
//! is provided for tests.

#![warn(clippy::all)]

pub mod error;
pub mod executor;
pub mod ports;
pub mod retry;
pub mod stub;

// Re-exports for convenience
pub use error::{ExecError, ExecResult, ExchangeError};
pub use executor::{Executor, Fill, OrderIntent};
pub use ports::{
    AccountBalance, ExchangePort, OrderSnapshot, OrderState, PlacedOrder, TradeFill,
};
pub use retry::RetryPolicy;
pub use stub::StubExchange;
