//! Wonbot Domain
//!
//! Pure domain types for single-position spot trading on Upbit:
//! validated value objects and the position lifecycle state machine.
//! No I/O lives here.

#![warn(clippy::all)]

pub mod position;
pub mod value_objects;

// Re-exports for convenience
pub use position::{BookStatus, PendingOpen, Position, PositionBook};
pub use value_objects::{DomainError, ExitReason, Fraction, Market, OrderSide, Price, Quantity};
