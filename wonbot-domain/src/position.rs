//! The single-position state machine.
//!
//! `PositionBook` is the sole source of truth for "is there an open
//! position, and what are its exit thresholds". It holds at most one
//! position and cycles through:
//!
//! ```text
//! None → Opening → Open → Closing → None
//!          ↓ abort_open        ↓ abort_close (back to Open)
//!         None
//! ```
//!
//! The book itself is pure and synchronous; callers are expected to
//! wrap it in a mutex so transitions are linearized.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{DomainError, Fraction, Market, Price, Quantity};

// =============================================================================
// Position
// =============================================================================

/// An open (or closing) position with its derived exit thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Market being held (e.g., KRW-BTC)
    pub market: Market,
    /// Average fill price of the confirmed entry order
    pub entry_price: Price,
    /// Filled base-asset volume of the entry order
    pub quantity: Quantity,
    /// Take-profit offset the signal requested
    pub tp_fraction: Fraction,
    /// Stop-loss offset the signal requested
    pub sl_fraction: Fraction,
    /// Absolute take-profit threshold: entry * (1 + tp)
    pub tp_price: Price,
    /// Absolute stop-loss threshold: entry * (1 - sl)
    pub sl_price: Price,
    /// When the entry fill was confirmed
    pub opened_at: DateTime<Utc>,
    /// Exchange order id of the entry ("RECOVERED" for seeded positions)
    pub order_id: String,
}

impl Position {
    fn from_fill(
        market: Market,
        entry_price: Price,
        quantity: Quantity,
        tp_fraction: Fraction,
        sl_fraction: Fraction,
        order_id: String,
    ) -> Self {
        let entry = entry_price.as_decimal();
        // Fraction invariants (0 < f < 1) keep both thresholds positive,
        // so these constructors cannot fail.
        let tp_price = Price::new(entry * (Decimal::ONE + tp_fraction.as_decimal()))
            .expect("tp threshold is positive");
        let sl_price = Price::new(entry * (Decimal::ONE - sl_fraction.as_decimal()))
            .expect("sl threshold is positive");

        Self {
            market,
            entry_price,
            quantity,
            tp_fraction,
            sl_fraction,
            tp_price,
            sl_price,
            opened_at: Utc::now(),
            order_id,
        }
    }
}

// =============================================================================
// Book state
// =============================================================================

/// Reported lifecycle status of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookStatus {
    /// No position held or in flight
    None,
    /// Entry order placed, fill not yet confirmed
    Opening,
    /// Position held, exit watch active
    Open,
    /// Exit order placed, fill not yet confirmed
    Closing,
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookStatus::None => write!(f, "NONE"),
            BookStatus::Opening => write!(f, "OPENING"),
            BookStatus::Open => write!(f, "OPEN"),
            BookStatus::Closing => write!(f, "CLOSING"),
        }
    }
}

/// Parameters reserved by `try_open` while the entry order is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOpen {
    pub market: Market,
    pub tp_fraction: Fraction,
    pub sl_fraction: Fraction,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum BookState {
    None,
    Opening(PendingOpen),
    Open(Position),
    Closing(Position),
}

// =============================================================================
// PositionBook
// =============================================================================

/// Single-position state machine. At most one position may be in
/// flight at any time; every precondition violation is rejected
/// without side effects.
#[derive(Debug)]
pub struct PositionBook {
    state: BookState,
}

impl PositionBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self { state: BookState::None }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> BookStatus {
        match self.state {
            BookState::None => BookStatus::None,
            BookState::Opening(_) => BookStatus::Opening,
            BookState::Open(_) => BookStatus::Open,
            BookState::Closing(_) => BookStatus::Closing,
        }
    }

    /// Snapshot of the held position (Open or Closing), if any.
    pub fn position(&self) -> Option<&Position> {
        match &self.state {
            BookState::Open(position) | BookState::Closing(position) => Some(position),
            _ => None,
        }
    }

    /// True while a position is held or an entry/exit is in flight.
    pub fn is_busy(&self) -> bool {
        !matches!(self.state, BookState::None)
    }

    /// Reserve the book for a new entry.
    ///
    /// Fails with `PositionAlreadyOpen` unless the book is empty.
    /// The caller must follow up with `commit_open` (confirmed fill)
    /// or `abort_open` (execution failure).
    pub fn try_open(
        &mut self,
        market: Market,
        tp_fraction: Fraction,
        sl_fraction: Fraction,
    ) -> Result<PendingOpen, DomainError> {
        if !matches!(self.state, BookState::None) {
            return Err(DomainError::PositionAlreadyOpen);
        }

        let pending = PendingOpen {
            market,
            tp_fraction,
            sl_fraction,
            requested_at: Utc::now(),
        };
        self.state = BookState::Opening(pending.clone());
        Ok(pending)
    }

    /// Record a confirmed entry fill; Opening → Open.
    ///
    /// Thresholds are derived from the actual fill price, never the
    /// signal's reference price.
    pub fn commit_open(
        &mut self,
        entry_price: Price,
        quantity: Quantity,
        order_id: String,
    ) -> Result<Position, DomainError> {
        let pending = match &self.state {
            BookState::Opening(pending) => pending.clone(),
            other => {
                return Err(DomainError::InvalidTransition(format!(
                    "commit_open requires OPENING, book is {}",
                    status_of(other)
                )))
            }
        };

        let position = Position::from_fill(
            pending.market,
            entry_price,
            quantity,
            pending.tp_fraction,
            pending.sl_fraction,
            order_id,
        );
        self.state = BookState::Open(position.clone());
        Ok(position)
    }

    /// Entry execution failed; Opening → None.
    pub fn abort_open(&mut self) -> Result<(), DomainError> {
        match self.state {
            BookState::Opening(_) => {
                self.state = BookState::None;
                Ok(())
            }
            ref other => Err(DomainError::InvalidTransition(format!(
                "abort_open requires OPENING, book is {}",
                status_of(other)
            ))),
        }
    }

    /// Begin closing the held position; Open → Closing.
    ///
    /// Fails with `NoOpenPosition` unless the book is Open. Returns a
    /// snapshot of the position being closed.
    pub fn try_close(&mut self) -> Result<Position, DomainError> {
        let position = match &self.state {
            BookState::Open(position) => position.clone(),
            BookState::None | BookState::Opening(_) => return Err(DomainError::NoOpenPosition),
            BookState::Closing(_) => {
                return Err(DomainError::InvalidTransition(
                    "close already in flight".to_string(),
                ))
            }
        };

        self.state = BookState::Closing(position.clone());
        Ok(position)
    }

    /// Exit fill confirmed; Closing → None. Returns the cleared position.
    pub fn commit_close(&mut self) -> Result<Position, DomainError> {
        match std::mem::replace(&mut self.state, BookState::None) {
            BookState::Closing(position) => Ok(position),
            other => {
                let err = DomainError::InvalidTransition(format!(
                    "commit_close requires CLOSING, book is {}",
                    status_of(&other)
                ));
                self.state = other;
                Err(err)
            }
        }
    }

    /// Exit execution failed; Closing → Open. The position stays live
    /// and must keep being watched.
    pub fn abort_close(&mut self) -> Result<(), DomainError> {
        match std::mem::replace(&mut self.state, BookState::None) {
            BookState::Closing(position) => {
                self.state = BookState::Open(position);
                Ok(())
            }
            other => {
                let err = DomainError::InvalidTransition(format!(
                    "abort_close requires CLOSING, book is {}",
                    status_of(&other)
                ));
                self.state = other;
                Err(err)
            }
        }
    }

    /// Install a recovered holding directly as Open (startup recovery
    /// only). Fails unless the book is empty.
    pub fn seed_open(
        &mut self,
        market: Market,
        entry_price: Price,
        quantity: Quantity,
        tp_fraction: Fraction,
        sl_fraction: Fraction,
    ) -> Result<Position, DomainError> {
        if !matches!(self.state, BookState::None) {
            return Err(DomainError::PositionAlreadyOpen);
        }

        let position = Position::from_fill(
            market,
            entry_price,
            quantity,
            tp_fraction,
            sl_fraction,
            "RECOVERED".to_string(),
        );
        self.state = BookState::Open(position.clone());
        Ok(position)
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

fn status_of(state: &BookState) -> BookStatus {
    match state {
        BookState::None => BookStatus::None,
        BookState::Opening(_) => BookStatus::Opening,
        BookState::Open(_) => BookStatus::Open,
        BookState::Closing(_) => BookStatus::Closing,
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

    fn fractions() -> (Fraction, Fraction) {
        (Fraction::new(dec!(0.015)).unwrap(), Fraction::new(dec!(0.01)).unwrap())
    }

    fn open_book() -> PositionBook {
        let mut book = PositionBook::new();
        let (tp, sl) = fractions();
        book.try_open(market(), tp, sl).unwrap();
        book.commit_open(
            Price::new(dec!(10050)).unwrap(),
            Quantity::new(dec!(0.001)).unwrap(),
            "order-1".to_string(),
        )
        .unwrap();
        book
    }

    #[test]
    fn test_full_lifecycle() {
        let mut book = PositionBook::new();
        assert_eq!(book.status(), BookStatus::None);

        let (tp, sl) = fractions();
        book.try_open(market(), tp, sl).unwrap();
        assert_eq!(book.status(), BookStatus::Opening);

        book.commit_open(
            Price::new(dec!(10050)).unwrap(),
            Quantity::new(dec!(0.001)).unwrap(),
            "order-1".to_string(),
        )
        .unwrap();
        assert_eq!(book.status(), BookStatus::Open);

        book.try_close().unwrap();
        assert_eq!(book.status(), BookStatus::Closing);

        let closed = book.commit_close().unwrap();
        assert_eq!(closed.market, market());
        assert_eq!(book.status(), BookStatus::None);
        assert!(book.position().is_none());
    }

    #[test]
    fn test_thresholds_from_fill_price() {
        // Signal requested 10000 but the fill landed at 10050; thresholds
        // must come from the fill.
        let book = open_book();
        let position = book.position().unwrap();

        assert_eq!(position.entry_price.as_decimal(), dec!(10050));
        assert_eq!(position.tp_price.as_decimal(), dec!(10200.750));
        assert_eq!(position.sl_price.as_decimal(), dec!(9949.50));
    }

    #[test]
    fn test_threshold_ordering_holds_for_valid_fractions() {
        for (tp, sl) in [(dec!(0.001), dec!(0.001)), (dec!(0.5), dec!(0.25)), (dec!(0.015), dec!(0.01))] {
            let mut book = PositionBook::new();
            book.try_open(
                market(),
                Fraction::new(tp).unwrap(),
                Fraction::new(sl).unwrap(),
            )
            .unwrap();
            let position = book
                .commit_open(
                    Price::new(dec!(10050)).unwrap(),
                    Quantity::new(dec!(1)).unwrap(),
                    "o".to_string(),
                )
                .unwrap();

            assert!(position.sl_price < position.entry_price);
            assert!(position.entry_price < position.tp_price);
        }
    }

    #[test]
    fn test_second_open_rejected_while_opening() {
        let mut book = PositionBook::new();
        let (tp, sl) = fractions();
        book.try_open(market(), tp, sl).unwrap();

        let result = book.try_open(market(), tp, sl);
        assert_eq!(result.unwrap_err(), DomainError::PositionAlreadyOpen);
        assert_eq!(book.status(), BookStatus::Opening);
    }

    #[test]
    fn test_second_open_rejected_while_open_and_closing() {
        let mut book = open_book();
        let (tp, sl) = fractions();

        assert_eq!(
            book.try_open(market(), tp, sl).unwrap_err(),
            DomainError::PositionAlreadyOpen
        );

        book.try_close().unwrap();
        assert_eq!(
            book.try_open(market(), tp, sl).unwrap_err(),
            DomainError::PositionAlreadyOpen
        );
    }

    #[test]
    fn test_abort_open_returns_to_none() {
        let mut book = PositionBook::new();
        let (tp, sl) = fractions();
        book.try_open(market(), tp, sl).unwrap();

        book.abort_open().unwrap();
        assert_eq!(book.status(), BookStatus::None);

        // A fresh open must succeed after the abort.
        assert!(book.try_open(market(), tp, sl).is_ok());
    }

    #[test]
    fn test_abort_close_returns_to_open_with_same_position() {
        let mut book = open_book();
        let before = book.position().unwrap().clone();

        book.try_close().unwrap();
        book.abort_close().unwrap();

        assert_eq!(book.status(), BookStatus::Open);
        assert_eq!(book.position().unwrap(), &before);
    }

    #[test]
    fn test_try_close_requires_open() {
        let mut book = PositionBook::new();
        assert_eq!(book.try_close().unwrap_err(), DomainError::NoOpenPosition);

        let (tp, sl) = fractions();
        book.try_open(market(), tp, sl).unwrap();
        assert_eq!(book.try_close().unwrap_err(), DomainError::NoOpenPosition);
    }

    #[test]
    fn test_commit_close_requires_closing() {
        let mut book = open_book();
        assert!(book.commit_close().is_err());
        // Failed commit must not disturb the held position.
        assert_eq!(book.status(), BookStatus::Open);
    }

    #[test]
    fn test_commit_open_requires_opening() {
        let mut book = PositionBook::new();
        let result = book.commit_open(
            Price::new(dec!(10000)).unwrap(),
            Quantity::new(dec!(1)).unwrap(),
            "o".to_string(),
        );
        assert!(result.is_err());
        assert_eq!(book.status(), BookStatus::None);
    }

    #[test]
    fn test_seed_open_installs_position() {
        let mut book = PositionBook::new();
        let (tp, sl) = fractions();

        let position = book
            .seed_open(
                market(),
                Price::new(dec!(52000000)).unwrap(),
                Quantity::new(dec!(0.005)).unwrap(),
                tp,
                sl,
            )
            .unwrap();

        assert_eq!(book.status(), BookStatus::Open);
        assert_eq!(position.order_id, "RECOVERED");
        assert!(position.sl_price < position.entry_price);
        assert!(position.entry_price < position.tp_price);
    }

    #[test]
    fn test_seed_open_rejected_when_busy() {
        let mut book = open_book();
        let (tp, sl) = fractions();

        let result = book.seed_open(
            market(),
            Price::new(dec!(1000)).unwrap(),
            Quantity::new(dec!(1)).unwrap(),
            tp,
            sl,
        );
        assert_eq!(result.unwrap_err(), DomainError::PositionAlreadyOpen);
    }
}
