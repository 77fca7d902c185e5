//! Position manager: the mutual-exclusion boundary over the book.
//!
//! Webhook handlers and the price watcher both mutate position state;
//! every transition goes through the mutex here so they are
//! linearized. The state machine itself lives in wonbot-domain.

use tokio::sync::Mutex;

use wonbot_domain::{
    BookStatus, DomainError, Fraction, Market, PendingOpen, Position, PositionBook, Price, Quantity,
};

/// Serializes access to the single-position book.
pub struct PositionManager {
    book: Mutex<PositionBook>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self { book: Mutex::new(PositionBook::new()) }
    }

    /// Reserve the book for a new entry (NONE → OPENING).
    pub async fn try_open(
        &self,
        market: Market,
        tp: Fraction,
        sl: Fraction,
    ) -> Result<PendingOpen, DomainError> {
        self.book.lock().await.try_open(market, tp, sl)
    }

    /// Record a confirmed entry fill (OPENING → OPEN).
    pub async fn commit_open(
        &self,
        entry_price: Price,
        quantity: Quantity,
        order_id: String,
    ) -> Result<Position, DomainError> {
        self.book.lock().await.commit_open(entry_price, quantity, order_id)
    }

    /// Entry execution failed (OPENING → NONE).
    pub async fn abort_open(&self) -> Result<(), DomainError> {
        self.book.lock().await.abort_open()
    }

    /// Begin closing (OPEN → CLOSING); returns the position snapshot.
    pub async fn try_close(&self) -> Result<Position, DomainError> {
        self.book.lock().await.try_close()
    }

    /// Exit fill confirmed (CLOSING → NONE); returns the cleared position.
    pub async fn commit_close(&self) -> Result<Position, DomainError> {
        self.book.lock().await.commit_close()
    }

    /// Exit execution failed (CLOSING → OPEN); the position stays live.
    pub async fn abort_close(&self) -> Result<(), DomainError> {
        self.book.lock().await.abort_close()
    }

    /// Install a recovered holding as OPEN (startup recovery only).
    pub async fn seed_recovered(
        &self,
        market: Market,
        entry_price: Price,
        quantity: Quantity,
        tp: Fraction,
        sl: Fraction,
    ) -> Result<Position, DomainError> {
        self.book.lock().await.seed_open(market, entry_price, quantity, tp, sl)
    }

    /// Current lifecycle status.
    pub async fn status(&self) -> BookStatus {
        self.book.lock().await.status()
    }

    /// Snapshot of the held position, if any.
    pub async fn snapshot(&self) -> Option<Position> {
        self.book.lock().await.position().cloned()
    }

    /// True while a position is held or an entry/exit is in flight.
    pub async fn is_busy(&self) -> bool {
        self.book.lock().await.is_busy()
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
