//! Value Objects for the Wonbot Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain errors for value object validation and state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Price must be positive
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Quantity must be positive
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Market must be a valid Upbit pair (e.g., KRW-BTC)
    #[error("Invalid market: {0}")]
    InvalidMarket(String),

    /// TP/SL fraction validation error
    #[error("Invalid fraction: {0}")]
    InvalidFraction(String),

    /// A position is already open (or opening/closing)
    #[error("Position already open")]
    PositionAlreadyOpen,

    /// No open position to operate on
    #[error("No open position")]
    NoOpenPosition,

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

// =============================================================================
// Price
// =============================================================================

/// Price represents a positive decimal price in quote currency (KRW).
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    /// Create a new Price with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice("Price must be positive".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Quantity represents a positive decimal volume of the base asset.
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Create a new Quantity with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuantity` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidQuantity("Quantity must be positive".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Market
// =============================================================================

/// Market represents an Upbit trading pair, quote currency first
/// (e.g., `KRW-BTC` = buy BTC with KRW).
///
/// # Invariants
/// - Format is `QUOTE-BASE` with both parts non-empty
/// - Quote must be KRW (the only quote this system trades)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Market {
    quote: String,
    base: String,
}

impl Market {
    /// Parse a Market from an Upbit pair string.
    ///
    /// # Examples
    /// ```
    /// # use wonbot_domain::Market;
    /// let market = Market::from_code("KRW-BTC").unwrap();
    /// assert_eq!(market.quote(), "KRW");
    /// assert_eq!(market.base(), "BTC");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidMarket` if format is invalid
    pub fn from_code(code: &str) -> Result<Self, DomainError> {
        let code = code.trim().to_uppercase();
        let (quote, base) = code
            .split_once('-')
            .ok_or_else(|| DomainError::InvalidMarket(format!("Expected QUOTE-BASE, got: {code}")))?;

        if quote != "KRW" {
            return Err(DomainError::InvalidMarket(format!("Quote must be KRW, got: {quote}")));
        }
        if base.is_empty() {
            return Err(DomainError::InvalidMarket("Base currency must be non-empty".to_string()));
        }

        Ok(Self {
            quote: quote.to_string(),
            base: base.to_string(),
        })
    }

    /// Get the quote currency (always "KRW")
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Get the base currency (e.g., "BTC")
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Get the market code as Upbit expects it (e.g., "KRW-BTC")
    pub fn as_code(&self) -> String {
        format!("{}-{}", self.quote, self.base)
    }
}

impl TryFrom<String> for Market {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_code(&value)
    }
}

impl From<Market> for String {
    fn from(market: Market) -> Self {
        market.as_code()
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

// =============================================================================
// Fraction
// =============================================================================

/// Fraction represents a take-profit or stop-loss offset from entry
/// (e.g., 0.015 = 1.5%).
///
/// # Invariants
/// - Must be > 0 and < 1 (a stop-loss fraction >= 1 would put the
///   stop at or below zero)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fraction(Decimal);

impl Fraction {
    /// Create a new Fraction with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidFraction` if value <= 0 or >= 1
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidFraction("Fraction must be positive".to_string()));
        }
        if value >= Decimal::ONE {
            return Err(DomainError::InvalidFraction("Fraction must be below 1".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// OrderSide
// =============================================================================

/// OrderSide represents the order direction in Upbit terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy order (spend KRW)
    Bid,
    /// Sell order (sell base asset)
    Ask,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Bid => write!(f, "bid"),
            OrderSide::Ask => write!(f, "ask"),
        }
    }
}

// =============================================================================
// ExitReason
// =============================================================================

/// Why an open position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Price reached the take-profit threshold
    TakeProfit,
    /// Price reached the stop-loss threshold
    StopLoss,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TP"),
            ExitReason::StopLoss => write!(f, "SL"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
