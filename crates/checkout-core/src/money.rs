//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  The payment provider reports gross_amount as a decimal string:        │
//! │    "150000.00"                                                          │
//! │                                                                         │
//! │  Parsed as f64 and compared with the order total, rounding noise       │
//! │  can turn a correct payment into a "mismatch" (or the reverse).        │
//! │                                                                         │
//! │  OUR SOLUTION: Integer minor units, parsed digit by digit              │
//! │    "150000.00" → 15_000_000 minor units, compared exactly              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use checkout_core::money::Money;
//!
//! let price = Money::from_cents(1099);
//! let line_total = price.multiply_quantity(3);
//! assert_eq!(line_total.cents(), 3297);
//!
//! let gross = Money::parse_decimal("32.97").unwrap();
//! assert_eq!(gross, line_total);
//! assert_eq!(gross.to_decimal_string(), "32.97");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use crate::error::ValidationError;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit.
///
/// ## Design Decisions
/// - **i64 (signed)**: arithmetic never has to special-case refunds
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Derives**: Full serde support for JSON serialization
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                                                                         │
/// │  Product.price ──► OrderItem.unit_price ──► OrderItem.total_price      │
/// │                                                  │                      │
/// │                                  Order.subtotal ◄┘                      │
/// │                                       │                                 │
/// │               Cart.delivery_fee ──► Order.total ──► ChargeRequest      │
/// │                                       │                                 │
/// │           notification.gross_amount ══╧══ compared exactly             │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use checkout_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use checkout_core::money::Money;
    ///
    /// let unit_price = Money::from_cents(299);
    /// assert_eq!(unit_price.multiply_quantity(3).cents(), 897);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Parses a provider decimal string such as `"150000.00"`.
    ///
    /// ## Rules
    /// - Digits, optionally followed by `.` and one or two digits
    /// - No sign, no exponent, no thousands separators
    /// - `"10"`, `"10.5"` and `"10.50"` are all accepted
    ///
    /// ## Example
    /// ```rust
    /// use checkout_core::money::Money;
    ///
    /// assert_eq!(Money::parse_decimal("10000.00").unwrap().cents(), 1_000_000);
    /// assert_eq!(Money::parse_decimal("10.5").unwrap().cents(), 1050);
    /// assert!(Money::parse_decimal("-1.00").is_err());
    /// assert!(Money::parse_decimal("1.005").is_err());
    /// ```
    pub fn parse_decimal(input: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidFormat {
            field: "gross_amount".to_string(),
            reason: reason.to_string(),
        };

        let input = input.trim();
        let (major, minor) = match input.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (input, ""),
        };

        if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected an unsigned decimal number"));
        }
        if input.contains('.') && minor.is_empty() {
            return Err(invalid("missing fractional digits"));
        }
        if minor.len() > 2 || !minor.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("at most two fractional digits allowed"));
        }

        let major: i64 = major
            .parse()
            .map_err(|_| invalid("amount is too large"))?;
        let minor: i64 = match minor.len() {
            0 => 0,
            1 => minor.parse::<i64>().map_err(|_| invalid("bad fraction"))? * 10,
            _ => minor.parse().map_err(|_| invalid("bad fraction"))?,
        };

        major
            .checked_mul(100)
            .and_then(|v| v.checked_add(minor))
            .map(Money)
            .ok_or_else(|| invalid("amount is too large"))
    }

    /// Formats as the provider's decimal string (always two fractional digits).
    ///
    /// ## Example
    /// ```rust
    /// use checkout_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(15_000_000).to_decimal_string(), "150000.00");
    /// assert_eq!(Money::from_cents(5).to_decimal_string(), "0.05");
    /// ```
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
