//! Cents - Non-negative minor-unit amount
//!
//! All balances and liabilities are integer minor units (cents).
//! Non-negativity is enforced at the type level; signed deltas on the
//! ledger are plain `i64` and only become a `Cents` once proven >= 0.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when working with minor-unit amounts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitsError {
    #[error("Amount cannot be negative: {0}")]
    Negative(i64),

    #[error("Amount overflow")]
    Overflow,
}

/// A non-negative amount in minor units (cents).
///
/// # Invariant
/// The inner value is always >= 0. This is enforced by the constructor.
///
/// # Example
/// ```
/// use taxrail_core::Cents;
///
/// let amount = Cents::new(150_000).unwrap();
/// assert_eq!(amount.value(), 150_000);
///
/// assert!(Cents::new(-1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Cents(i64);

impl Cents {
    /// Zero amount constant
    pub const ZERO: Self = Self(0);

    /// Create a new amount, rejecting negative values.
    pub fn new(value: i64) -> Result<Self, UnitsError> {
        if value < 0 {
            Err(UnitsError::Negative(value))
        } else {
            Ok(Self(value))
        }
    }

    /// Get the inner value
    #[inline]
    pub const fn value(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition; None on overflow.
    pub fn checked_add(&self, other: Cents) -> Option<Cents> {
        self.0.checked_add(other.0).map(Cents)
    }

    /// Checked subtraction; None if the result would be negative.
    pub fn checked_sub(&self, other: Cents) -> Option<Cents> {
        let result = self.0.checked_sub(other.0)?;
        if result < 0 {
            None
        } else {
            Some(Cents(result))
        }
    }

    /// Apply a signed delta; None if the result would be negative or overflow.
    pub fn checked_apply(&self, delta: i64) -> Option<Cents> {
        let result = self.0.checked_add(delta)?;
        if result < 0 {
            None
        } else {
            Some(Cents(result))
        }
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Cents {
    type Error = UnitsError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Cents> for i64 {
    fn from(amount: Cents) -> Self {
        amount.0
    }
}

impl Default for Cents {
    fn default() -> Self {
        Self::ZERO
    }
}
