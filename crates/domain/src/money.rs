//! Fixed-point USD amounts.
//!
//! Every dollar figure in the system is a [`Money`] — a thin wrapper over
//! `rust_decimal::Decimal` normalised to six fractional digits. Floats are
//! accepted only at the configuration edge and converted immediately.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub};

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

/// Fractional digits retained on every amount.
const SCALE: u32 = 6;

/// A USD amount with fixed-point semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(d: Decimal) -> Self {
        Money(d.round_dp(SCALE))
    }

    /// Build from integer micro-dollars (1e-6 USD).
    pub fn from_micros(micros: i64) -> Self {
        Money(Decimal::new(micros, SCALE))
    }

    /// Parse a decimal string ("0.0015"). Used by config and pricing tables.
    pub fn parse(s: &str) -> Option<Self> {
        Decimal::from_str(s).ok().map(Money::new)
    }

    /// Lossy conversion from a config float. Amounts in config files are
    /// human-entered with few digits, so the round-trip is exact in practice.
    pub fn from_f64_lossy(v: f64) -> Self {
        Decimal::from_f64(v).map(Money::new).unwrap_or(Money::ZERO)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Approximate float value for display-only contexts (API payloads).
    pub fn to_f64_lossy(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Cost for `tokens` at a per-1k-token rate.
    pub fn per_1k(rate: Money, tokens: u64) -> Money {
        let t = Decimal::from(tokens);
        Money::new(t / Decimal::from(1000u32) * rate.0)
    }

    /// Fraction of `self` over `limit` in [0, +inf). Zero limit yields 0.
    pub fn utilization(&self, limit: Money) -> f64 {
        if limit.is_zero() {
            return 0.0;
        }
        (self.0 / limit.0).to_f64().unwrap_or(0.0)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money::new(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money::new(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Money;
    fn mul(self, rhs: Decimal) -> Money {
        Money::new(self.0 * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}
