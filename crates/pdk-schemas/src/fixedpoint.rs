//! Fixed-point money type.
//!
//! All monetary amounts in this system use a 1e-6 (micros) fixed-point
//! representation stored as `i64`.  Raw `i64` money is error-prone: it allows
//! accidental arithmetic with unrelated integers (share quantities, sequence
//! numbers) without any compile-time signal.  `Micros` wraps the raw value so
//! the type system keeps money and non-money apart.
//!
//! # Scale
//!
//! 1 USD = 1_000_000 micros.  Cash balances, prices, cost bases and market
//! values all use this scale.  Share quantities remain plain `i64` and are
//! never implicitly convertible.
//!
//! # Arithmetic
//!
//! - `saturating_add` / `saturating_sub` clamp at the `i64` range.
//! - [`Micros::checked_mul_qty`] multiplies a per-unit price by a share count
//!   with overflow detection.  Overflow in a trade-value calculation is a
//!   rejection, not a clamp, so callers must handle `None` explicitly.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// A fixed-point monetary amount at 1e-6 scale.  1 USD = `Micros(1_000_000)`.
///
/// There is intentionally no `From<i64>` impl; use [`Micros::new`] so every
/// raw-integer-to-money conversion is deliberate.  Serialized as the raw
/// micros integer.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Micros(i64);

/// Micros per whole dollar.
pub const MICROS_SCALE: i64 = 1_000_000;

impl Micros {
    pub const ZERO: Micros = Micros(0);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    /// Whole-dollar constructor, mainly for tests and seed balances.
    #[inline]
    pub const fn from_dollars(dollars: i64) -> Self {
        Micros(dollars * MICROS_SCALE)
    }

    /// Convert a JSON-boundary dollar amount to micros, rounding half away
    /// from zero.  Returns `None` for non-finite input or overflow.
    pub fn from_dollars_f64(dollars: f64) -> Option<Self> {
        if !dollars.is_finite() {
            return None;
        }
        let micros = (dollars * MICROS_SCALE as f64).round();
        if micros >= i64::MAX as f64 || micros <= i64::MIN as f64 {
            return None;
        }
        Some(Micros(micros as i64))
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Lossy dollars view for logs and human-facing output.
    #[inline]
    pub fn to_dollars_f64(self) -> f64 {
        self.0 as f64 / MICROS_SCALE as f64
    }

    #[inline]
    pub fn saturating_add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Per-unit price × share quantity, `None` on `i64` overflow.
    pub fn checked_mul_qty(self, qty: i64) -> Option<Micros> {
        self.0.checked_mul(qty).map(Micros)
    }
}

impl Add for Micros {
    type Output = Micros;
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Micros;
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0 - rhs.0)
    }
}

impl Neg for Micros {
    type Output = Micros;
    fn neg(self) -> Micros {
        Micros(-self.0)
    }
}

impl AddAssign for Micros {
    fn add_assign(&mut self, rhs: Micros) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Micros {
    fn sub_assign(&mut self, rhs: Micros) {
        self.0 -= rhs.0;
    }
}

impl std::fmt::Display for Micros {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / MICROS_SCALE as u64;
        let frac = abs % MICROS_SCALE as u64;
        write!(f, "{sign}{whole}.{frac:06}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollars_round_trip() {
        assert_eq!(Micros::from_dollars(140).raw(), 140_000_000);
        assert_eq!(Micros::from_dollars(140).to_dollars_f64(), 140.0);
    }

    #[test]
    fn from_dollars_f64_rounds() {
        assert_eq!(Micros::from_dollars_f64(0.1234567), Some(Micros::new(123_457)));
        assert_eq!(Micros::from_dollars_f64(f64::NAN), None);
        assert_eq!(Micros::from_dollars_f64(f64::INFINITY), None);
        assert_eq!(Micros::from_dollars_f64(1e300), None);
    }

    #[test]
    fn checked_mul_qty_detects_overflow() {
        assert_eq!(
            Micros::from_dollars(100).checked_mul_qty(3),
            Some(Micros::from_dollars(300))
        );
        assert_eq!(Micros::new(i64::MAX).checked_mul_qty(2), None);
    }

    #[test]
    fn display_formats_fraction() {
        assert_eq!(Micros::new(1_500_000).to_string(), "1.500000");
        assert_eq!(Micros::new(-250_000).to_string(), "-0.250000");
    }

    #[test]
    fn serde_is_transparent() {
        let v: Micros = serde_json::from_str("140000000").unwrap();
        assert_eq!(v, Micros::from_dollars(140));
        assert_eq!(serde_json::to_string(&v).unwrap(), "140000000");
    }
}
