//! Money type backed by rust_decimal.
//!
//! Journal amounts are stored with four decimal places and displayed with the
//! per-underlying precision, so the wrapper carries both formatting paths.

use rust_decimal::Decimal as RustDecimal;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of decimal places used when money fields are written to the journal log.
pub const LOG_DECIMALS: u32 = 4;

/// Lossless decimal for prices, fees, totals and portfolio values.
///
/// Serializes to a JSON number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Decimal)
    }

    /// Parse a journal field, treating an empty field as zero.
    ///
    /// Returns `None` when the text is present but not a number so callers can
    /// substitute zero and flag the record.
    pub fn parse_field(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Some(Decimal::zero());
        }
        Self::from_str_canonical(s).ok()
    }

    /// Canonical string without trailing zeros or exponent notation.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    /// Fixed-point string with exactly `dp` decimal places, rounding half away from zero.
    pub fn to_fixed(&self, dp: u32) -> String {
        let rounded = self
            .0
            .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
        format!("{:.*}", dp as usize, rounded)
    }

    /// The representation written to the journal log.
    pub fn to_log_string(&self) -> String {
        self.to_fixed(LOG_DECIMALS)
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    /// `numerator / denominator`, or zero when the denominator is zero.
    pub fn checked_ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
        if denominator.is_zero() {
            return Decimal::zero();
        }
        numerator / denominator
    }

    /// Magnitude of `self` carrying the sign of `sign_source`.
    pub fn with_sign_of(&self, sign_source: Decimal) -> Decimal {
        if sign_source.is_negative() {
            -self.abs()
        } else {
            self.abs()
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl std::iter::Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Decimal {
        iter.fold(Decimal::zero(), |acc, d| acc + d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_log_string_has_four_places() {
        assert_eq!(d("12").to_log_string(), "12.0000");
        assert_eq!(d("-1.5").to_log_string(), "-1.5000");
        assert_eq!(d("0.00005").to_log_string(), "0.0001");
    }

    #[test]
    fn test_fixed_display_precision() {
        assert_eq!(d("4512.256").to_fixed(2), "4512.26");
        assert_eq!(d("1.1").to_fixed(4), "1.1000");
    }

    #[test]
    fn test_parse_field_empty_is_zero() {
        assert_eq!(Decimal::parse_field(""), Some(Decimal::zero()));
        assert_eq!(Decimal::parse_field("  "), Some(Decimal::zero()));
        assert_eq!(Decimal::parse_field("2.50"), Some(d("2.5")));
        assert_eq!(Decimal::parse_field("abc"), None);
    }

    #[test]
    fn test_checked_ratio_zero_denominator() {
        assert_eq!(Decimal::checked_ratio(d("10"), Decimal::zero()), Decimal::zero());
        assert_eq!(Decimal::checked_ratio(d("10"), d("4")), d("2.5"));
    }

    #[test]
    fn test_with_sign_of() {
        assert_eq!(d("25").with_sign_of(d("-3")), d("-25"));
        assert_eq!(d("-25").with_sign_of(d("3")), d("25"));
        assert_eq!(d("-25").with_sign_of(Decimal::zero()), d("25"));
    }

    #[test]
    fn test_sum_and_json_number() {
        let total: Decimal = vec![d("-100.25"), d("40"), d("0.25")].into_iter().sum();
        assert_eq!(total, d("-60"));
        let json = serde_json::to_value(d("123.456")).unwrap();
        assert!(json.is_number());
    }
}
