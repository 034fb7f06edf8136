//! Value Objects for the storefront

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// SKU (Stock Keeping Unit) value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(SkuError::Empty); }
        if value.len() > 50 { return Err(SkuError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkuError {
    #[error("SKU empty")]
    Empty,
    #[error("SKU too long")]
    TooLong,
}

/// Money in the smallest unit of its currency.
///
/// Amounts are whole integers; the storefront never deals in fractional
/// minor units. Arithmetic is overflow-checked and refuses to mix currencies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: i64, currency: String }

impl Money {
    pub fn new(amount: i64, currency: &str) -> Self { Self { amount, currency: currency.trim().to_uppercase() } }
    pub fn zero(currency: &str) -> Self { Self::new(0, currency) }
    pub fn amount(&self) -> i64 { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_positive(&self) -> bool { self.amount > 0 }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        let amount = self.amount.checked_add(other.amount).ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, &self.currency))
    }

    /// Subtracts `other`, stopping at zero.
    pub fn saturating_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount.saturating_sub(other.amount).max(0), &self.currency))
    }

    pub fn multiply(&self, qty: u32) -> Result<Money, MoneyError> {
        let amount = self.amount.checked_mul(i64::from(qty)).ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, &self.currency))
    }

    /// `percent` of this amount, rounded half away from zero.
    pub fn percentage(&self, percent: Decimal) -> Result<Money, MoneyError> {
        if percent.is_sign_negative() || percent > Decimal::ONE_HUNDRED {
            return Err(MoneyError::InvalidPercentage(percent));
        }
        let share = (Decimal::from(self.amount) * percent / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let amount = share.to_i64().ok_or(MoneyError::Overflow)?;
        Ok(Money::new(amount, &self.currency))
    }

    pub fn ensure_at_least(&self, minimum: i64) -> Result<(), MoneyError> {
        if self.amount < minimum {
            return Err(MoneyError::BelowMinimum { minimum, actual: self.amount });
        }
        Ok(())
    }

    fn same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch { expected: self.currency.clone(), found: other.currency.clone() });
        }
        Ok(())
    }
}

impl Default for Money { fn default() -> Self { Self::zero("NGN") } }

/// Formats as `1,234,500 NGN`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.amount.unsigned_abs().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 { grouped.push(','); }
            grouped.push(ch);
        }
        let sign = if self.amount < 0 { "-" } else { "" };
        write!(f, "{}{} {}", sign, grouped, self.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: String, found: String },
    #[error("amount {actual} is below the minimum of {minimum}")]
    BelowMinimum { minimum: i64, actual: i64 },
    #[error("percentage {0} is outside 0..=100")]
    InvalidPercentage(Decimal),
    #[error("amount overflow")]
    Overflow,
}

/// Quantity value object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: u32) -> Self { Self(self.0.saturating_add(other)) }
    pub fn subtract(&self, other: u32) -> Option<Self> {
        if other > self.0 { None } else { Some(Self(self.0 - other)) }
    }
    pub fn is_zero(&self) -> bool { self.0 == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sku() { let sku = Sku::new(" prod-001 ").unwrap(); assert_eq!(sku.as_str(), "PROD-001"); }

    #[test]
    fn test_sku_rejects_blank() { assert_eq!(Sku::new("   "), Err(SkuError::Empty)); }

    #[test]
    fn test_money_add() {
        let a = Money::new(100, "NGN");
        let b = Money::new(50, "ngn");
        assert_eq!(a.add(&b).unwrap().amount(), 150);
    }

    #[test]
    fn test_money_currency_mismatch() {
        let err = Money::new(100, "NGN").add(&Money::new(1, "USD")).unwrap_err();
        assert!(matches!(err, MoneyError::CurrencyMismatch { .. }));
    }

    #[test]
    fn test_minimum_threshold() {
        assert_eq!(
            Money::new(500, "NGN").ensure_at_least(1000),
            Err(MoneyError::BelowMinimum { minimum: 1000, actual: 500 })
        );
        assert!(Money::new(1000, "NGN").ensure_at_least(1000).is_ok());
    }

    #[test]
    fn test_percentage_rounds_half_away() {
        let m = Money::new(1005, "NGN");
        assert_eq!(m.percentage(Decimal::new(10, 0)).unwrap().amount(), 101);
        assert!(m.percentage(Decimal::new(101, 0)).is_err());
    }

    #[test]
    fn test_display_groups_thousands() {
        assert_eq!(Money::new(1_234_500, "ngn").to_string(), "1,234,500 NGN");
        assert_eq!(Money::new(999, "NGN").to_string(), "999 NGN");
    }

    #[test]
    fn test_multiply_overflow() {
        assert_eq!(Money::new(i64::MAX, "NGN").multiply(2), Err(MoneyError::Overflow));
    }
}
