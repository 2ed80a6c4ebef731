//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponType { Percentage, FixedAmount }

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::FixedAmount => "fixed_amount",
        }
    }
}

impl std::str::FromStr for CouponType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(Self::Percentage),
            "fixed_amount" => Ok(Self::FixedAmount),
            other => Err(format!("unknown coupon type: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub min_purchase_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
    pub used_count: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// Codes are matched case-insensitively; the normalized form is canonical.
    pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }
    pub fn is_exhausted(&self) -> bool { self.used_count >= self.max_uses }
    pub fn remaining_uses(&self) -> u32 { self.max_uses.saturating_sub(self.used_count) }

    /// Discount for a cart total. Pure arithmetic; eligibility checks live in
    /// the coupon engine so each failure keeps its own error.
    pub fn discount_for(&self, cart_total: &Money) -> Money {
        let discount = match self.coupon_type {
            CouponType::Percentage => {
                let raw = cart_total.amount() * self.value / Decimal::from(100);
                match self.max_discount_amount {
                    Some(cap) => raw.min(cap),
                    None => raw,
                }
            }
            // A fixed discount never exceeds what is being paid.
            CouponType::FixedAmount => self.value.min(cart_total.amount()),
        };
        Money::new(discount.max(Decimal::ZERO), cart_total.currency())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon(coupon_type: CouponType, value: Decimal) -> Coupon {
        let now = Utc::now();
        Coupon {
            code: "SAVE".into(),
            coupon_type,
            value,
            min_purchase_amount: Decimal::ZERO,
            max_discount_amount: None,
            expires_at: now + Duration::days(7),
            max_uses: 10,
            used_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_percentage_discount_capped() {
        let mut c = coupon(CouponType::Percentage, dec!(20));
        c.max_discount_amount = Some(dec!(50));
        let discount = c.discount_for(&Money::new(dec!(1000), "USD"));
        assert_eq!(discount.amount(), dec!(50));
    }

    #[test]
    fn test_percentage_discount_uncapped() {
        let c = coupon(CouponType::Percentage, dec!(20));
        let discount = c.discount_for(&Money::new(dec!(1000), "USD"));
        assert_eq!(discount.amount(), dec!(200));
    }

    #[test]
    fn test_fixed_discount_clamped_to_cart() {
        let c = coupon(CouponType::FixedAmount, dec!(30));
        let discount = c.discount_for(&Money::new(dec!(20), "USD"));
        assert_eq!(discount.amount(), dec!(20));
    }

    #[test]
    fn test_exhaustion() {
        let mut c = coupon(CouponType::FixedAmount, dec!(5));
        c.max_uses = 1;
        assert!(!c.is_exhausted());
        c.used_count = 1;
        assert!(c.is_exhausted());
        assert_eq!(c.remaining_uses(), 0);
    }

    #[test]
    fn test_code_normalization() {
        assert_eq!(Coupon::normalize_code("  save10 "), "SAVE10");
    }
}
