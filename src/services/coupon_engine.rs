//! Coupon Engine
//!
//! Validation runs the checks in a fixed order so the caller always learns
//! the first specific reason a code cannot be applied. Usage is committed
//! only on a confirmed order, through the store's conditional increment.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::domain::aggregates::Coupon;
use crate::domain::value_objects::Money;
use crate::error::{EngineError, Result};
use crate::store::{CouponStore, StoreError};

#[derive(Clone, Debug, Serialize)]
pub struct CouponQuote {
    pub code: String,
    pub discount_amount: Money,
    pub new_total: Money,
}

pub struct CouponEngine {
    store: Arc<dyn CouponStore>,
}

impl CouponEngine {
    pub fn new(store: Arc<dyn CouponStore>) -> Self { Self { store } }

    /// Check order: unknown/inactive, expired, exhausted, minimum not met.
    /// First failure wins and keeps its own error.
    pub async fn validate(&self, code: &str, cart_total: &Money) -> Result<CouponQuote> {
        let coupon = self.screened(code).await?;
        if coupon.is_exhausted() {
            return Err(EngineError::CouponExhausted);
        }
        if cart_total.amount() < coupon.min_purchase_amount {
            return Err(EngineError::CouponMinimumNotMet { minimum: coupon.min_purchase_amount });
        }

        let discount_amount = coupon.discount_for(cart_total);
        let new_total = cart_total.sub_floor(&discount_amount)?;
        debug!(code = %coupon.code, discount = %discount_amount, "coupon validated");
        Ok(CouponQuote { code: coupon.code, discount_amount, new_total })
    }

    /// Re-checks eligibility and increments the bounded usage counter.
    /// Racing for the last use is decided by the store: exactly one caller
    /// wins, the rest get `CouponExhausted`. Replays with the same
    /// `usage_ref` stay no-ops even once the counter is full, so the
    /// exhaustion verdict is left entirely to the store.
    pub async fn commit_usage(&self, code: &str, usage_ref: &str) -> Result<()> {
        let coupon = self.screened(code).await?;
        match self.store.commit_usage(&coupon.code, usage_ref).await {
            Ok(()) => Ok(()),
            Err(StoreError::CouponExhausted) => Err(EngineError::CouponExhausted),
            Err(StoreError::CouponNotFound) => Err(EngineError::CouponNotFound),
            Err(other) => Err(other.into()),
        }
    }

    /// Existence/active/expiry screen. A coupon deactivated after quoting
    /// fails hard here rather than honoring the stale quote.
    async fn screened(&self, code: &str) -> Result<Coupon> {
        let normalized = Coupon::normalize_code(code);
        let coupon = self
            .store
            .get(&normalized)
            .await?
            .filter(|c| c.is_active)
            .ok_or(EngineError::CouponNotFound)?;
        if coupon.is_expired(Utc::now()) {
            return Err(EngineError::CouponExpired);
        }
        Ok(coupon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::CouponType;
    use crate::store::InMemoryStore;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn money(d: Decimal) -> Money { Money::new(d, "USD") }

    async fn engine_with(coupon: Coupon) -> CouponEngine {
        let store = Arc::new(InMemoryStore::new());
        store.create(coupon).await.unwrap();
        CouponEngine::new(store)
    }

    fn base_coupon() -> Coupon {
        let now = Utc::now();
        Coupon {
            code: "SAVE20".into(),
            coupon_type: CouponType::Percentage,
            value: dec!(20),
            min_purchase_amount: Decimal::ZERO,
            max_discount_amount: None,
            expires_at: now + Duration::days(30),
            max_uses: 100,
            used_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn percentage_with_cap() {
        let mut c = base_coupon();
        c.max_discount_amount = Some(dec!(50));
        let engine = engine_with(c).await;
        let quote = engine.validate("save20", &money(dec!(1000))).await.unwrap();
        assert_eq!(quote.discount_amount.amount(), dec!(50));
        assert_eq!(quote.new_total.amount(), dec!(950));
    }

    #[tokio::test]
    async fn fixed_amount_clamps_to_cart() {
        let mut c = base_coupon();
        c.coupon_type = CouponType::FixedAmount;
        c.value = dec!(30);
        let engine = engine_with(c).await;
        let quote = engine.validate("SAVE20", &money(dec!(20))).await.unwrap();
        assert_eq!(quote.discount_amount.amount(), dec!(20));
        assert_eq!(quote.new_total.amount(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn unknown_code() {
        let engine = engine_with(base_coupon()).await;
        let err = engine.validate("NOPE", &money(dec!(100))).await.unwrap_err();
        assert!(matches!(err, EngineError::CouponNotFound));
    }

    #[tokio::test]
    async fn inactive_reads_as_not_found() {
        let mut c = base_coupon();
        c.is_active = false;
        let engine = engine_with(c).await;
        let err = engine.validate("SAVE20", &money(dec!(100))).await.unwrap_err();
        assert!(matches!(err, EngineError::CouponNotFound));
    }

    #[tokio::test]
    async fn expired_beats_exhausted() {
        let mut c = base_coupon();
        c.expires_at = Utc::now() - Duration::hours(1);
        c.used_count = c.max_uses;
        let engine = engine_with(c).await;
        let err = engine.validate("SAVE20", &money(dec!(100))).await.unwrap_err();
        assert!(matches!(err, EngineError::CouponExpired));
    }

    #[tokio::test]
    async fn exhausted() {
        let mut c = base_coupon();
        c.used_count = c.max_uses;
        let engine = engine_with(c).await;
        let err = engine.validate("SAVE20", &money(dec!(100))).await.unwrap_err();
        assert!(matches!(err, EngineError::CouponExhausted));
    }

    #[tokio::test]
    async fn minimum_not_met() {
        let mut c = base_coupon();
        c.min_purchase_amount = dec!(50);
        let engine = engine_with(c).await;
        let err = engine.validate("SAVE20", &money(dec!(49))).await.unwrap_err();
        match err {
            EngineError::CouponMinimumNotMet { minimum } => assert_eq!(minimum, dec!(50)),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn commit_rechecks_exhaustion() {
        let mut c = base_coupon();
        c.max_uses = 1;
        let engine = engine_with(c).await;
        engine.commit_usage("SAVE20", "pay_1").await.unwrap();
        let err = engine.commit_usage("SAVE20", "pay_2").await.unwrap_err();
        assert!(matches!(err, EngineError::CouponExhausted));
        // replay of the winner stays a no-op
        engine.commit_usage("SAVE20", "pay_1").await.unwrap();
    }
}
