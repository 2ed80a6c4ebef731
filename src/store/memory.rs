//! In-memory store
//!
//! Arena per resource: each variant's ledger lives in one dashmap slot, so a
//! movement append holds exactly that variant's shard guard and concurrent
//! commits to the same variant serialize without any global lock. Used by
//! tests and by deployments without a configured database.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, Order, StockMovement, StockVariant, VariantConfig};
use crate::domain::value_objects::VariantKey;

use super::{
    CouponStore, InsertOutcome, MovementOutcome, MovementRequest, OrderStore, StockStore, StoreError,
};

#[derive(Debug)]
struct VariantLedger {
    variant: StockVariant,
    movements: Vec<StockMovement>,
}

#[derive(Debug)]
struct CouponState {
    coupon: Coupon,
    usage_refs: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    variants: DashMap<VariantKey, VariantLedger>,
    movement_index: DashMap<String, StockMovement>,
    coupons: DashMap<String, CouponState>,
    orders: DashMap<Uuid, Order>,
    payment_index: DashMap<String, Uuid>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl StockStore for InMemoryStore {
    async fn upsert_variant(&self, config: VariantConfig) -> Result<StockVariant, StoreError> {
        let mut entry = self.variants.entry(config.key.clone()).or_insert_with(|| VariantLedger {
            variant: StockVariant::new(config.key.clone()),
            movements: vec![],
        });
        let variant = &mut entry.variant;
        if let Some(threshold) = config.low_stock_threshold {
            variant.low_stock_threshold = threshold;
        }
        variant.auto_restock_enabled = config.auto_restock_enabled;
        variant.auto_restock_level = config.auto_restock_level;
        variant.updated_at = Utc::now();
        Ok(variant.clone())
    }

    async fn variant(&self, key: &VariantKey) -> Result<Option<StockVariant>, StoreError> {
        Ok(self.variants.get(key).map(|l| l.variant.clone()))
    }

    async fn variants(&self) -> Result<Vec<StockVariant>, StoreError> {
        let mut all: Vec<StockVariant> = self.variants.iter().map(|l| l.variant.clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    async fn apply_movement(&self, request: MovementRequest) -> Result<MovementOutcome, StoreError> {
        if let Some(existing) = self.movement_index.get(&request.idempotency_key) {
            return Ok(MovementOutcome::Replayed(existing.clone()));
        }

        let mut ledger = self.variants.get_mut(&request.key).ok_or(StoreError::VariantNotFound)?;

        let available = ledger.variant.current_stock;
        let new_stock = available + request.quantity;
        if new_stock < 0 {
            return Err(StoreError::InsufficientStock { available });
        }

        let movement = StockMovement {
            id: Uuid::now_v7(),
            variant_key: request.key.clone(),
            sequence: ledger.movements.len() as i64,
            movement_type: request.movement_type,
            quantity: request.quantity,
            previous_stock: available,
            new_stock,
            reason: request.reason,
            actor: request.actor,
            idempotency_key: request.idempotency_key.clone(),
            created_at: Utc::now(),
        };

        // Re-check under the variant guard: a concurrent retry with the same
        // key may have won between the fast-path lookup and the lock.
        match self.movement_index.entry(request.idempotency_key) {
            Entry::Occupied(e) => return Ok(MovementOutcome::Replayed(e.get().clone())),
            Entry::Vacant(v) => { v.insert(movement.clone()); }
        }

        ledger.movements.push(movement.clone());
        ledger.variant.current_stock = new_stock;
        ledger.variant.updated_at = movement.created_at;
        Ok(MovementOutcome::Applied(movement))
    }

    async fn movements(&self, key: &VariantKey) -> Result<Vec<StockMovement>, StoreError> {
        let ledger = self.variants.get(key).ok_or(StoreError::VariantNotFound)?;
        Ok(ledger.movements.clone())
    }
}

#[async_trait]
impl CouponStore for InMemoryStore {
    async fn create(&self, coupon: Coupon) -> Result<Coupon, StoreError> {
        match self.coupons.entry(coupon.code.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateCode),
            Entry::Vacant(v) => {
                v.insert(CouponState { coupon: coupon.clone(), usage_refs: HashSet::new() });
                Ok(coupon)
            }
        }
    }

    async fn update(&self, coupon: Coupon) -> Result<Coupon, StoreError> {
        let mut state = self.coupons.get_mut(&coupon.code).ok_or(StoreError::CouponNotFound)?;
        let used_count = state.coupon.used_count;
        let created_at = state.coupon.created_at;
        state.coupon = Coupon { used_count, created_at, updated_at: Utc::now(), ..coupon };
        Ok(state.coupon.clone())
    }

    async fn get(&self, code: &str) -> Result<Option<Coupon>, StoreError> {
        Ok(self.coupons.get(code).map(|s| s.coupon.clone()))
    }

    async fn list(&self) -> Result<Vec<Coupon>, StoreError> {
        let mut all: Vec<Coupon> = self.coupons.iter().map(|s| s.coupon.clone()).collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(all)
    }

    async fn deactivate(&self, code: &str) -> Result<(), StoreError> {
        let mut state = self.coupons.get_mut(code).ok_or(StoreError::CouponNotFound)?;
        state.coupon.is_active = false;
        state.coupon.updated_at = Utc::now();
        Ok(())
    }

    async fn commit_usage(&self, code: &str, usage_ref: &str) -> Result<(), StoreError> {
        let mut state = self.coupons.get_mut(code).ok_or(StoreError::CouponNotFound)?;
        if !state.coupon.is_active {
            return Err(StoreError::CouponNotFound);
        }
        if state.usage_refs.contains(usage_ref) {
            return Ok(());
        }
        if state.coupon.is_exhausted() {
            return Err(StoreError::CouponExhausted);
        }
        state.coupon.used_count += 1;
        state.coupon.updated_at = Utc::now();
        state.usage_refs.insert(usage_ref.to_string());
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert(&self, order: Order) -> Result<InsertOutcome, StoreError> {
        match self.payment_index.entry(order.payment_reference().to_string()) {
            Entry::Occupied(e) => {
                let existing = self
                    .orders
                    .get(e.get())
                    .map(|o| o.clone())
                    .ok_or_else(|| StoreError::Backend("payment index points at missing order".into()))?;
                Ok(InsertOutcome::Existing(existing))
            }
            Entry::Vacant(v) => {
                self.orders.insert(order.id(), order.clone());
                v.insert(order.id());
                Ok(InsertOutcome::Created(order))
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        let Some(id) = self.payment_index.get(reference).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let mut slot = self.orders.get_mut(&order.id()).ok_or(StoreError::OrderNotFound)?;
        *slot = order.clone();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Order>, StoreError> {
        let mut all: Vec<Order> = self.orders.iter().map(|o| o.clone()).collect();
        all.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Actor, MovementType};
    use std::sync::Arc;

    fn key() -> VariantKey { "tee-01/M".parse().unwrap() }

    async fn seeded(initial: i64) -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .upsert_variant(VariantConfig {
                key: key(),
                low_stock_threshold: None,
                auto_restock_enabled: false,
                auto_restock_level: None,
            })
            .await
            .unwrap();
        if initial > 0 {
            store
                .apply_movement(MovementRequest {
                    key: key(),
                    quantity: initial,
                    movement_type: MovementType::Inbound,
                    reason: Some("seed".into()),
                    actor: Actor::System,
                    idempotency_key: "seed".into(),
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn apply_movement_rejects_negative_stock() {
        let store = seeded(3).await;
        let err = store
            .apply_movement(MovementRequest {
                key: key(),
                quantity: -5,
                movement_type: MovementType::Sale,
                reason: None,
                actor: Actor::System,
                idempotency_key: "sale-1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { available: 3 }));
    }

    #[tokio::test]
    async fn apply_movement_is_idempotent() {
        let store = seeded(10).await;
        let request = MovementRequest {
            key: key(),
            quantity: -2,
            movement_type: MovementType::Sale,
            reason: None,
            actor: Actor::System,
            idempotency_key: "sale-1".into(),
        };
        let first = store.apply_movement(request.clone()).await.unwrap();
        let second = store.apply_movement(request).await.unwrap();
        assert!(!first.is_replay());
        assert!(second.is_replay());
        assert_eq!(first.movement().id, second.movement().id);
        assert_eq!(store.variant(&key()).await.unwrap().unwrap().current_stock, 8);
        assert_eq!(store.movements(&key()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_sales_never_oversell() {
        let store = Arc::new(seeded(5).await);
        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply_movement(MovementRequest {
                        key: key(),
                        quantity: -1,
                        movement_type: MovementType::Sale,
                        reason: None,
                        actor: Actor::System,
                        idempotency_key: format!("sale-{i}"),
                    })
                    .await
            }));
        }
        let mut ok = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::InsufficientStock { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 5);
        assert_eq!(insufficient, 5);
        assert_eq!(store.variant(&key()).await.unwrap().unwrap().current_stock, 0);
    }

    #[tokio::test]
    async fn movement_chain_is_contiguous() {
        let store = seeded(10).await;
        for i in 0..4 {
            store
                .apply_movement(MovementRequest {
                    key: key(),
                    quantity: -2,
                    movement_type: MovementType::Sale,
                    reason: None,
                    actor: Actor::System,
                    idempotency_key: format!("sale-{i}"),
                })
                .await
                .unwrap();
        }
        let movements = store.movements(&key()).await.unwrap();
        for pair in movements.windows(2) {
            assert!(pair[1].extends(&pair[0]));
        }
        assert!(movements.iter().all(|m| m.is_internally_consistent()));
    }

    #[tokio::test]
    async fn concurrent_last_use_commits_exactly_once() {
        use chrono::Duration;
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store
            .create(Coupon {
                code: "LAST".into(),
                coupon_type: crate::domain::aggregates::CouponType::FixedAmount,
                value: rust_decimal::Decimal::ONE,
                min_purchase_amount: rust_decimal::Decimal::ZERO,
                max_discount_amount: None,
                expires_at: now + Duration::days(1),
                max_uses: 1,
                used_count: 0,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.commit_usage("LAST", "ref-a").await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.commit_usage("LAST", "ref-b").await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(StoreError::CouponExhausted))));
        assert_eq!(store.get("LAST").await.unwrap().unwrap().used_count, 1);
    }

    #[tokio::test]
    async fn usage_replay_is_a_noop() {
        use chrono::Duration;
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .create(Coupon {
                code: "SAVE".into(),
                coupon_type: crate::domain::aggregates::CouponType::Percentage,
                value: rust_decimal::Decimal::TEN,
                min_purchase_amount: rust_decimal::Decimal::ZERO,
                max_discount_amount: None,
                expires_at: now + Duration::days(1),
                max_uses: 5,
                used_count: 0,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        store.commit_usage("SAVE", "pay_1").await.unwrap();
        store.commit_usage("SAVE", "pay_1").await.unwrap();
        assert_eq!(store.get("SAVE").await.unwrap().unwrap().used_count, 1);
    }
}
