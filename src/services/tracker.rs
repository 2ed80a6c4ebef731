//! Order Tracker
//!
//! Unauthenticated read path: an order id alone is not enough to read an
//! order; the caller must also present the email or phone stored on it.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::error::{EngineError, Result};
use crate::store::OrderStore;

pub struct OrderTracker {
    orders: Arc<dyn OrderStore>,
}

impl OrderTracker {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self { Self { orders } }

    pub async fn find(&self, order_id: Uuid, email: Option<&str>, phone: Option<&str>) -> Result<Order> {
        if email.is_none() && phone.is_none() {
            return Err(EngineError::UnauthorizedLookup);
        }
        let order = self.orders.find_by_id(order_id).await?.ok_or(EngineError::OrderNotFound)?;
        if !order.matches_contact(email, phone) {
            return Err(EngineError::UnauthorizedLookup);
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Address, Contact, OrderLine};
    use crate::domain::value_objects::Money;
    use crate::store::{InMemoryStore, InsertOutcome};
    use rust_decimal_macros::dec;

    async fn tracker_with_order() -> (OrderTracker, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let money = |d| Money::new(d, "USD");
        let order = Order::create(
            "ORD-00000042",
            vec![OrderLine {
                variant_key: "tee-01/M".parse().unwrap(),
                quantity: 1,
                unit_price: money(dec!(10)),
                line_total: money(dec!(10)),
            }],
            money(dec!(10)),
            money(dec!(0)),
            money(dec!(10)),
            None,
            "pay_42",
            Address::default(),
            Contact { email: "buyer@example.com".into(), phone: Some("555-0102".into()) },
        );
        let id = match store.insert(order).await.unwrap() {
            InsertOutcome::Created(o) => o.id(),
            InsertOutcome::Existing(_) => unreachable!("fresh store"),
        };
        (OrderTracker::new(store), id)
    }

    #[tokio::test]
    async fn finds_with_matching_email() {
        let (tracker, id) = tracker_with_order().await;
        let order = tracker.find(id, Some("Buyer@Example.com"), None).await.unwrap();
        assert_eq!(order.order_number(), "ORD-00000042");
    }

    #[tokio::test]
    async fn finds_with_matching_phone() {
        let (tracker, id) = tracker_with_order().await;
        tracker.find(id, None, Some("5550102")).await.unwrap();
    }

    #[tokio::test]
    async fn wrong_email_is_unauthorized_even_with_correct_id() {
        let (tracker, id) = tracker_with_order().await;
        let err = tracker.find(id, Some("other@example.com"), None).await.unwrap_err();
        assert!(matches!(err, EngineError::UnauthorizedLookup));
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected_before_lookup() {
        let (tracker, id) = tracker_with_order().await;
        let err = tracker.find(id, None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::UnauthorizedLookup));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let (tracker, _) = tracker_with_order().await;
        let err = tracker.find(Uuid::new_v4(), Some("buyer@example.com"), None).await.unwrap_err();
        assert!(matches!(err, EngineError::OrderNotFound));
    }
}
