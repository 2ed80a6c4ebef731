//! Domain events
//!
//! Serializable so they can be published as JSON over NATS.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::stock::MovementType;
use crate::domain::value_objects::VariantKey;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Stock(StockEvent),
    Coupon(CouponEvent),
    Order(OrderEvent),
    Checkout(CheckoutEvent),
}

impl DomainEvent {
    /// NATS subject for this event.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Stock(StockEvent::MovementApplied { .. }) => "commerce.stock.movement",
            Self::Stock(StockEvent::LowStock { .. }) => "commerce.stock.low",
            Self::Stock(StockEvent::OutOfStock { .. }) => "commerce.stock.out",
            Self::Coupon(_) => "commerce.coupons.redeemed",
            Self::Order(OrderEvent::Paid { .. }) => "commerce.orders.paid",
            Self::Order(OrderEvent::Shipped { .. }) => "commerce.orders.shipped",
            Self::Order(OrderEvent::Delivered { .. }) => "commerce.orders.delivered",
            Self::Order(OrderEvent::Refunded { .. }) => "commerce.orders.refunded",
            Self::Checkout(_) => "commerce.checkout.compensated",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StockEvent {
    MovementApplied { variant_key: VariantKey, movement_type: MovementType, quantity: i64, new_stock: i64 },
    LowStock { variant_key: VariantKey, current_stock: i64, threshold: i64 },
    OutOfStock { variant_key: VariantKey },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponEvent {
    Redeemed { code: String, payment_reference: String },
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEvent {
    Paid { order_id: Uuid, total: Decimal },
    Shipped { order_id: Uuid },
    Delivered { order_id: Uuid },
    Refunded { order_id: Uuid },
}

/// Raised when a charged checkout could not be fulfilled and its partial
/// effects were reversed. Operator-facing: the customer paid, no order exists.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutEvent {
    Compensated { payment_reference: String, reason: String },
}
