//! Order Aggregate
//!
//! An order exists only after its payment was confirmed, so the persisted
//! status machine starts at `Paid`. At most one order per payment reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Money, VariantKey};
use crate::error::EngineError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    order_number: String,
    items: Vec<OrderLine>,
    subtotal: Money,
    discount_amount: Money,
    total: Money,
    coupon_code: Option<String>,
    status: OrderStatus,
    payment_reference: String,
    shipping_address: Address,
    contact: Contact,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderLine { pub variant_key: VariantKey, pub quantity: u32, pub unit_price: Money, pub line_total: Money }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact { pub email: String, pub phone: Option<String> }

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Address { pub name: String, pub street1: String, pub street2: Option<String>, pub city: String, pub state: Option<String>, pub zip: String, pub country: String }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Paid, Shipped, Delivered, Refunded }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Refunded => "refunded",
        }
    }
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Refunded) }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paid" => Ok(Self::Paid),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        order_number: impl Into<String>,
        items: Vec<OrderLine>,
        subtotal: Money,
        discount_amount: Money,
        total: Money,
        coupon_code: Option<String>,
        payment_reference: impl Into<String>,
        shipping_address: Address,
        contact: Contact,
    ) -> Self {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut order = Self {
            id,
            order_number: order_number.into(),
            items,
            subtotal,
            discount_amount,
            total: total.clone(),
            coupon_code,
            status: OrderStatus::Paid,
            payment_reference: payment_reference.into(),
            shipping_address,
            contact,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Paid { order_id: id, total: total.amount() }));
        order
    }

    /// Rebuild from a persisted record. Skips creation events.
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: Uuid,
        order_number: String,
        items: Vec<OrderLine>,
        subtotal: Money,
        discount_amount: Money,
        total: Money,
        coupon_code: Option<String>,
        status: OrderStatus,
        payment_reference: String,
        shipping_address: Address,
        contact: Contact,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id, order_number, items, subtotal, discount_amount, total, coupon_code,
            status, payment_reference, shipping_address, contact, created_at, updated_at, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn items(&self) -> &[OrderLine] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn discount_amount(&self) -> &Money { &self.discount_amount }
    pub fn total(&self) -> &Money { &self.total }
    pub fn coupon_code(&self) -> Option<&str> { self.coupon_code.as_deref() }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_reference(&self) -> &str { &self.payment_reference }
    pub fn shipping_address(&self) -> &Address { &self.shipping_address }
    pub fn contact(&self) -> &Contact { &self.contact }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn ship(&mut self) -> Result<(), EngineError> {
        self.transition(OrderStatus::Paid, OrderStatus::Shipped)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Shipped { order_id: self.id }));
        Ok(())
    }

    pub fn deliver(&mut self) -> Result<(), EngineError> {
        self.transition(OrderStatus::Shipped, OrderStatus::Delivered)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Delivered { order_id: self.id }));
        Ok(())
    }

    /// Refund releases nothing back to stock by itself. Restocking, when the
    /// administrator wants it, is a separate explicit `return` movement.
    pub fn refund(&mut self) -> Result<(), EngineError> {
        self.transition(OrderStatus::Paid, OrderStatus::Refunded)?;
        self.raise_event(DomainEvent::Order(OrderEvent::Refunded { order_id: self.id }));
        Ok(())
    }

    fn transition(&mut self, from: OrderStatus, to: OrderStatus) -> Result<(), EngineError> {
        if self.status != from {
            return Err(EngineError::InvalidTransition {
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    /// Contact check backing unauthenticated order lookup. Email matches
    /// case-insensitively, phone on digits only.
    pub fn matches_contact(&self, email: Option<&str>, phone: Option<&str>) -> bool {
        let email_ok = email
            .map(|e| e.trim().eq_ignore_ascii_case(self.contact.email.trim()))
            .unwrap_or(false);
        let phone_ok = match (phone, &self.contact.phone) {
            (Some(given), Some(stored)) => digits(given) == digits(stored) && !digits(given).is_empty(),
            _ => false,
        };
        email_ok || phone_ok
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn digits(s: &str) -> String { s.chars().filter(|c| c.is_ascii_digit()).collect() }
