//! Checkout Orchestrator
//!
//! One checkout attempt walks quoted -> payment_pending -> committing ->
//! committed, or aborts at any point before committed. Quoting reserves
//! nothing, so an abandoned payment never ties up inventory. The commit is a
//! saga over three resources: per-line stock decrements, one coupon usage
//! increment, one order insert. Each sub-commit is idempotent, and partial
//! failure is undone with equal-and-opposite adjustment movements rather
//! than by rewriting the ledger.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::domain::aggregates::{
    Actor, Address, Contact, MovementType, Order, OrderLine, StockMovement,
};
use crate::domain::events::{CheckoutEvent, CouponEvent, DomainEvent};
use crate::domain::value_objects::{Money, VariantKey};
use crate::error::{EngineError, Result};
use crate::payment::{PaymentConfirmation, PaymentState, PaymentVerifier};
use crate::publisher::EventPublisher;
use crate::services::coupon_engine::CouponEngine;
use crate::services::stock_guard::StockGuard;
use crate::store::{InsertOutcome, OrderStore};

#[derive(Clone, Debug)]
pub struct QuoteItem {
    pub variant_key: VariantKey,
    pub quantity: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct QuoteLine {
    pub variant_key: VariantKey,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// A priced, coupon-adjusted total bound to a token. The token is what gets
/// handed to the payment processor, so a paid amount can always be checked
/// against what was quoted.
#[derive(Clone, Debug, Serialize)]
pub struct Quote {
    pub token: Uuid,
    pub lines: Vec<QuoteLine>,
    pub subtotal: Money,
    pub discount_amount: Money,
    pub total: Money,
    pub coupon_code: Option<String>,
    pub expires_at: DateTime<Utc>,
}

pub struct CheckoutOrchestrator {
    stock_guard: Arc<StockGuard>,
    coupons: Arc<CouponEngine>,
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn Catalog>,
    verifier: Arc<dyn PaymentVerifier>,
    publisher: EventPublisher,
    quotes: DashMap<Uuid, Quote>,
    quote_ttl: Duration,
}

impl CheckoutOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stock_guard: Arc<StockGuard>,
        coupons: Arc<CouponEngine>,
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn Catalog>,
        verifier: Arc<dyn PaymentVerifier>,
        publisher: EventPublisher,
        quote_ttl_secs: i64,
    ) -> Self {
        Self {
            stock_guard,
            coupons,
            orders,
            catalog,
            verifier,
            publisher,
            quotes: DashMap::new(),
            quote_ttl: Duration::seconds(quote_ttl_secs),
        }
    }

    /// Prices the requested items at current catalog prices and applies the
    /// coupon, mutating neither stock nor usage counters. Duplicate lines
    /// for the same variant are merged.
    pub async fn quote(&self, items: &[QuoteItem], coupon_code: Option<&str>) -> Result<Quote> {
        if items.is_empty() {
            return Err(EngineError::Validation("quote requires at least one item".into()));
        }

        let mut merged: BTreeMap<VariantKey, u32> = BTreeMap::new();
        for item in items {
            if item.quantity == 0 {
                return Err(EngineError::Validation("item quantity must be positive".into()));
            }
            *merged.entry(item.variant_key.clone()).or_insert(0) += item.quantity;
        }

        let mut lines = Vec::with_capacity(merged.len());
        let mut subtotal: Option<Money> = None;
        for (variant_key, quantity) in merged {
            let unit_price = self.catalog.unit_price(&variant_key).await?;
            let line_total = unit_price.multiply(quantity);
            subtotal = Some(match subtotal {
                Some(total) => total.add(&line_total)?,
                None => line_total.clone(),
            });
            lines.push(QuoteLine { variant_key, quantity, unit_price, line_total });
        }
        let subtotal =
            subtotal.ok_or_else(|| EngineError::Validation("quote requires at least one item".into()))?;

        let (coupon_code, discount_amount, total) = match coupon_code {
            Some(code) => {
                let applied = self.coupons.validate(code, &subtotal).await?;
                (Some(applied.code), applied.discount_amount, applied.new_total)
            }
            None => (None, Money::zero(subtotal.currency()), subtotal.clone()),
        };

        let now = Utc::now();
        self.quotes.retain(|_, q| q.expires_at > now);

        let quote = Quote {
            token: Uuid::new_v4(),
            lines,
            subtotal,
            discount_amount,
            total,
            coupon_code,
            expires_at: now + self.quote_ttl,
        };
        self.quotes.insert(quote.token, quote.clone());
        debug!(token = %quote.token, total = %quote.total, stage = "quoted", "checkout quoted");
        Ok(quote)
    }

    /// Commits a confirmed payment into an order. Replaying the same payment
    /// reference returns the already-created order with no new side effects.
    pub async fn commit(
        &self,
        quote_token: Uuid,
        confirmation: PaymentConfirmation,
        shipping_address: Address,
        contact: Contact,
    ) -> Result<Order> {
        self.verifier.verify(&confirmation)?;
        if confirmation.state != PaymentState::Confirmed {
            return Err(EngineError::PaymentMismatch);
        }
        let payment_reference = confirmation.payment_reference.clone();

        // Safe replay of webhooks and duplicate client calls.
        if let Some(existing) = self.orders.find_by_payment_reference(&payment_reference).await? {
            debug!(%payment_reference, "commit replay, returning existing order");
            return Ok(existing);
        }

        let quote = match self.quotes.get(&quote_token) {
            Some(q) => q.value().clone(),
            None => return Err(EngineError::QuoteNotFound),
        };
        if quote.expires_at <= Utc::now() {
            self.quotes.remove(&quote_token);
            return Err(EngineError::QuoteExpired);
        }
        if confirmation.amount != quote.total.amount()
            || confirmation.currency != quote.total.currency()
        {
            return Err(EngineError::PaymentMismatch);
        }

        debug!(%payment_reference, stage = "committing", "payment verified against quote");

        // Lines are kept sorted by variant key from quoting, so two checkouts
        // sharing variants always serialize in the same order.
        let mut committed: Vec<StockMovement> = Vec::with_capacity(quote.lines.len());
        for line in &quote.lines {
            let movement = self
                .stock_guard
                .reserve_and_commit(
                    &line.variant_key,
                    -(line.quantity as i64),
                    MovementType::Sale,
                    Some(format!("sale for payment {payment_reference}")),
                    Actor::System,
                    &format!("{payment_reference}:{}", line.variant_key),
                )
                .await;
            match movement {
                Ok(m) => committed.push(m),
                Err(e) => {
                    self.abort(&payment_reference, &quote, &committed, &e).await;
                    return Err(match e {
                        EngineError::InsufficientStock { .. } => {
                            EngineError::StockUnavailable { payment_reference }
                        }
                        other => other,
                    });
                }
            }
        }

        if let Some(code) = &quote.coupon_code {
            if let Err(e) = self.coupons.commit_usage(code, &payment_reference).await {
                self.abort(&payment_reference, &quote, &committed, &e).await;
                return Err(e);
            }
            self.publisher
                .publish(&DomainEvent::Coupon(CouponEvent::Redeemed {
                    code: code.clone(),
                    payment_reference: payment_reference.clone(),
                }))
                .await;
        }

        let items: Vec<OrderLine> = quote
            .lines
            .iter()
            .map(|l| OrderLine {
                variant_key: l.variant_key.clone(),
                quantity: l.quantity,
                unit_price: l.unit_price.clone(),
                line_total: l.line_total.clone(),
            })
            .collect();
        let mut order = Order::create(
            format!("ORD-{:08}", rand::random::<u32>()),
            items,
            quote.subtotal.clone(),
            quote.discount_amount.clone(),
            quote.total.clone(),
            quote.coupon_code.clone(),
            &payment_reference,
            shipping_address,
            contact,
        );
        let events = order.take_events();

        match self.orders.insert(order).await? {
            InsertOutcome::Created(order) => {
                self.publisher.publish_all(events).await;
                self.quotes.remove(&quote_token);
                info!(order_id = %order.id(), %payment_reference, stage = "committed", "order created");
                Ok(order)
            }
            // A concurrent replay won the insert; its movements and coupon
            // usage are the same idempotent ones, so nothing to undo.
            InsertOutcome::Existing(order) => Ok(order),
        }
    }

    /// Rolls back this attempt's stock effects with inverse adjustment
    /// movements. The customer was already charged, so the failure is logged
    /// loudly enough for manual refund or resolution.
    async fn abort(
        &self,
        payment_reference: &str,
        quote: &Quote,
        committed: &[StockMovement],
        cause: &EngineError,
    ) {
        let attempted: Vec<String> = quote
            .lines
            .iter()
            .map(|l| format!("{}x{}", l.variant_key, l.quantity))
            .collect();
        error!(
            %payment_reference,
            items = ?attempted,
            %cause,
            stage = "aborted",
            "charged checkout could not be fulfilled; compensating and flagging for reconciliation"
        );

        for movement in committed {
            let result = self
                .stock_guard
                .reserve_and_commit(
                    &movement.variant_key,
                    movement.compensation_quantity(),
                    MovementType::Adjustment,
                    Some(format!("compensation for payment {payment_reference}: {cause}")),
                    Actor::System,
                    &format!("{}:comp", movement.idempotency_key),
                )
                .await;
            if let Err(e) = result {
                error!(
                    %payment_reference,
                    variant = %movement.variant_key,
                    error = %e,
                    "compensation movement failed; ledger needs manual repair"
                );
            }
        }

        self.publisher
            .publish(&DomainEvent::Checkout(CheckoutEvent::Compensated {
                payment_reference: payment_reference.to_string(),
                reason: cause.to_string(),
            }))
            .await;
    }

    pub async fn order(&self, id: Uuid) -> Result<Order> {
        self.orders.find_by_id(id).await?.ok_or(EngineError::OrderNotFound)
    }

    pub async fn orders(&self) -> Result<Vec<Order>> {
        Ok(self.orders.list().await?)
    }

    pub async fn ship(&self, id: Uuid) -> Result<Order> {
        let mut order = self.order(id).await?;
        order.ship()?;
        self.orders.save(&order).await?;
        self.publisher.publish_all(order.take_events()).await;
        Ok(order)
    }

    pub async fn deliver(&self, id: Uuid) -> Result<Order> {
        let mut order = self.order(id).await?;
        order.deliver()?;
        self.orders.save(&order).await?;
        self.publisher.publish_all(order.take_events()).await;
        Ok(order)
    }

    /// Refund is an administrative action. Stock comes back only when the
    /// same action explicitly asks for it, as recorded `return` movements.
    pub async fn refund(&self, id: Uuid, restock: bool, actor: Actor) -> Result<Order> {
        let mut order = self.order(id).await?;
        order.refund()?;
        self.orders.save(&order).await?;

        if restock {
            for line in order.items() {
                self.stock_guard
                    .reserve_and_commit(
                        &line.variant_key,
                        line.quantity as i64,
                        MovementType::Return,
                        Some(format!("refund restock for order {}", order.order_number())),
                        actor.clone(),
                        &format!("refund:{}:{}", order.id(), line.variant_key),
                    )
                    .await?;
            }
        }

        self.publisher.publish_all(order.take_events()).await;
        Ok(order)
    }
}
