//! Stock Guard
//!
//! The only write path into a variant's ledger. Enforces sign conventions,
//! replays idempotently, retries transient conflicts a bounded number of
//! times, and turns a would-go-negative append into a hard
//! `InsufficientStock` the caller must not retry at the same quantity.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::aggregates::{Actor, MovementType, StockMovement};
use crate::domain::events::{DomainEvent, StockEvent};
use crate::domain::value_objects::VariantKey;
use crate::error::{EngineError, Result};
use crate::publisher::EventPublisher;
use crate::store::{MovementRequest, StockStore, StoreError};

pub struct StockGuard {
    store: Arc<dyn StockStore>,
    publisher: EventPublisher,
    max_retries: u32,
}

impl StockGuard {
    pub fn new(store: Arc<dyn StockStore>, publisher: EventPublisher, max_retries: u32) -> Self {
        Self { store, publisher, max_retries }
    }

    pub async fn reserve_and_commit(
        &self,
        key: &VariantKey,
        quantity: i64,
        movement_type: MovementType,
        reason: Option<String>,
        actor: Actor,
        idempotency_key: &str,
    ) -> Result<StockMovement> {
        if !movement_type.permits_quantity(quantity) {
            return Err(EngineError::InvalidMovement(format!(
                "{movement_type} movement cannot carry quantity {quantity}"
            )));
        }

        let request = MovementRequest {
            key: key.clone(),
            quantity,
            movement_type,
            reason,
            actor,
            idempotency_key: idempotency_key.to_string(),
        };

        let mut attempt = 0;
        let outcome = loop {
            match self.store.apply_movement(request.clone()).await {
                Ok(outcome) => break outcome,
                // DuplicateCode means a concurrent retry with the same key won
                // the append; the next attempt lands on the replay path.
                Err(StoreError::Conflict) | Err(StoreError::DuplicateCode) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(%key, idempotency_key, "movement commit retries exhausted");
                        return Err(EngineError::Conflict);
                    }
                    debug!(%key, attempt, "retrying movement commit after conflict");
                }
                Err(StoreError::VariantNotFound) => {
                    return Err(EngineError::VariantNotFound(key.clone()));
                }
                Err(StoreError::InsufficientStock { available }) => {
                    return Err(EngineError::InsufficientStock {
                        variant: key.clone(),
                        requested: quantity.unsigned_abs() as i64,
                        available,
                    });
                }
                Err(other) => return Err(other.into()),
            }
        };

        let replayed = outcome.is_replay();
        let movement = outcome.movement();
        if !replayed {
            self.emit_stock_events(&movement).await;
        }
        Ok(movement)
    }

    async fn emit_stock_events(&self, movement: &StockMovement) {
        self.publisher
            .publish(&DomainEvent::Stock(StockEvent::MovementApplied {
                variant_key: movement.variant_key.clone(),
                movement_type: movement.movement_type,
                quantity: movement.quantity,
                new_stock: movement.new_stock,
            }))
            .await;

        // Threshold alerts only when stock went down.
        if movement.quantity >= 0 {
            return;
        }
        match self.store.variant(&movement.variant_key).await {
            Ok(Some(variant)) if variant.is_out() => {
                self.publisher
                    .publish(&DomainEvent::Stock(StockEvent::OutOfStock {
                        variant_key: movement.variant_key.clone(),
                    }))
                    .await;
            }
            Ok(Some(variant)) if variant.is_low() => {
                self.publisher
                    .publish(&DomainEvent::Stock(StockEvent::LowStock {
                        variant_key: movement.variant_key.clone(),
                        current_stock: variant.current_stock,
                        threshold: variant.low_stock_threshold,
                    }))
                    .await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not evaluate stock thresholds"),
        }
    }
}
