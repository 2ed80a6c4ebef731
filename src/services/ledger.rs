//! Ledger read path
//!
//! The movement chain is authoritative; the running counter on the variant is
//! a cache. This service replays chains, verifies the audit invariants, and
//! reconciles derived stock against the counter.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::domain::aggregates::StockMovement;
use crate::domain::value_objects::VariantKey;
use crate::error::{EngineError, Result};
use crate::store::{StockStore, StoreError};

#[derive(Debug, Serialize)]
pub struct LedgerAudit {
    pub variant_key: VariantKey,
    pub movement_count: usize,
    pub derived_stock: i64,
    pub counter_stock: i64,
    pub chain_intact: bool,
    pub counter_consistent: bool,
    pub first_violation: Option<String>,
}

pub struct LedgerService {
    store: Arc<dyn StockStore>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn StockStore>) -> Self { Self { store } }

    pub async fn movements(&self, key: &VariantKey) -> Result<Vec<StockMovement>> {
        self.store.movements(key).await.map_err(|e| match e {
            StoreError::VariantNotFound => EngineError::VariantNotFound(key.clone()),
            other => other.into(),
        })
    }

    /// Stock level derived purely from the chain.
    pub async fn replay(&self, key: &VariantKey) -> Result<i64> {
        let movements = self.movements(key).await?;
        Ok(movements.last().map(|m| m.new_stock).unwrap_or(0))
    }

    /// Walks the full chain and compares the derived level with the cached
    /// counter. Any discrepancy is a storage-level defect worth an alert.
    pub async fn audit(&self, key: &VariantKey) -> Result<LedgerAudit> {
        let movements = self.movements(key).await?;
        let variant = self
            .store
            .variant(key)
            .await
            .map_err(EngineError::from)?
            .ok_or_else(|| EngineError::VariantNotFound(key.clone()))?;

        let mut first_violation = None;
        for (index, movement) in movements.iter().enumerate() {
            if !movement.is_internally_consistent() {
                first_violation = Some(format!(
                    "movement {} breaks new = previous + quantity", movement.sequence
                ));
                break;
            }
            if index == 0 {
                if movement.sequence != 0 {
                    first_violation = Some(format!("chain starts at sequence {}", movement.sequence));
                    break;
                }
            } else if !movement.extends(&movements[index - 1]) {
                first_violation = Some(format!(
                    "movement {} does not extend movement {}",
                    movement.sequence,
                    movements[index - 1].sequence
                ));
                break;
            }
        }

        let derived_stock = movements.last().map(|m| m.new_stock).unwrap_or(0);
        let chain_intact = first_violation.is_none();
        let counter_consistent = chain_intact && derived_stock == variant.current_stock;
        if !counter_consistent {
            warn!(%key, derived_stock, counter = variant.current_stock, "ledger audit found a discrepancy");
        }

        Ok(LedgerAudit {
            variant_key: key.clone(),
            movement_count: movements.len(),
            derived_stock,
            counter_stock: variant.current_stock,
            chain_intact,
            counter_consistent,
            first_violation,
        })
    }
}
