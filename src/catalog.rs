//! Catalog boundary
//!
//! Pricing lives outside this engine. Quotes ask the catalog for the current
//! unit price of each variant and never cache it past the quote's lifetime.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::domain::value_objects::{Money, VariantKey};
use crate::error::{EngineError, Result};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn unit_price(&self, key: &VariantKey) -> Result<Money>;
}

/// In-process price table standing in for the catalog service. The admin
/// surface writes to it; quoting reads from it.
#[derive(Default)]
pub struct PriceTable {
    currency: String,
    prices: DashMap<VariantKey, Decimal>,
}

impl PriceTable {
    pub fn new(currency: impl Into<String>) -> Self {
        Self { currency: currency.into(), prices: DashMap::new() }
    }

    pub fn set_price(&self, key: VariantKey, amount: Decimal) {
        self.prices.insert(key, amount);
    }
}

#[async_trait]
impl Catalog for PriceTable {
    async fn unit_price(&self, key: &VariantKey) -> Result<Money> {
        self.prices
            .get(key)
            .map(|amount| Money::new(*amount, &self.currency))
            .ok_or_else(|| EngineError::VariantNotFound(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn prices_resolve_per_variant() {
        let table = PriceTable::new("USD");
        let key: VariantKey = "tee-01/M".parse().unwrap();
        table.set_price(key.clone(), dec!(19.99));
        let price = table.unit_price(&key).await.unwrap();
        assert_eq!(price.amount(), dec!(19.99));
        assert!(table.unit_price(&"ghost/S".parse().unwrap()).await.is_err());
    }
}
