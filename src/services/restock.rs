//! Restock Advisor
//!
//! Read-only. Flags variants at or below their low-stock threshold and, for
//! variants with auto-restock configured, suggests how much to reorder.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::aggregates::StockVariant;
use crate::domain::value_objects::VariantKey;
use crate::error::Result;
use crate::store::StockStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity { Low, Out }

#[derive(Clone, Debug, Serialize)]
pub struct StockAlert {
    pub variant_key: VariantKey,
    pub current_stock: i64,
    pub threshold: i64,
    pub severity: AlertSeverity,
    pub suggested_reorder: Option<i64>,
}

pub struct RestockAdvisor {
    store: Arc<dyn StockStore>,
}

impl RestockAdvisor {
    pub fn new(store: Arc<dyn StockStore>) -> Self { Self { store } }

    pub async fn report(&self) -> Result<Vec<StockAlert>> {
        let variants = self.store.variants().await?;
        Ok(variants.iter().filter_map(Self::alert_for).collect())
    }

    /// Alerting triggers at `current <= threshold`; the reorder suggestion
    /// only below it, so a variant sitting exactly on its threshold is
    /// flagged without being topped up.
    pub fn alert_for(variant: &StockVariant) -> Option<StockAlert> {
        if !variant.is_low() {
            return None;
        }
        let severity = if variant.is_out() { AlertSeverity::Out } else { AlertSeverity::Low };
        let suggested_reorder = match (variant.auto_restock_enabled, variant.auto_restock_level) {
            (true, Some(level)) if variant.current_stock < variant.low_stock_threshold => {
                Some((level - variant.current_stock).max(0))
            }
            _ => None,
        };
        Some(StockAlert {
            variant_key: variant.key.clone(),
            current_stock: variant.current_stock,
            threshold: variant.low_stock_threshold,
            severity,
            suggested_reorder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn variant(stock: i64, threshold: i64, auto: bool, level: Option<i64>) -> StockVariant {
        let now = Utc::now();
        StockVariant {
            key: "tee-01/M".parse().unwrap(),
            current_stock: stock,
            low_stock_threshold: threshold,
            auto_restock_enabled: auto,
            auto_restock_level: level,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn healthy_stock_produces_no_alert() {
        assert!(RestockAdvisor::alert_for(&variant(20, 5, true, Some(50))).is_none());
    }

    #[test]
    fn at_threshold_is_flagged_without_suggestion() {
        let alert = RestockAdvisor::alert_for(&variant(5, 5, true, Some(50))).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Low);
        assert_eq!(alert.suggested_reorder, None);
    }

    #[test]
    fn below_threshold_suggests_top_up() {
        let alert = RestockAdvisor::alert_for(&variant(2, 5, true, Some(50))).unwrap();
        assert_eq!(alert.suggested_reorder, Some(48));
    }

    #[test]
    fn zero_stock_is_out() {
        let alert = RestockAdvisor::alert_for(&variant(0, 5, false, None)).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Out);
        assert_eq!(alert.suggested_reorder, None);
    }

    #[test]
    fn missing_level_still_alerts() {
        let alert = RestockAdvisor::alert_for(&variant(1, 5, true, None)).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Low);
        assert_eq!(alert.suggested_reorder, None);
    }

    #[test]
    fn level_below_current_never_suggests_negative() {
        let alert = RestockAdvisor::alert_for(&variant(3, 5, true, Some(2))).unwrap();
        assert_eq!(alert.suggested_reorder, Some(0));
    }
}
