//! Postgres store
//!
//! Same contracts as the in-memory arenas, expressed as conditional SQL:
//! movement appends take a `FOR UPDATE` row lock on the one variant being
//! mutated, coupon increments re-check the cap inside the locking
//! transaction, and order inserts rely on the unique payment-reference index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::{
    Address, Contact, Coupon, Order, OrderLine, StockMovement, StockVariant, VariantConfig,
};
use crate::domain::value_objects::{Money, VariantKey};

use super::{
    CouponStore, InsertOutcome, MovementOutcome, MovementRequest, OrderStore, StockStore, StoreError,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            // serialization_failure / deadlock_detected are retryable
            Some("40001") | Some("40P01") => return StoreError::Conflict,
            Some("23505") => return StoreError::DuplicateCode,
            _ => {}
        }
    }
    StoreError::Backend(e.to_string())
}

fn bad_row(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("corrupt {what} row: {detail}"))
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    variant_key: String,
    current_stock: i64,
    low_stock_threshold: i64,
    auto_restock_enabled: bool,
    auto_restock_level: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<VariantRow> for StockVariant {
    type Error = StoreError;
    fn try_from(row: VariantRow) -> Result<Self, Self::Error> {
        Ok(StockVariant {
            key: row.variant_key.parse().map_err(|e| bad_row("variant", e))?,
            current_stock: row.current_stock,
            low_stock_threshold: row.low_stock_threshold,
            auto_restock_enabled: row.auto_restock_enabled,
            auto_restock_level: row.auto_restock_level,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MovementRow {
    id: Uuid,
    variant_key: String,
    sequence: i64,
    movement_type: String,
    quantity: i64,
    previous_stock: i64,
    new_stock: i64,
    reason: Option<String>,
    actor: String,
    idempotency_key: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StoreError;
    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(StockMovement {
            id: row.id,
            variant_key: row.variant_key.parse().map_err(|e| bad_row("movement", e))?,
            sequence: row.sequence,
            movement_type: row.movement_type.parse().map_err(|e| bad_row("movement", e))?,
            quantity: row.quantity,
            previous_stock: row.previous_stock,
            new_stock: row.new_stock,
            reason: row.reason,
            actor: row.actor.parse().map_err(|e| bad_row("movement", e))?,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    code: String,
    coupon_type: String,
    value: Decimal,
    min_purchase_amount: Decimal,
    max_discount_amount: Option<Decimal>,
    expires_at: DateTime<Utc>,
    max_uses: i64,
    used_count: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = StoreError;
    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        Ok(Coupon {
            code: row.code,
            coupon_type: row.coupon_type.parse().map_err(|e| bad_row("coupon", e))?,
            value: row.value,
            min_purchase_amount: row.min_purchase_amount,
            max_discount_amount: row.max_discount_amount,
            expires_at: row.expires_at,
            max_uses: row.max_uses.max(0) as u32,
            used_count: row.used_count.max(0) as u32,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    items: serde_json::Value,
    subtotal: Decimal,
    discount_amount: Decimal,
    total: Decimal,
    currency: String,
    coupon_code: Option<String>,
    status: String,
    payment_reference: String,
    shipping_address: serde_json::Value,
    contact_email: String,
    contact_phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;
    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let items: Vec<OrderLine> =
            serde_json::from_value(row.items).map_err(|e| bad_row("order", e))?;
        let shipping_address: Address =
            serde_json::from_value(row.shipping_address).map_err(|e| bad_row("order", e))?;
        Ok(Order::rehydrate(
            row.id,
            row.order_number,
            items,
            Money::new(row.subtotal, &row.currency),
            Money::new(row.discount_amount, &row.currency),
            Money::new(row.total, &row.currency),
            row.coupon_code,
            row.status.parse().map_err(|e| bad_row("order", e))?,
            row.payment_reference,
            shipping_address,
            Contact { email: row.contact_email, phone: row.contact_phone },
            row.created_at,
            row.updated_at,
        ))
    }
}

#[async_trait]
impl StockStore for PgStore {
    async fn upsert_variant(&self, config: VariantConfig) -> Result<StockVariant, StoreError> {
        let row = sqlx::query_as::<_, VariantRow>(
            "INSERT INTO stock_variants (variant_key, current_stock, low_stock_threshold, auto_restock_enabled, auto_restock_level, created_at, updated_at) \
             VALUES ($1, 0, COALESCE($2, 5), $3, $4, NOW(), NOW()) \
             ON CONFLICT (variant_key) DO UPDATE SET \
               low_stock_threshold = COALESCE($2, stock_variants.low_stock_threshold), \
               auto_restock_enabled = $3, \
               auto_restock_level = $4, \
               updated_at = NOW() \
             RETURNING *",
        )
        .bind(config.key.to_string())
        .bind(config.low_stock_threshold)
        .bind(config.auto_restock_enabled)
        .bind(config.auto_restock_level)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.try_into()
    }

    async fn variant(&self, key: &VariantKey) -> Result<Option<StockVariant>, StoreError> {
        sqlx::query_as::<_, VariantRow>("SELECT * FROM stock_variants WHERE variant_key = $1")
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn variants(&self) -> Result<Vec<StockVariant>, StoreError> {
        sqlx::query_as::<_, VariantRow>("SELECT * FROM stock_variants ORDER BY variant_key")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn apply_movement(&self, request: MovementRequest) -> Result<MovementOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        if let Some(existing) = sqlx::query_as::<_, MovementRow>(
            "SELECT * FROM stock_movements WHERE idempotency_key = $1",
        )
        .bind(&request.idempotency_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?
        {
            return Ok(MovementOutcome::Replayed(existing.try_into()?));
        }

        // Row lock scoped to this variant; concurrent commits to other
        // variants proceed untouched.
        let variant = sqlx::query_as::<_, VariantRow>(
            "SELECT * FROM stock_variants WHERE variant_key = $1 FOR UPDATE",
        )
        .bind(request.key.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?
        .ok_or(StoreError::VariantNotFound)?;

        let available = variant.current_stock;
        let new_stock = available + request.quantity;
        if new_stock < 0 {
            return Err(StoreError::InsufficientStock { available });
        }

        let (sequence,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence) + 1, 0) FROM stock_movements WHERE variant_key = $1",
        )
        .bind(request.key.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let inserted = sqlx::query_as::<_, MovementRow>(
            "INSERT INTO stock_movements (id, variant_key, sequence, movement_type, quantity, previous_stock, new_stock, reason, actor, idempotency_key, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW()) RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(request.key.to_string())
        .bind(sequence)
        .bind(request.movement_type.as_str())
        .bind(request.quantity)
        .bind(available)
        .bind(new_stock)
        .bind(&request.reason)
        .bind(request.actor.to_string())
        .bind(&request.idempotency_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query("UPDATE stock_variants SET current_stock = $2, updated_at = NOW() WHERE variant_key = $1")
            .bind(request.key.to_string())
            .bind(new_stock)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(MovementOutcome::Applied(inserted.try_into()?))
    }

    async fn movements(&self, key: &VariantKey) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query_as::<_, MovementRow>(
            "SELECT * FROM stock_movements WHERE variant_key = $1 ORDER BY sequence",
        )
        .bind(key.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if rows.is_empty() {
            // Distinguish "no movements yet" from "no such variant".
            self.variant(key).await?.ok_or(StoreError::VariantNotFound)?;
        }
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl CouponStore for PgStore {
    async fn create(&self, coupon: Coupon) -> Result<Coupon, StoreError> {
        let row = sqlx::query_as::<_, CouponRow>(
            "INSERT INTO coupons (code, coupon_type, value, min_purchase_amount, max_discount_amount, expires_at, max_uses, used_count, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, NOW(), NOW()) RETURNING *",
        )
        .bind(&coupon.code)
        .bind(coupon.coupon_type.as_str())
        .bind(coupon.value)
        .bind(coupon.min_purchase_amount)
        .bind(coupon.max_discount_amount)
        .bind(coupon.expires_at)
        .bind(coupon.max_uses as i64)
        .bind(coupon.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.try_into()
    }

    async fn update(&self, coupon: Coupon) -> Result<Coupon, StoreError> {
        sqlx::query_as::<_, CouponRow>(
            "UPDATE coupons SET coupon_type = $2, value = $3, min_purchase_amount = $4, max_discount_amount = $5, expires_at = $6, max_uses = $7, is_active = $8, updated_at = NOW() \
             WHERE code = $1 RETURNING *",
        )
        .bind(&coupon.code)
        .bind(coupon.coupon_type.as_str())
        .bind(coupon.value)
        .bind(coupon.min_purchase_amount)
        .bind(coupon.max_discount_amount)
        .bind(coupon.expires_at)
        .bind(coupon.max_uses as i64)
        .bind(coupon.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or(StoreError::CouponNotFound)?
        .try_into()
    }

    async fn get(&self, code: &str) -> Result<Option<Coupon>, StoreError> {
        sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Coupon>, StoreError> {
        sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons ORDER BY code")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn deactivate(&self, code: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE coupons SET is_active = FALSE, updated_at = NOW() WHERE code = $1")
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::CouponNotFound);
        }
        Ok(())
    }

    async fn commit_usage(&self, code: &str, usage_ref: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let coupon = sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE code = $1 FOR UPDATE")
            .bind(code)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .ok_or(StoreError::CouponNotFound)?;
        if !coupon.is_active {
            return Err(StoreError::CouponNotFound);
        }

        let replay = sqlx::query("SELECT 1 FROM coupon_usages WHERE code = $1 AND usage_ref = $2")
            .bind(code)
            .bind(usage_ref)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .is_some();
        if replay {
            return Ok(());
        }

        if coupon.used_count >= coupon.max_uses {
            return Err(StoreError::CouponExhausted);
        }

        sqlx::query("INSERT INTO coupon_usages (code, usage_ref, created_at) VALUES ($1, $2, NOW())")
            .bind(code)
            .bind(usage_ref)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        sqlx::query("UPDATE coupons SET used_count = used_count + 1, updated_at = NOW() WHERE code = $1")
            .bind(code)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert(&self, order: Order) -> Result<InsertOutcome, StoreError> {
        let items = serde_json::to_value(order.items())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let shipping = serde_json::to_value(order.shipping_address())
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO orders (id, order_number, items, subtotal, discount_amount, total, currency, coupon_code, status, payment_reference, shipping_address, contact_email, contact_phone, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (payment_reference) DO NOTHING",
        )
        .bind(order.id())
        .bind(order.order_number())
        .bind(&items)
        .bind(order.subtotal().amount())
        .bind(order.discount_amount().amount())
        .bind(order.total().amount())
        .bind(order.total().currency())
        .bind(order.coupon_code())
        .bind(order.status().as_str())
        .bind(order.payment_reference())
        .bind(&shipping)
        .bind(&order.contact().email)
        .bind(&order.contact().phone)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 1 {
            return Ok(InsertOutcome::Created(order));
        }
        let existing = self
            .find_by_payment_reference(order.payment_reference())
            .await?
            .ok_or_else(|| StoreError::Backend("payment reference conflict without a stored order".into()))?;
        Ok(InsertOutcome::Existing(existing))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE payment_reference = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order.id())
            .bind(order.status().as_str())
            .bind(order.updated_at())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }
}
