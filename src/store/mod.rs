//! Persistence layer
//!
//! Three narrow stores behind traits so the engine runs against the in-memory
//! arenas in tests (and when no `DATABASE_URL` is configured) and against
//! Postgres in production. Both backends provide the same conditional-commit
//! guarantees: movement appends serialize per variant, coupon increments
//! re-check the cap, order inserts are unique per payment reference.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{
    Actor, Coupon, MovementType, Order, StockMovement, StockVariant, VariantConfig,
};
use crate::domain::value_objects::VariantKey;
use crate::error::EngineError;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("variant not found")]
    VariantNotFound,
    #[error("insufficient stock: {available} available")]
    InsufficientStock { available: i64 },
    #[error("coupon not found")]
    CouponNotFound,
    #[error("coupon exhausted")]
    CouponExhausted,
    #[error("coupon code already exists")]
    DuplicateCode,
    #[error("order not found")]
    OrderNotFound,
    #[error("transient conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CouponNotFound => EngineError::CouponNotFound,
            StoreError::CouponExhausted => EngineError::CouponExhausted,
            StoreError::DuplicateCode => EngineError::Validation("coupon code already exists".into()),
            StoreError::OrderNotFound => EngineError::OrderNotFound,
            StoreError::Conflict => EngineError::Conflict,
            StoreError::Backend(msg) => EngineError::Storage(msg),
            // Callers with variant context map these themselves.
            StoreError::VariantNotFound => EngineError::Storage("variant not found".into()),
            StoreError::InsufficientStock { available } => {
                EngineError::Storage(format!("insufficient stock: {available} available"))
            }
        }
    }
}

/// Everything needed to append one movement.
#[derive(Clone, Debug)]
pub struct MovementRequest {
    pub key: VariantKey,
    pub quantity: i64,
    pub movement_type: MovementType,
    pub reason: Option<String>,
    pub actor: Actor,
    pub idempotency_key: String,
}

/// Distinguishes a fresh append from an idempotent replay.
#[derive(Clone, Debug)]
pub enum MovementOutcome {
    Applied(StockMovement),
    Replayed(StockMovement),
}

impl MovementOutcome {
    pub fn movement(self) -> StockMovement {
        match self {
            Self::Applied(m) | Self::Replayed(m) => m,
        }
    }
    pub fn is_replay(&self) -> bool { matches!(self, Self::Replayed(_)) }
}

#[derive(Clone, Debug)]
pub enum InsertOutcome {
    Created(Order),
    Existing(Order),
}

#[async_trait]
pub trait StockStore: Send + Sync {
    /// Create or reconfigure a variant. Never touches `current_stock`.
    async fn upsert_variant(&self, config: VariantConfig) -> Result<StockVariant, StoreError>;
    async fn variant(&self, key: &VariantKey) -> Result<Option<StockVariant>, StoreError>;
    async fn variants(&self) -> Result<Vec<StockVariant>, StoreError>;

    /// The single atomic step that mutates stock: serializes per variant,
    /// rejects a negative result, assigns the next sequence, and records
    /// previous/new stock. A known idempotency key returns the existing
    /// movement without appending.
    async fn apply_movement(&self, request: MovementRequest) -> Result<MovementOutcome, StoreError>;

    /// Movements for a variant in sequence order.
    async fn movements(&self, key: &VariantKey) -> Result<Vec<StockMovement>, StoreError>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn create(&self, coupon: Coupon) -> Result<Coupon, StoreError>;
    /// Updates configuration; `used_count` is preserved from the stored row.
    async fn update(&self, coupon: Coupon) -> Result<Coupon, StoreError>;
    async fn get(&self, code: &str) -> Result<Option<Coupon>, StoreError>;
    async fn list(&self) -> Result<Vec<Coupon>, StoreError>;
    async fn deactivate(&self, code: &str) -> Result<(), StoreError>;

    /// Conditionally increments `used_count`, exactly once per `usage_ref`.
    /// A repeated ref is a no-op; a full counter fails `CouponExhausted`.
    /// Missing or inactive coupons fail `CouponNotFound`.
    async fn commit_usage(&self, code: &str, usage_ref: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert keyed on the unique payment reference; a loser of the insert
    /// race gets the winner's order back.
    async fn insert(&self, order: Order) -> Result<InsertOutcome, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, StoreError>;
    /// Persists an order after an aggregate-level transition.
    async fn save(&self, order: &Order) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<Order>, StoreError>;
}
