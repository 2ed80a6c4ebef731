//! Stock Aggregate
//!
//! A variant's stock level is never written directly. Every change is an
//! immutable `StockMovement` appended to that variant's ledger; the running
//! `current_stock` is a cache the ledger can always re-derive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::value_objects::VariantKey;

pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StockVariant {
    pub key: VariantKey,
    pub current_stock: i64,
    pub low_stock_threshold: i64,
    pub auto_restock_enabled: bool,
    pub auto_restock_level: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockVariant {
    pub fn new(key: VariantKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            current_stock: 0,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            auto_restock_enabled: false,
            auto_restock_level: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_out(&self) -> bool { self.current_stock == 0 }
    pub fn is_low(&self) -> bool { self.current_stock <= self.low_stock_threshold }
}

/// Admin-settable variant configuration. Stock itself moves only through the ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariantConfig {
    pub key: VariantKey,
    pub low_stock_threshold: Option<i64>,
    pub auto_restock_enabled: bool,
    pub auto_restock_level: Option<i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType { Inbound, Outbound, Adjustment, Sale, Return }

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Adjustment => "adjustment",
            Self::Sale => "sale",
            Self::Return => "return",
        }
    }

    /// Sign convention per movement type: sales and outbound shipments take
    /// stock, inbound and returns add it, adjustments go either way.
    pub fn permits_quantity(&self, quantity: i64) -> bool {
        match self {
            Self::Sale | Self::Outbound => quantity < 0,
            Self::Inbound | Self::Return => quantity > 0,
            Self::Adjustment => quantity != 0,
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_str()) }
}

impl FromStr for MovementType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            "adjustment" => Ok(Self::Adjustment),
            "sale" => Ok(Self::Sale),
            "return" => Ok(Self::Return),
            other => Err(format!("unknown movement type: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor { System, User(String) }

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

impl FromStr for Actor {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" { return Ok(Self::System); }
        match s.strip_prefix("user:") {
            Some(id) if !id.is_empty() => Ok(Self::User(id.to_string())),
            _ => Err(format!("unknown actor: {s}")),
        }
    }
}

/// One immutable, signed stock change. Never mutated or deleted once appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub variant_key: VariantKey,
    pub sequence: i64,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reason: Option<String>,
    pub actor: Actor,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Chain invariant for a single movement.
    pub fn is_internally_consistent(&self) -> bool {
        self.new_stock == self.previous_stock + self.quantity && self.new_stock >= 0
    }

    /// `previous_stock` of movement n must equal `new_stock` of movement n-1.
    pub fn extends(&self, prior: &StockMovement) -> bool {
        self.sequence == prior.sequence + 1 && self.previous_stock == prior.new_stock
    }

    /// The movement that undoes this one without rewriting history.
    pub fn compensation_quantity(&self) -> i64 { -self.quantity }
}
