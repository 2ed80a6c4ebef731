//! Inventory & Checkout Consistency Engine
//!
//! Tracks per-variant stock as an auditable append-only ledger, enforces
//! non-overselling under concurrent purchases, applies promotional coupons
//! with bounded usage, and gates order creation on confirmed payment while
//! keeping stock, coupon usage, and order records mutually consistent.
//!
//! ## Components
//! - Stock ledger and guard: every change is an immutable movement
//! - Restock advisor: low-stock alerts and reorder suggestions
//! - Coupon engine: ordered validation, capped atomic usage commits
//! - Checkout orchestrator: payment-gated saga with compensation
//! - Order tracker: credentialed unauthenticated lookup

pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod payment;
pub mod publisher;
pub mod services;
pub mod store;

pub use error::{EngineError, Result};
