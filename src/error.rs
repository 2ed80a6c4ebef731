//! Error taxonomy
//!
//! Checkout failures carry a specific, user-visible reason so the client can
//! re-quote instead of showing a generic error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::value_objects::{MoneyError, VariantKey, VariantKeyError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("insufficient stock for {variant}: requested {requested}, available {available}")]
    InsufficientStock { variant: VariantKey, requested: i64, available: i64 },

    #[error("unknown variant: {0}")]
    VariantNotFound(VariantKey),

    #[error("coupon not found or inactive")]
    CouponNotFound,

    #[error("coupon expired")]
    CouponExpired,

    #[error("coupon usage limit reached")]
    CouponExhausted,

    #[error("cart total below coupon minimum of {minimum}")]
    CouponMinimumNotMet { minimum: Decimal },

    #[error("payment confirmation does not match the quoted amount")]
    PaymentMismatch,

    #[error("payment confirmation could not be verified")]
    PaymentUnverified,

    #[error("stock unavailable after payment {payment_reference}; charge flagged for reconciliation")]
    StockUnavailable { payment_reference: String },

    #[error("order not found")]
    OrderNotFound,

    #[error("order lookup requires a matching email or phone")]
    UnauthorizedLookup,

    #[error("quote not found")]
    QuoteNotFound,

    #[error("quote expired, request a new one")]
    QuoteExpired,

    #[error("invalid movement: {0}")]
    InvalidMovement(String),

    #[error("invalid order transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("commit conflict, retries exhausted")]
    Conflict,

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::VariantNotFound(_) => "variant_not_found",
            Self::CouponNotFound => "coupon_not_found",
            Self::CouponExpired => "coupon_expired",
            Self::CouponExhausted => "coupon_exhausted",
            Self::CouponMinimumNotMet { .. } => "coupon_minimum_not_met",
            Self::PaymentMismatch => "payment_mismatch",
            Self::PaymentUnverified => "payment_unverified",
            Self::StockUnavailable { .. } => "stock_unavailable",
            Self::OrderNotFound => "order_not_found",
            Self::UnauthorizedLookup => "unauthorized_lookup",
            Self::QuoteNotFound => "quote_not_found",
            Self::QuoteExpired => "quote_expired",
            Self::InvalidMovement(_) => "invalid_movement",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Validation(_) => "validation",
            Self::Conflict => "conflict",
            Self::Storage(_) => "storage",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InsufficientStock { .. } | Self::CouponExhausted | Self::Conflict => StatusCode::CONFLICT,
            Self::VariantNotFound(_) | Self::CouponNotFound | Self::OrderNotFound | Self::QuoteNotFound => StatusCode::NOT_FOUND,
            Self::CouponExpired | Self::QuoteExpired => StatusCode::GONE,
            Self::CouponMinimumNotMet { .. }
            | Self::InvalidMovement(_)
            | Self::InvalidTransition { .. }
            | Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PaymentMismatch | Self::PaymentUnverified => StatusCode::PAYMENT_REQUIRED,
            Self::UnauthorizedLookup => StatusCode::FORBIDDEN,
            Self::StockUnavailable { .. } => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-facing reason. Kept specific enough to act on.
    fn reason(&self) -> String {
        match self {
            Self::InsufficientStock { variant, .. } => format!("{variant} just sold out at the requested quantity"),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.code(), "reason": self.reason() }));
        (self.status(), body).into_response()
    }
}

impl From<MoneyError> for EngineError {
    fn from(e: MoneyError) -> Self { Self::Validation(e.to_string()) }
}

impl From<VariantKeyError> for EngineError {
    fn from(e: VariantKeyError) -> Self { Self::Validation(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, EngineError>;
