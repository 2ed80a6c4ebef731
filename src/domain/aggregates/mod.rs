//! Aggregates module
pub mod stock;
pub mod coupon;
pub mod order;

pub use stock::{Actor, MovementType, StockMovement, StockVariant, VariantConfig};
pub use coupon::{Coupon, CouponType};
pub use order::{Address, Contact, Order, OrderLine, OrderStatus};
