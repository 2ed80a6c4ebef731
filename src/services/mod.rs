//! Engine services
pub mod checkout;
pub mod coupon_engine;
pub mod ledger;
pub mod restock;
pub mod stock_guard;
pub mod tracker;

pub use checkout::{CheckoutOrchestrator, Quote, QuoteItem};
pub use coupon_engine::{CouponEngine, CouponQuote};
pub use ledger::{LedgerAudit, LedgerService};
pub use restock::{RestockAdvisor, StockAlert};
pub use stock_guard::StockGuard;
pub use tracker::OrderTracker;
