//! Inventory & Checkout Consistency Engine - HTTP service

use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::{get, post}, Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use validator::Validate;

use checkout_engine::catalog::PriceTable;
use checkout_engine::config::Config;
use checkout_engine::domain::aggregates::{
    Actor, Address, Contact, Coupon, CouponType, MovementType, Order, StockMovement, StockVariant,
    VariantConfig,
};
use checkout_engine::domain::value_objects::{Money, VariantKey};
use checkout_engine::error::EngineError;
use checkout_engine::payment::{HmacVerifier, PaymentConfirmation};
use checkout_engine::publisher::EventPublisher;
use checkout_engine::services::{
    CheckoutOrchestrator, CouponEngine, CouponQuote, LedgerAudit, LedgerService, OrderTracker,
    Quote, QuoteItem, RestockAdvisor, StockAlert, StockGuard,
};
use checkout_engine::store::{CouponStore, InMemoryStore, OrderStore, PgStore, StockStore};

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutOrchestrator>,
    pub guard: Arc<StockGuard>,
    pub ledger: Arc<LedgerService>,
    pub restock: Arc<RestockAdvisor>,
    pub coupons: Arc<CouponEngine>,
    pub coupon_store: Arc<dyn CouponStore>,
    pub stock_store: Arc<dyn StockStore>,
    pub tracker: Arc<OrderTracker>,
    pub catalog: Arc<PriceTable>,
    pub currency: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let (stock_store, coupon_store, order_store): (Arc<dyn StockStore>, Arc<dyn CouponStore>, Arc<dyn OrderStore>) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            let store = Arc::new(PgStore::new(pool));
            (store.clone() as Arc<dyn StockStore>, store.clone() as Arc<dyn CouponStore>, store as Arc<dyn OrderStore>)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on the in-memory store");
            let store = Arc::new(InMemoryStore::new());
            (store.clone() as Arc<dyn StockStore>, store.clone() as Arc<dyn CouponStore>, store as Arc<dyn OrderStore>)
        }
    };

    let nats = match &config.nats_url {
        Some(url) => async_nats::connect(url.as_str()).await.ok(),
        None => None,
    };
    let publisher = EventPublisher::new(nats);

    let guard = Arc::new(StockGuard::new(stock_store.clone(), publisher.clone(), config.commit_max_retries));
    let coupons = Arc::new(CouponEngine::new(coupon_store.clone()));
    let catalog = Arc::new(PriceTable::new(&config.currency));
    let checkout = Arc::new(CheckoutOrchestrator::new(
        guard.clone(),
        coupons.clone(),
        order_store.clone(),
        catalog.clone(),
        Arc::new(HmacVerifier::new(&config.payment_signing_secret)),
        publisher.clone(),
        config.quote_ttl_secs,
    ));
    let state = AppState {
        checkout,
        guard,
        ledger: Arc::new(LedgerService::new(stock_store.clone())),
        restock: Arc::new(RestockAdvisor::new(stock_store.clone())),
        coupons,
        coupon_store,
        stock_store,
        tracker: Arc::new(OrderTracker::new(order_store)),
        catalog,
        currency: config.currency.clone(),
    };

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "checkout-engine"})) }))
        .route("/api/v1/checkout/quote", post(quote))
        .route("/api/v1/checkout/commit", post(commit))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id/track", get(track_order))
        .route("/api/v1/orders/:id/ship", post(ship_order))
        .route("/api/v1/orders/:id/deliver", post(deliver_order))
        .route("/api/v1/orders/:id/refund", post(refund_order))
        .route("/api/v1/coupons", get(list_coupons).post(create_coupon))
        .route("/api/v1/coupons/:code", get(get_coupon).put(update_coupon).delete(deactivate_coupon))
        .route("/api/v1/coupons/:code/validate", post(validate_coupon))
        .route("/api/v1/stock/variants", get(list_variants).post(upsert_variant))
        .route("/api/v1/stock/movements", get(list_movements).post(record_movement))
        .route("/api/v1/stock/audit", get(audit_ledger))
        .route("/api/v1/stock/restock-report", get(restock_report))
        .route("/api/v1/catalog/prices", post(set_price))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state);

    tracing::info!("checkout-engine listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QuoteRequest { pub items: Vec<QuoteItemBody>, pub coupon_code: Option<String> }
#[derive(Debug, Deserialize)]
pub struct QuoteItemBody { pub variant_key: VariantKey, pub quantity: u32 }

async fn quote(State(s): State<AppState>, Json(r): Json<QuoteRequest>) -> Result<Json<Quote>, EngineError> {
    let items: Vec<QuoteItem> = r.items.into_iter().map(|i| QuoteItem { variant_key: i.variant_key, quantity: i.quantity }).collect();
    Ok(Json(s.checkout.quote(&items, r.coupon_code.as_deref()).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommitRequest {
    pub quote_token: Uuid,
    pub confirmation: PaymentConfirmation,
    pub shipping_address: Address,
    #[validate]
    pub contact: ContactBody,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ContactBody {
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
}

async fn commit(State(s): State<AppState>, Json(r): Json<CommitRequest>) -> Result<(StatusCode, Json<Order>), EngineError> {
    r.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
    let contact = Contact { email: r.contact.email, phone: r.contact.phone };
    let order = s.checkout.commit(r.quote_token, r.confirmation, r.shipping_address, contact).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

async fn list_orders(State(s): State<AppState>) -> Result<Json<Vec<Order>>, EngineError> {
    Ok(Json(s.checkout.orders().await?))
}

#[derive(Debug, Deserialize)]
pub struct TrackQuery { pub email: Option<String>, pub phone: Option<String> }

async fn track_order(State(s): State<AppState>, Path(id): Path<Uuid>, Query(q): Query<TrackQuery>) -> Result<Json<Order>, EngineError> {
    Ok(Json(s.tracker.find(id, q.email.as_deref(), q.phone.as_deref()).await?))
}

async fn ship_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Order>, EngineError> {
    Ok(Json(s.checkout.ship(id).await?))
}

async fn deliver_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Order>, EngineError> {
    Ok(Json(s.checkout.deliver(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest { #[serde(default)] pub restock: bool, pub actor: Option<String> }

async fn refund_order(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<RefundRequest>) -> Result<Json<Order>, EngineError> {
    let actor = r.actor.map(Actor::User).unwrap_or(Actor::System);
    Ok(Json(s.checkout.refund(id, r.restock, actor).await?))
}

// ---------------------------------------------------------------------------
// Coupons
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CouponBody {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    pub coupon_type: CouponType,
    pub value: Decimal,
    #[serde(default)]
    pub min_purchase_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub expires_at: DateTime<Utc>,
    #[validate(range(min = 1))]
    pub max_uses: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool { true }

impl CouponBody {
    fn into_coupon(self) -> Result<Coupon, EngineError> {
        self.validate().map_err(|e| EngineError::Validation(e.to_string()))?;
        match self.coupon_type {
            CouponType::Percentage => {
                if self.value <= Decimal::ZERO || self.value > Decimal::from(100) {
                    return Err(EngineError::Validation("percentage value must be in (0, 100]".into()));
                }
            }
            CouponType::FixedAmount => {
                if self.value <= Decimal::ZERO {
                    return Err(EngineError::Validation("fixed amount must be positive".into()));
                }
                if self.max_discount_amount.is_some() {
                    return Err(EngineError::Validation("max discount cap applies to percentage coupons only".into()));
                }
            }
        }
        if self.min_purchase_amount < Decimal::ZERO {
            return Err(EngineError::Validation("minimum purchase amount cannot be negative".into()));
        }
        if matches!(self.max_discount_amount, Some(cap) if cap <= Decimal::ZERO) {
            return Err(EngineError::Validation("max discount cap must be positive".into()));
        }
        let now = Utc::now();
        Ok(Coupon {
            code: Coupon::normalize_code(&self.code),
            coupon_type: self.coupon_type,
            value: self.value,
            min_purchase_amount: self.min_purchase_amount,
            max_discount_amount: self.max_discount_amount,
            expires_at: self.expires_at,
            max_uses: self.max_uses,
            used_count: 0,
            is_active: self.is_active,
            created_at: now,
            updated_at: now,
        })
    }
}

async fn list_coupons(State(s): State<AppState>) -> Result<Json<Vec<Coupon>>, EngineError> {
    Ok(Json(s.coupon_store.list().await?))
}

async fn create_coupon(State(s): State<AppState>, Json(r): Json<CouponBody>) -> Result<(StatusCode, Json<Coupon>), EngineError> {
    let coupon = s.coupon_store.create(r.into_coupon()?).await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

async fn get_coupon(State(s): State<AppState>, Path(code): Path<String>) -> Result<Json<Coupon>, EngineError> {
    s.coupon_store.get(&Coupon::normalize_code(&code)).await?.map(Json).ok_or(EngineError::CouponNotFound)
}

async fn update_coupon(State(s): State<AppState>, Path(code): Path<String>, Json(mut r): Json<CouponBody>) -> Result<Json<Coupon>, EngineError> {
    r.code = code;
    Ok(Json(s.coupon_store.update(r.into_coupon()?).await?))
}

async fn deactivate_coupon(State(s): State<AppState>, Path(code): Path<String>) -> Result<StatusCode, EngineError> {
    s.coupon_store.deactivate(&Coupon::normalize_code(&code)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest { pub cart_total: Decimal }

async fn validate_coupon(State(s): State<AppState>, Path(code): Path<String>, Json(r): Json<ValidateCouponRequest>) -> Result<Json<CouponQuote>, EngineError> {
    Ok(Json(s.coupons.validate(&code, &Money::new(r.cart_total, &s.currency)).await?))
}

// ---------------------------------------------------------------------------
// Stock
// ---------------------------------------------------------------------------

async fn list_variants(State(s): State<AppState>) -> Result<Json<Vec<StockVariant>>, EngineError> {
    Ok(Json(s.stock_store.variants().await?))
}

async fn upsert_variant(State(s): State<AppState>, Json(r): Json<VariantConfig>) -> Result<Json<StockVariant>, EngineError> {
    if matches!(r.low_stock_threshold, Some(t) if t < 0) {
        return Err(EngineError::Validation("low stock threshold cannot be negative".into()));
    }
    Ok(Json(s.stock_store.upsert_variant(r).await?))
}

#[derive(Debug, Deserialize)]
pub struct MovementRequestBody {
    pub variant_key: VariantKey,
    pub quantity: i64,
    pub movement_type: MovementType,
    pub reason: Option<String>,
    pub idempotency_key: String,
    pub actor: Option<String>,
}

async fn record_movement(State(s): State<AppState>, Json(r): Json<MovementRequestBody>) -> Result<(StatusCode, Json<StockMovement>), EngineError> {
    // Sales happen only through checkout commits.
    if r.movement_type == MovementType::Sale {
        return Err(EngineError::Validation("sale movements are created by checkout, not the admin surface".into()));
    }
    let actor = r.actor.map(Actor::User).unwrap_or(Actor::System);
    let movement = s.guard.reserve_and_commit(&r.variant_key, r.quantity, r.movement_type, r.reason, actor, &r.idempotency_key).await?;
    Ok((StatusCode::CREATED, Json(movement)))
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery { pub key: VariantKey }

async fn list_movements(State(s): State<AppState>, Query(q): Query<KeyQuery>) -> Result<Json<Vec<StockMovement>>, EngineError> {
    Ok(Json(s.ledger.movements(&q.key).await?))
}

async fn audit_ledger(State(s): State<AppState>, Query(q): Query<KeyQuery>) -> Result<Json<LedgerAudit>, EngineError> {
    Ok(Json(s.ledger.audit(&q.key).await?))
}

async fn restock_report(State(s): State<AppState>) -> Result<Json<Vec<StockAlert>>, EngineError> {
    Ok(Json(s.restock.report().await?))
}

// ---------------------------------------------------------------------------
// Catalog boundary
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PriceBody { pub variant_key: VariantKey, pub amount: Decimal }

async fn set_price(State(s): State<AppState>, Json(r): Json<PriceBody>) -> Result<StatusCode, EngineError> {
    if r.amount <= Decimal::ZERO {
        return Err(EngineError::Validation("price must be positive".into()));
    }
    s.catalog.set_price(r.variant_key, r.amount);
    Ok(StatusCode::NO_CONTENT)
}
