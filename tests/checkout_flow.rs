//! End-to-end checkout flow against the in-memory store: configure stock and
//! prices, quote with a coupon, pay, commit, then read back through the
//! tracker and the ledger audit.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use checkout_engine::catalog::PriceTable;
use checkout_engine::domain::aggregates::{
    Actor, Address, Contact, Coupon, CouponType, MovementType, OrderStatus, VariantConfig,
};
use checkout_engine::domain::value_objects::VariantKey;
use checkout_engine::error::EngineError;
use checkout_engine::payment::{HmacVerifier, PaymentConfirmation, PaymentState};
use checkout_engine::publisher::EventPublisher;
use checkout_engine::services::{
    CheckoutOrchestrator, CouponEngine, LedgerService, OrderTracker, QuoteItem, RestockAdvisor,
    StockGuard,
};
use checkout_engine::store::{CouponStore, InMemoryStore, StockStore};

const SECRET: &str = "integration-secret";

struct Engine {
    store: Arc<InMemoryStore>,
    guard: Arc<StockGuard>,
    checkout: Arc<CheckoutOrchestrator>,
    tracker: OrderTracker,
    ledger: LedgerService,
    restock: RestockAdvisor,
    catalog: Arc<PriceTable>,
}

fn key(name: &str) -> VariantKey { name.parse().unwrap() }

async fn engine() -> Engine {
    let store = Arc::new(InMemoryStore::new());
    let catalog = Arc::new(PriceTable::new("USD"));
    let publisher = EventPublisher::disabled();
    let guard = Arc::new(StockGuard::new(store.clone(), publisher.clone(), 3));
    let coupons = Arc::new(CouponEngine::new(store.clone()));
    let checkout = Arc::new(CheckoutOrchestrator::new(
        guard.clone(),
        coupons,
        store.clone(),
        catalog.clone(),
        Arc::new(HmacVerifier::new(SECRET)),
        publisher,
        1800,
    ));
    Engine {
        tracker: OrderTracker::new(store.clone()),
        ledger: LedgerService::new(store.clone()),
        restock: RestockAdvisor::new(store.clone()),
        guard,
        checkout,
        store,
        catalog,
    }
}

async fn stock_variant(engine: &Engine, name: &str, initial: i64, price: Decimal) {
    engine
        .store
        .upsert_variant(VariantConfig {
            key: key(name),
            low_stock_threshold: Some(2),
            auto_restock_enabled: true,
            auto_restock_level: Some(10),
        })
        .await
        .unwrap();
    engine.catalog.set_price(key(name), price);
    engine
        .guard
        .reserve_and_commit(&key(name), initial, MovementType::Inbound, Some("initial receiving".into()), Actor::User("ops".into()), &format!("recv-{name}"))
        .await
        .unwrap();
}

fn paid(reference: &str, amount: Decimal) -> PaymentConfirmation {
    PaymentConfirmation {
        payment_reference: reference.into(),
        amount,
        currency: "USD".into(),
        state: PaymentState::Confirmed,
        signature: HmacVerifier::sign(SECRET, reference, amount, "USD", PaymentState::Confirmed),
    }
}

fn buyer() -> Contact {
    Contact { email: "jo@example.com".into(), phone: Some("+1 555 010 2030".into()) }
}

#[tokio::test]
async fn full_checkout_flow() {
    let engine = engine().await;
    stock_variant(&engine, "hoodie-7/L", 8, dec!(40)).await;
    stock_variant(&engine, "hoodie-7/M", 8, dec!(40)).await;

    let now = Utc::now();
    engine
        .store
        .create(Coupon {
            code: "WELCOME10".into(),
            coupon_type: CouponType::Percentage,
            value: dec!(10),
            min_purchase_amount: dec!(50),
            max_discount_amount: Some(dec!(20)),
            expires_at: now + Duration::days(30),
            max_uses: 100,
            used_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    // quote: 2xL + 1xM = 120, 10% = 12 discount, total 108
    let quote = engine
        .checkout
        .quote(
            &[
                QuoteItem { variant_key: key("hoodie-7/L"), quantity: 2 },
                QuoteItem { variant_key: key("hoodie-7/M"), quantity: 1 },
            ],
            Some("welcome10"),
        )
        .await
        .unwrap();
    assert_eq!(quote.subtotal.amount(), dec!(120));
    assert_eq!(quote.discount_amount.amount(), dec!(12));
    assert_eq!(quote.total.amount(), dec!(108));

    // quoting reserved nothing
    assert_eq!(engine.store.variant(&key("hoodie-7/L")).await.unwrap().unwrap().current_stock, 8);

    let order = engine
        .checkout
        .commit(quote.token, paid("pay_e2e", dec!(108)), Address::default(), buyer())
        .await
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(order.coupon_code(), Some("WELCOME10"));
    assert_eq!(engine.store.variant(&key("hoodie-7/L")).await.unwrap().unwrap().current_stock, 6);
    assert_eq!(engine.store.get("WELCOME10").await.unwrap().unwrap().used_count, 1);

    // tracker requires a matching credential
    let tracked = engine.tracker.find(order.id(), Some("jo@example.com"), None).await.unwrap();
    assert_eq!(tracked.id(), order.id());
    let err = engine.tracker.find(order.id(), Some("stranger@example.com"), None).await.unwrap_err();
    assert!(matches!(err, EngineError::UnauthorizedLookup));

    // ledger stayed consistent through the whole flow
    for name in ["hoodie-7/L", "hoodie-7/M"] {
        let audit = engine.ledger.audit(&key(name)).await.unwrap();
        assert!(audit.chain_intact);
        assert!(audit.counter_consistent);
    }
}

#[tokio::test]
async fn concurrent_checkouts_for_scarce_stock() {
    let engine = engine().await;
    stock_variant(&engine, "cap-3/onesize", 3, dec!(15)).await;

    // five buyers race for three caps, one each
    let mut quotes = Vec::new();
    for _ in 0..5 {
        quotes.push(
            engine
                .checkout
                .quote(&[QuoteItem { variant_key: key("cap-3/onesize"), quantity: 1 }], None)
                .await
                .unwrap(),
        );
    }

    let mut handles = Vec::new();
    for (i, quote) in quotes.into_iter().enumerate() {
        let checkout = engine.checkout.clone();
        handles.push(tokio::spawn(async move {
            checkout
                .commit(quote.token, paid(&format!("pay_{i}"), dec!(15)), Address::default(), buyer())
                .await
        }));
    }

    let mut created = 0;
    let mut sold_out = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(EngineError::StockUnavailable { .. }) => sold_out += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 3);
    assert_eq!(sold_out, 2);

    let variant = engine.store.variant(&key("cap-3/onesize")).await.unwrap().unwrap();
    assert_eq!(variant.current_stock, 0);

    // replay equals counter even after the race, and the chain is intact
    let audit = engine.ledger.audit(&key("cap-3/onesize")).await.unwrap();
    assert!(audit.chain_intact);
    assert!(audit.counter_consistent);
    assert_eq!(audit.derived_stock, 0);

    // the drained variant shows up in the restock report as out
    let report = engine.restock.report().await.unwrap();
    let alert = report.iter().find(|a| a.variant_key == key("cap-3/onesize")).unwrap();
    assert_eq!(alert.current_stock, 0);
    assert_eq!(alert.suggested_reorder, Some(10));
}

#[tokio::test]
async fn webhook_replay_does_not_duplicate_anything() {
    let engine = engine().await;
    stock_variant(&engine, "mug-9/std", 4, dec!(12)).await;

    let quote = engine
        .checkout
        .quote(&[QuoteItem { variant_key: key("mug-9/std"), quantity: 2 }], None)
        .await
        .unwrap();
    let confirmation = paid("pay_hook", dec!(24));

    let first = engine
        .checkout
        .commit(quote.token, confirmation.clone(), Address::default(), buyer())
        .await
        .unwrap();
    let second = engine
        .checkout
        .commit(quote.token, confirmation, Address::default(), buyer())
        .await
        .unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(engine.store.variant(&key("mug-9/std")).await.unwrap().unwrap().current_stock, 2);
    // receiving + exactly one sale
    assert_eq!(engine.store.movements(&key("mug-9/std")).await.unwrap().len(), 2);
}
