//! Shared fixtures for the engine's unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use checkout_core::notification::signature_for;
use checkout_core::{Cart, CartLine, Order, OrderItem, OrderStatus, ProductStock};
use checkout_db::{Database, DbConfig, OrderRepository};

use crate::checkout::CheckoutService;
use crate::clock::ManualClock;
use crate::error::GatewayError;
use crate::fulfillment::FulfillmentService;
use crate::gateway::{ChargeRequest, ChargeResponse, PaymentGateway};
use crate::inventory::InventoryService;
use crate::locks::StockLocks;
use crate::settlement::SettlementProcessor;

pub const TENANT: &str = "tenant-1";
pub const SERVER_KEY: &str = "test-server-key";

pub fn product(id: &str, stock: i64, price_cents: i64) -> ProductStock {
    let now = Utc::now();
    ProductStock {
        id: id.to_string(),
        tenant_id: TENANT.to_string(),
        sku: format!("SKU-{id}"),
        name: format!("Product {id}"),
        stock_quantity: stock,
        price_cents,
        created_at: now,
        updated_at: now,
    }
}

async fn seed(db: &Database, products: &[(&str, i64, i64)]) {
    for (id, stock, price) in products {
        db.products().insert(&product(id, *stock, *price)).await.unwrap();
    }
}

/// In-memory database with `(id, stock, price_cents)` products for `tenant-1`.
pub async fn seeded_db(products: &[(&str, i64, i64)]) -> Database {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    seed(&db, products).await;
    db
}

/// File-backed database with several pooled connections, so concurrent
/// tasks really do run their transactions side by side.
pub async fn file_db(products: &[(&str, i64, i64)]) -> Database {
    let path = std::env::temp_dir().join(format!("checkout-engine-{}.db", uuid::Uuid::new_v4()));
    let db = Database::new(DbConfig::new(path).max_connections(8)).await.unwrap();
    seed(&db, products).await;
    db
}

/// Inserts a pending order with items and no holds.
pub async fn pending_order(db: &Database, reference: &str, lines: &[(&str, i64)]) -> (Order, Vec<OrderItem>) {
    let now = Utc::now();
    let order_id = uuid::Uuid::new_v4().to_string();

    let mut items = Vec::new();
    for (product_id, qty) in lines {
        let p = db.products().get(TENANT, product_id).await.unwrap().unwrap();
        items.push(OrderItem::snapshot(&order_id, &p, *qty));
    }
    let subtotal: i64 = items.iter().map(|i| i.total_price_cents).sum();

    let order = Order {
        id: order_id,
        tenant_id: TENANT.to_string(),
        reference: reference.to_string(),
        status: OrderStatus::Pending,
        subtotal_cents: subtotal,
        delivery_fee_cents: 0,
        total_cents: subtotal,
        payment_redirect_url: None,
        needs_reconciliation: false,
        reconciliation_note: None,
        created_at: now,
        updated_at: now,
        paid_at: None,
        completed_at: None,
        cancelled_at: None,
    };

    let mut tx = db.begin().await.unwrap();
    OrderRepository::insert_in(&mut tx, &order).await.unwrap();
    for item in &items {
        OrderRepository::insert_item_in(&mut tx, item).await.unwrap();
    }
    tx.commit().await.unwrap();

    (order, items)
}

pub fn cart(lines: &[(&str, i64)]) -> Cart {
    Cart {
        tenant_id: TENANT.to_string(),
        items: lines
            .iter()
            .map(|(product_id, quantity)| CartLine { product_id: product_id.to_string(), quantity: *quantity })
            .collect(),
        delivery_fee_cents: 0,
    }
}

/// Signed notification body for `reference`.
pub fn notification(reference: &str, transaction_id: &str, status: &str, gross_amount: &str) -> Vec<u8> {
    notification_with_key(reference, transaction_id, status, gross_amount, SERVER_KEY)
}

pub fn notification_with_key(
    reference: &str,
    transaction_id: &str,
    status: &str,
    gross_amount: &str,
    key: &str,
) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "order_id": reference,
        "transaction_id": transaction_id,
        "transaction_status": status,
        "status_code": "200",
        "gross_amount": gross_amount,
        "payment_type": "bank_transfer",
        "signature_key": signature_for(reference, "200", gross_amount, key),
    }))
    .unwrap()
}

// =============================================================================
// Fake gateway
// =============================================================================

/// Answers every charge with `tx-{reference}` unless set to fail.
#[derive(Debug, Default)]
pub struct FakeGateway {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeGateway {
    pub fn failing() -> Self {
        FakeGateway { failing: AtomicBool::new(true), calls: AtomicUsize::new(0) }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::ServerError { status: 503, body: "maintenance".into() });
        }
        Ok(ChargeResponse {
            transaction_id: format!("tx-{}", request.order_reference),
            redirect_url: format!("https://pay.example/{}", request.order_reference),
            expires_at: None,
        })
    }
}

// =============================================================================
// Wired services
// =============================================================================

/// Every service over one database, sharing locks and a manual clock.
pub struct Services {
    pub checkout: CheckoutService,
    pub settlement: SettlementProcessor,
    pub fulfillment: FulfillmentService,
    pub inventory: InventoryService,
    pub clock: ManualClock,
}

pub fn engine_parts(db: &Database, gateway: Arc<dyn PaymentGateway>) -> Services {
    engine_parts_at(db, gateway, Utc::now())
}

pub fn engine_parts_at(db: &Database, gateway: Arc<dyn PaymentGateway>, start: DateTime<Utc>) -> Services {
    let locks = StockLocks::new();
    let clock = ManualClock::new(start);
    let shared: crate::clock::SharedClock = Arc::new(clock.clone());

    Services {
        checkout: CheckoutService::new(
            db.clone(),
            locks.clone(),
            shared.clone(),
            gateway,
            chrono::Duration::minutes(15),
        ),
        settlement: SettlementProcessor::new(db.clone(), locks.clone(), shared.clone(), SERVER_KEY),
        fulfillment: FulfillmentService::new(db.clone(), shared.clone()),
        inventory: InventoryService::new(db.clone(), locks, shared),
        clock,
    }
}
