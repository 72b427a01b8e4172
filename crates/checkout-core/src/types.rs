//! # Domain Types
//!
//! Core domain types used throughout the checkout engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ProductStock   │   │     Order       │   │  Reservation    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id, tenant_id  │◄──│  reference      │──►│  order_id (FK)  │       │
//! │  │  stock_quantity │   │  status         │   │  product_id     │       │
//! │  │  price_cents    │   │  total_cents    │   │  status, expiry │       │
//! │  └─────────────────┘   └────────┬────────┘   └─────────────────┘       │
//! │                                 │                                       │
//! │                 ┌───────────────┴───────────────┐                       │
//! │                 ▼                               ▼                       │
//! │        ┌─────────────────┐           ┌──────────────────────┐          │
//! │        │   OrderItem     │           │ PaymentTransaction   │          │
//! │        │  price snapshot │           │ provider record      │          │
//! │        └─────────────────┘           └──────────────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Orders carry both:
//! - `id`: UUID v4 - immutable, used for database relations
//! - `reference`: human-readable, sent to the payment provider as its `order_id`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::order::OrderStatus;

// =============================================================================
// Product Stock
// =============================================================================

/// Authoritative stock row for one product of one tenant.
///
/// `stock_quantity` is signed: legacy backorders may have pushed it below
/// zero. It only changes while the product's row lock is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductStock {
    pub id: String,
    pub tenant_id: String,
    pub sku: String,
    pub name: String,
    pub stock_quantity: i64,
    pub price_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductStock {
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Cart
// =============================================================================

/// One requested line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i64,
}

/// A checkout request as it arrives from the storefront.
///
/// The delivery fee is computed upstream and arrives pre-computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub tenant_id: String,
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub delivery_fee_cents: i64,
}

/// A cart that passed [`crate::validation::sanitize_cart`].
///
/// Lines are merged by product, sorted by `product_id`, and every quantity is
/// within `1..=MAX_ITEM_QUANTITY`. The sort order is the lock order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCart {
    pub tenant_id: String,
    pub lines: Vec<CartLine>,
    pub delivery_fee: Money,
}

impl ValidatedCart {
    /// Product IDs in lock order.
    pub fn product_ids(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.product_id.clone()).collect()
    }
}

// =============================================================================
// Order
// =============================================================================

/// An order created by checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: String,
    pub tenant_id: String,
    pub reference: String,
    pub status: OrderStatus,
    pub subtotal_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
    pub payment_redirect_url: Option<String>,
    pub needs_reconciliation: bool,
    pub reconciliation_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Order Item
// =============================================================================

/// A line item of an order.
/// Uses snapshot pattern to freeze product data at checkout, under the lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub sku_snapshot: String,
    pub name_snapshot: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub total_price_cents: i64,
}

impl OrderItem {
    /// Builds an item from the locked product row.
    pub fn snapshot(order_id: &str, product: &ProductStock, quantity: i64) -> Self {
        let unit_price = product.price();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            product_id: product.id.clone(),
            sku_snapshot: product.sku.clone(),
            name_snapshot: product.name.clone(),
            quantity,
            unit_price_cents: unit_price.cents(),
            total_price_cents: unit_price.multiply_quantity(quantity).cents(),
        }
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// Status of a stock hold.
///
/// ```text
///            convert            release              sweep
/// active ──────────► converted  active ──► released  active ──► expired
///                                                        │
///                                      settlement re-validation
///                                                        ▼
///                                                    converted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Converted,
    Released,
    Expired,
}

impl ReservationStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Converted => "converted",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }
}

/// A time-bounded hold of stock for one (order, product) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Reservation {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
}

/// A hold flipped to `expired` by the sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ExpiredReservation {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: i64,
}

// =============================================================================
// Payment Transaction
// =============================================================================

/// Provider-side record of a charge, keyed by the provider's transaction ID.
///
/// Created when the charge is requested and updated (never replaced) by every
/// notification that follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PaymentTransaction {
    pub transaction_id: String,
    pub order_id: String,
    pub idempotency_key: String,
    pub transaction_status: String,
    pub payment_type: Option<String>,
    pub signature_verified: bool,
    pub amount_cents: i64,
    pub redirect_url: Option<String>,
    pub notification_payload: Option<String>,
    pub notification_received_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Outbox Event
// =============================================================================

/// A durable side effect waiting to be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OutboxEvent {
    pub id: i64,
    pub tenant_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    /// JSON payload.
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Read Models
// =============================================================================

/// Everything known about one order, for lookup endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub reservations: Vec<Reservation>,
    pub payments: Vec<PaymentTransaction>,
}

/// Builds a human-readable order reference: `ORD-YYYYMMDD-xxxxxxxx`.
///
/// The suffix is the first eight hex digits of a fresh UUID, upper-cased.
pub fn generate_order_reference(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "ORD-{}-{}",
        now.format("%Y%m%d"),
        suffix[..8].to_ascii_uppercase()
    )
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn product(price_cents: i64) -> ProductStock {
        let now = Utc::now();
        ProductStock {
            id: "prod-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            sku: "KOPI-250".to_string(),
            name: "Kopi Susu 250ml".to_string(),
            stock_quantity: 10,
            price_cents,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_item_snapshot_freezes_product_data() {
        let item = OrderItem::snapshot("order-1", &product(1850), 3);
        assert_eq!(item.order_id, "order-1");
        assert_eq!(item.sku_snapshot, "KOPI-250");
        assert_eq!(item.unit_price_cents, 1850);
        assert_eq!(item.total_price_cents, 5550);
    }

    #[test]
    fn test_order_reference_format() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let reference = generate_order_reference(now);
        assert!(reference.starts_with("ORD-20260309-"));
        assert_eq!(reference.len(), "ORD-20260309-".len() + 8);
        assert_ne!(reference, generate_order_reference(now));
    }

    #[test]
    fn test_reservation_status_serializes_lowercase() {
        let json = serde_json::to_string(&ReservationStatus::Expired).unwrap();
        assert_eq!(json, "\"expired\"");
    }
}
