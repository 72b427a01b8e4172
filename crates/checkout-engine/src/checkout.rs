//! # Checkout Orchestrator
//!
//! Turns a cart into a pending order with stock held, then asks the payment
//! provider for a charge.
//!
//! ## Two-Phase Checkout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  PHASE 1: one transaction, stock locks held                             │
//! │    sanitize cart ── acquire locks ── BEGIN                              │
//! │      ├── AvailabilityGate::check_and_lock   (InsufficientStock → abort) │
//! │      ├── INSERT order (pending) + items (price snapshot)                │
//! │      ├── INSERT holds (expires_at = now + ttl)                          │
//! │    COMMIT ── drop locks                                                 │
//! │                                                                         │
//! │  PHASE 2: no locks, no transaction                                      │
//! │    enqueue order.created                      (best effort)             │
//! │    gateway.create_charge()                                              │
//! │      ├── Ok  → record charge + redirect URL   (failure only logged)     │
//! │      └── Err → COMPENSATE: release holds + cancel order                 │
//! │               → PaymentUnavailable                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use checkout_core::validation::sanitize_cart;
use checkout_core::{
    generate_order_reference, Cart, Money, Order, OrderItem, OrderStatus, PaymentTransaction,
    ValidatedCart,
};
use checkout_db::{Database, OrderRepository};

use crate::clock::SharedClock;
use crate::error::{EngineError, EngineResult};
use crate::events::{self, PendingEvent, ORDER_CANCELLED, ORDER_CREATED};
use crate::gate::AvailabilityGate;
use crate::gateway::{ChargeRequest, ChargeResponse, PaymentGateway};
use crate::locks::StockLocks;
use crate::reservations::ReservationManager;

/// Note written on orders cancelled because no charge could be created.
pub const CHARGE_FAILED_NOTE: &str = "payment charge failed";

/// What the storefront gets back from a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub order_id: String,
    pub order_reference: String,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub payment_redirect_url: String,
    pub reservation_expires_at: DateTime<Utc>,
}

/// An order committed by phase 1.
#[derive(Debug, Clone)]
struct PlacedOrder {
    order: Order,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Database,
    locks: StockLocks,
    clock: SharedClock,
    gateway: Arc<dyn PaymentGateway>,
    ttl: chrono::Duration,
}

impl CheckoutService {
    pub fn new(
        db: Database,
        locks: StockLocks,
        clock: SharedClock,
        gateway: Arc<dyn PaymentGateway>,
        ttl: chrono::Duration,
    ) -> Self {
        CheckoutService { db, locks, clock, gateway, ttl }
    }

    /// Places an order for `cart` and creates its payment charge.
    ///
    /// ## Errors
    /// - `Domain(EmptyCart | Validation | CartTooLarge | QuantityTooLarge)`: bad cart
    /// - `Domain(ProductNotFound)`, `Domain(InsufficientStock)`: nothing was written
    /// - `PaymentUnavailable`: the order was created, then cancelled and its holds released
    pub async fn checkout(&self, cart: &Cart) -> EngineResult<CheckoutReceipt> {
        let cart = sanitize_cart(cart)?;
        let placed = self.place_order(&cart).await?;
        let order = &placed.order;

        events::enqueue_all(
            &self.db,
            &[PendingEvent::for_order(ORDER_CREATED, order, OrderStatus::Pending)],
            self.clock.now(),
        )
        .await;

        let request = ChargeRequest {
            order_reference: order.reference.clone(),
            gross_amount: order.total(),
            expiry_secs: self.ttl.num_seconds(),
        };

        let charge = match self.gateway.create_charge(&request).await {
            Ok(charge) => charge,
            Err(e) => {
                error!(
                    order_id = %order.id,
                    reference = %order.reference,
                    error = %e,
                    "Charge request failed, cancelling order"
                );
                self.compensate(order).await;
                return Err(EngineError::PaymentUnavailable(e));
            }
        };

        self.record_charge(order, &charge).await;

        info!(
            order_id = %order.id,
            reference = %order.reference,
            transaction_id = %charge.transaction_id,
            total = %order.total(),
            "Checkout complete"
        );

        Ok(CheckoutReceipt {
            order_id: order.id.clone(),
            order_reference: order.reference.clone(),
            status: order.status,
            total_cents: order.total_cents,
            payment_redirect_url: charge.redirect_url,
            reservation_expires_at: placed.expires_at,
        })
    }

    /// Phase 1: order, items and holds in one transaction under the stock locks.
    async fn place_order(&self, cart: &ValidatedCart) -> EngineResult<PlacedOrder> {
        let guard = self.locks.acquire(&cart.tenant_id, cart.product_ids()).await;
        let mut tx = self.db.begin().await?;

        let products = AvailabilityGate::check_and_lock(&mut tx, &guard, &cart.lines).await?;

        let now = self.clock.now();
        let order_id = Uuid::new_v4().to_string();
        let items: Vec<OrderItem> = products
            .iter()
            .zip(&cart.lines)
            .map(|(product, line)| OrderItem::snapshot(&order_id, product, line.quantity))
            .collect();

        let subtotal = items
            .iter()
            .fold(Money::zero(), |acc, item| acc + Money::from_cents(item.total_price_cents));
        let total = subtotal + cart.delivery_fee;

        let order = Order {
            id: order_id,
            tenant_id: cart.tenant_id.clone(),
            reference: generate_order_reference(now),
            status: OrderStatus::Pending,
            subtotal_cents: subtotal.cents(),
            delivery_fee_cents: cart.delivery_fee.cents(),
            total_cents: total.cents(),
            payment_redirect_url: None,
            needs_reconciliation: false,
            reconciliation_note: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            completed_at: None,
            cancelled_at: None,
        };

        OrderRepository::insert_in(&mut tx, &order).await?;
        for item in &items {
            OrderRepository::insert_item_in(&mut tx, item).await?;
        }
        let holds = ReservationManager::create(&mut tx, &order.id, &cart.lines, self.ttl, now).await?;

        tx.commit().await?;
        drop(guard);

        info!(
            order_id = %order.id,
            reference = %order.reference,
            items = items.len(),
            total = %total,
            "Order placed, stock held"
        );

        Ok(PlacedOrder {
            order,
            expires_at: holds.first().map(|h| h.expires_at).unwrap_or(now + self.ttl),
        })
    }

    /// Persists the charge record and redirect URL.
    ///
    /// Failures leave the order pending with its holds; the first
    /// notification upserts the record.
    async fn record_charge(&self, order: &Order, charge: &ChargeResponse) {
        let now = self.clock.now();
        let record = PaymentTransaction {
            transaction_id: charge.transaction_id.clone(),
            order_id: order.id.clone(),
            idempotency_key: format!("charge:{}", order.reference),
            transaction_status: "pending".to_string(),
            payment_type: None,
            signature_verified: false,
            amount_cents: order.total_cents,
            redirect_url: Some(charge.redirect_url.clone()),
            notification_payload: None,
            notification_received_at: None,
            settled_at: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.db.payments().insert_charge(&record).await {
            error!(
                order_id = %order.id,
                transaction_id = %charge.transaction_id,
                error = %e,
                "Failed to record charge"
            );
        }
        if let Err(e) = self.db.orders().set_redirect_url(&order.id, &charge.redirect_url, now).await {
            warn!(order_id = %order.id, error = %e, "Failed to store redirect URL");
        }
    }

    /// Releases the holds and cancels the order after a failed charge.
    async fn compensate(&self, order: &Order) {
        match self.cancel_unpaid(order).await {
            Ok(()) => {
                events::enqueue_all(
                    &self.db,
                    &[PendingEvent::for_order(ORDER_CANCELLED, order, OrderStatus::Cancelled)
                        .with_note(CHARGE_FAILED_NOTE)],
                    self.clock.now(),
                )
                .await;
            }
            // The holds still expire through the sweeper
            Err(e) => error!(
                order_id = %order.id,
                reference = %order.reference,
                error = %e,
                reconciliation_required = true,
                "Compensation after charge failure failed"
            ),
        }
    }

    async fn cancel_unpaid(&self, order: &Order) -> EngineResult<()> {
        let mut tx = self.db.begin().await?;
        let now = self.clock.now();

        let next = order.status.transition_to(OrderStatus::Cancelled)?;
        if !OrderRepository::update_status_in(&mut tx, &order.id, order.status, next, now).await? {
            return Err(EngineError::ConcurrentModification { order_id: order.id.clone() });
        }
        ReservationManager::release(&mut tx, &order.id, now).await?;
        OrderRepository::annotate_in(&mut tx, &order.id, CHARGE_FAILED_NOTE, now).await?;

        tx.commit().await?;
        Ok(())
    }
}
