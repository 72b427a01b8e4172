//! # checkout-engine: Reservation & Settlement Services
//!
//! Owns every stock lock and every transaction boundary of the order path:
//! checkout holds stock, settlement converts or releases it, the sweeper
//! expires what nobody paid for.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine (cheap to clone)                        │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ CheckoutService│  │ Settlement     │  │ Fulfillment / Inventory│    │
//! │  │                │  │ Processor      │  │                        │    │
//! │  │ gate + holds,  │  │ signature,     │  │ paid → completed,      │    │
//! │  │ then charge    │  │ idempotency,   │  │ restock, availability  │    │
//! │  │                │  │ convert/release│  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          │                   │                       │                  │
//! │          └─────────┬─────────┴───────────┬───────────┘                  │
//! │                    ▼                     ▼                              │
//! │          ┌──────────────────┐  ┌──────────────────────┐                │
//! │          │ StockLocks       │  │ AvailabilityGate     │                │
//! │          │ (tenant, product)│  │ lock rows, then      │                │
//! │          │ sorted mutexes   │  │ stock - active holds │                │
//! │          └──────────────────┘  └──────────────────────┘                │
//! │                                                                         │
//! │  BACKGROUND TASKS (spawned by the binary):                             │
//! │  • ReservationSweeper - active → expired at expires_at <= now          │
//! │  • OutboxDispatcher   - outbox_events → EventPublisher                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lock Protocol
//! 1. `StockLocks::acquire` (ascending product ID)
//! 2. `Database::begin`
//! 3. `AvailabilityGate::lock_rows` as the first statement
//! 4. reads, checks, writes
//! 5. commit, then drop the guard
//!
//! Network calls and event dispatch never happen between 1 and 5.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use checkout_engine::{Engine, EngineConfig, LogPublisher};
//!
//! let engine = Engine::connect(EngineConfig::load(None)?).await?;
//! let sweeper = engine.spawn_sweeper();
//! let dispatcher = engine.spawn_dispatcher(Arc::new(LogPublisher));
//!
//! let receipt = engine.checkout(&cart).await?;
//! println!("Pay at {}", receipt.payment_redirect_url);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod checkout;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fulfillment;
pub mod gate;
pub mod gateway;
pub mod inventory;
pub mod locks;
pub mod outbox;
pub mod reservations;
pub mod settlement;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use checkout::{CheckoutReceipt, CheckoutService};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::EngineConfig;
pub use error::{ConfigError, EngineError, EngineResult, GatewayError, PublishError};
pub use fulfillment::FulfillmentService;
pub use gateway::{ChargeRequest, ChargeResponse, HttpPaymentGateway, PaymentGateway};
pub use inventory::{Availability, InventoryService};
pub use locks::{StockGuard, StockLocks};
pub use outbox::{EventPublisher, LogPublisher, OutboxDispatcher, OutboxDispatcherHandle};
pub use settlement::{SettlementOutcome, SettlementProcessor};
pub use sweeper::{ReservationSweeper, SweeperHandle};

use std::sync::Arc;
use tracing::info;

use checkout_core::{CoreError, Order, OrderDetails, OrderStatus};
use checkout_db::Database;

// =============================================================================
// Engine
// =============================================================================

/// Every service wired over one database, one lock registry and one clock.
#[derive(Clone)]
pub struct Engine {
    db: Database,
    config: Arc<EngineConfig>,
    clock: SharedClock,
    locks: StockLocks,
    checkout: CheckoutService,
    settlement: SettlementProcessor,
    fulfillment: FulfillmentService,
    inventory: InventoryService,
}

impl Engine {
    pub fn new(db: Database, config: EngineConfig, gateway: Arc<dyn PaymentGateway>, clock: SharedClock) -> Self {
        let locks = StockLocks::new();

        Engine {
            checkout: CheckoutService::new(
                db.clone(),
                locks.clone(),
                clock.clone(),
                gateway,
                config.reservation_ttl(),
            ),
            settlement: SettlementProcessor::new(
                db.clone(),
                locks.clone(),
                clock.clone(),
                config.payment.server_key.clone(),
            ),
            fulfillment: FulfillmentService::new(db.clone(), clock.clone()),
            inventory: InventoryService::new(db.clone(), locks.clone(), clock.clone()),
            db,
            config: Arc::new(config),
            clock,
            locks,
        }
    }

    /// Opens the database and the HTTP payment gateway described by `config`.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        let gateway = HttpPaymentGateway::new(&config.payment)
            .map_err(|e| ConfigError::Invalid(format!("payment gateway: {e}")))?;

        info!(
            ttl_secs = config.reservation.ttl_secs,
            gateway = %config.payment.base_url,
            "Checkout engine ready"
        );
        Ok(Engine::new(db, config, Arc::new(gateway), Arc::new(SystemClock)))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn inventory(&self) -> &InventoryService {
        &self.inventory
    }

    pub async fn checkout(&self, cart: &checkout_core::Cart) -> EngineResult<CheckoutReceipt> {
        self.checkout.checkout(cart).await
    }

    pub async fn handle_notification(&self, body: &[u8]) -> EngineResult<SettlementOutcome> {
        self.settlement.handle_notification(body).await
    }

    pub async fn complete_order(&self, reference: &str) -> EngineResult<OrderStatus> {
        self.fulfillment.complete_order(reference).await
    }

    /// Order with its items, holds and payment records.
    pub async fn order_details(&self, reference: &str) -> EngineResult<OrderDetails> {
        let order = self
            .db
            .orders()
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(reference.to_string()))?;

        Ok(OrderDetails {
            items: self.db.orders().items(&order.id).await?,
            reservations: self.db.reservations().for_order(&order.id).await?,
            payments: self.db.payments().for_order(&order.id).await?,
            order,
        })
    }

    /// Starts the reservation sweeper on the current runtime.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let (sweeper, handle) = ReservationSweeper::new(
            self.db.clone(),
            self.clock.clone(),
            self.locks.clone(),
            self.config.sweeper.clone(),
        );
        tokio::spawn(sweeper.run());
        handle
    }

    /// Starts the outbox dispatcher on the current runtime.
    pub fn spawn_dispatcher(&self, publisher: Arc<dyn EventPublisher>) -> OutboxDispatcherHandle {
        let (dispatcher, handle) = OutboxDispatcher::new(
            self.db.clone(),
            self.clock.clone(),
            publisher,
            self.config.outbox.clone(),
        );
        tokio::spawn(dispatcher.run());
        handle
    }

    /// Orders flagged by settlement for manual reconciliation.
    pub async fn orders_needing_reconciliation(&self, tenant_id: &str) -> EngineResult<Vec<Order>> {
        Ok(self.db.orders().needing_reconciliation(tenant_id).await?)
    }

    pub async fn health_check(&self) -> bool {
        self.db.health_check().await
    }

    /// `(known, applied)` schema migrations.
    pub async fn migration_status(&self) -> EngineResult<(usize, usize)> {
        Ok(checkout_db::migrations::migration_status(self.db.pool()).await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
