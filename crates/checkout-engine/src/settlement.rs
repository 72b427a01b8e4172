//! # Payment Settlement Processor
//!
//! Applies payment provider notifications to orders, holds and stock.
//!
//! ## Notification Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  raw body                                                               │
//! │     │  parse                       ──► MalformedNotification / 400     │
//! │     │  verify SHA-512 signature    ──► InvalidSignature / 403          │
//! │     ▼                                                                   │
//! │  ─────────────── verified: everything below acknowledges ───────────── │
//! │     │  lookup order by reference   ──► UnknownOrder                    │
//! │     │  acquire stock locks, BEGIN, touch product rows                  │
//! │     │  claim idempotency key       ──► Duplicate                       │
//! │     │  parse gross_amount          ──► unreadable: Flagged             │
//! │     │  upsert payment transaction                                      │
//! │     │  amount == order total?      ──► no: Flagged                     │
//! │     │                                                                   │
//! │     ├── Convert  pending  → convert holds (+ re-validate expired) → paid│
//! │     ├── Release  pending  → release holds → cancelled                   │
//! │     │            paid     → cancelled + flag                            │
//! │     └── Hold     record only                                            │
//! │     │                                                                   │
//! │     │  COMMIT, drop locks, enqueue events                               │
//! │     ▼                                                                   │
//! │  any storage failure: log reconciliation_required, flag, Recovered     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The idempotency claim and the state change share one transaction, so a
//! failed attempt leaves the key unclaimed and the provider's redelivery is
//! processed from scratch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, error, info, warn};

use checkout_core::notification::{PaymentNotification, SettlementAction};
use checkout_core::{CartLine, CoreError, Order, OrderStatus, PaymentTransaction, ReservationStatus};
use checkout_db::{Database, OrderRepository, PaymentRepository, ReservationRepository};

use crate::clock::SharedClock;
use crate::error::{EngineError, EngineResult};
use crate::events::{self, PendingEvent, ORDER_CANCELLED, ORDER_PAID, ORDER_RECONCILIATION_REQUIRED};
use crate::gate::AvailabilityGate;
use crate::locks::{StockGuard, StockLocks};
use crate::reservations::ReservationManager;

/// What a verified notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// The order moved to this status.
    Applied(OrderStatus),
    /// The order was already in the status this notification asks for.
    AlreadyApplied(OrderStatus),
    /// Recorded without any order change (pending, challenge, ...).
    Recorded,
    /// Recorded and flagged for reconciliation.
    Flagged,
    /// Same delivery seen before.
    Duplicate,
    UnknownOrder,
    /// Processing failed after verification; logged and flagged.
    Recovered,
}

impl SettlementOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SettlementOutcome::Applied(_) => "applied",
            SettlementOutcome::AlreadyApplied(_) => "already_applied",
            SettlementOutcome::Recorded => "recorded",
            SettlementOutcome::Flagged => "flagged",
            SettlementOutcome::Duplicate => "duplicate",
            SettlementOutcome::UnknownOrder => "unknown_order",
            SettlementOutcome::Recovered => "recovered",
        }
    }
}

/// Per-notification state threaded through the transaction.
struct Settling<'a> {
    notification: &'a PaymentNotification,
    order: Order,
    now: DateTime<Utc>,
    events: Vec<PendingEvent>,
}

impl Settling<'_> {
    fn emit(&mut self, event_type: &'static str, status: OrderStatus) {
        self.events.push(
            PendingEvent::for_order(event_type, &self.order, status)
                .with_transaction(&self.notification.transaction_id),
        );
    }

    async fn flag(&mut self, conn: &mut SqliteConnection, note: String) -> EngineResult<SettlementOutcome> {
        warn!(
            order_id = %self.order.id,
            reference = %self.order.reference,
            transaction_id = %self.notification.transaction_id,
            note = %note,
            "Order flagged for reconciliation"
        );
        OrderRepository::flag_reconciliation_in(conn, &self.order.id, &note, self.now).await?;
        self.events.push(
            PendingEvent::for_order(ORDER_RECONCILIATION_REQUIRED, &self.order, self.order.status)
                .with_transaction(&self.notification.transaction_id)
                .with_note(&note),
        );
        Ok(SettlementOutcome::Flagged)
    }

    /// CAS from the status read in this transaction to `next`.
    async fn transition(&mut self, conn: &mut SqliteConnection, next: OrderStatus) -> EngineResult<()> {
        let from = self.order.status;
        let next = from.transition_to(next)?;
        if !OrderRepository::update_status_in(conn, &self.order.id, from, next, self.now).await? {
            return Err(EngineError::ConcurrentModification { order_id: self.order.id.clone() });
        }
        info!(
            order_id = %self.order.id,
            reference = %self.order.reference,
            transaction_id = %self.notification.transaction_id,
            %from,
            to = %next,
            "Order status changed"
        );
        self.order.status = next;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SettlementProcessor {
    db: Database,
    locks: StockLocks,
    clock: SharedClock,
    server_key: String,
}

impl SettlementProcessor {
    pub fn new(db: Database, locks: StockLocks, clock: SharedClock, server_key: impl Into<String>) -> Self {
        SettlementProcessor { db, locks, clock, server_key: server_key.into() }
    }

    /// Handles one raw notification body.
    ///
    /// ## Errors
    /// Only parse and signature failures are returned (`MalformedNotification`,
    /// `InvalidSignature`); nothing has been written when they are. The
    /// signature covers the raw `gross_amount` string, so the amount is only
    /// decoded once the sender is trusted. Every later failure is absorbed
    /// into [`SettlementOutcome::Recovered`].
    pub async fn handle_notification(&self, body: &[u8]) -> EngineResult<SettlementOutcome> {
        let notification = PaymentNotification::parse(body)?;

        if let Err(e) = notification.verify_signature(&self.server_key) {
            warn!(
                reference = %notification.order_id,
                transaction_id = %notification.transaction_id,
                "Notification signature mismatch"
            );
            return Err(e.into());
        }

        debug!(
            reference = %notification.order_id,
            transaction_id = %notification.transaction_id,
            transaction_status = %notification.transaction_status,
            "Notification verified"
        );

        match self.settle(&notification, body).await {
            Ok(outcome) => {
                info!(
                    reference = %notification.order_id,
                    transaction_id = %notification.transaction_id,
                    transaction_status = %notification.transaction_status,
                    outcome = outcome.as_str(),
                    "Notification processed"
                );
                Ok(outcome)
            }
            Err(e) => Ok(self.recover(&notification, e).await),
        }
    }

    async fn settle(&self, notification: &PaymentNotification, body: &[u8]) -> EngineResult<SettlementOutcome> {
        let Some(order) = self.db.orders().get_by_reference(&notification.order_id).await? else {
            warn!(
                reference = %notification.order_id,
                transaction_id = %notification.transaction_id,
                "Notification for unknown order acknowledged"
            );
            return Ok(SettlementOutcome::UnknownOrder);
        };
        let items = self.db.orders().items(&order.id).await?;

        let guard = self
            .locks
            .acquire(&order.tenant_id, items.iter().map(|i| i.product_id.clone()))
            .await;
        let mut tx = self.db.begin().await?;
        AvailabilityGate::lock_rows(&mut tx, &guard).await?;

        let now = self.clock.now();
        let key = notification.idempotency_key();
        let claimed = PaymentRepository::claim_notification_in(
            &mut tx,
            &key,
            &notification.transaction_id,
            &notification.transaction_status,
            now,
        )
        .await?;
        if !claimed {
            debug!(idempotency_key = %key, "Duplicate notification");
            return Ok(SettlementOutcome::Duplicate);
        }

        // Re-read under the locks; the pool read above may be stale
        let order = OrderRepository::get_by_id_in(&mut tx, &order.id)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order.id.clone()))?;

        let mut settling = Settling { notification, order, now, events: Vec::new() };

        // Signed but unreadable: acknowledge and leave it to reconciliation
        let gross_amount = match notification.gross_amount() {
            Ok(amount) => amount,
            Err(e) => {
                let note = format!(
                    "unreadable gross_amount {:?} on {}: {e}",
                    notification.gross_amount, notification.transaction_id
                );
                let outcome = settling.flag(&mut tx, note).await?;
                tx.commit().await?;
                drop(guard);
                events::enqueue_all(&self.db, &settling.events, now).await;
                return Ok(outcome);
            }
        };

        let action = notification.action();
        let record = PaymentTransaction {
            transaction_id: notification.transaction_id.clone(),
            order_id: settling.order.id.clone(),
            idempotency_key: key,
            transaction_status: notification.transaction_status.clone(),
            payment_type: notification.payment_type.clone(),
            signature_verified: true,
            amount_cents: gross_amount.cents(),
            redirect_url: None,
            notification_payload: Some(String::from_utf8_lossy(body).into_owned()),
            notification_received_at: Some(now),
            settled_at: (action == SettlementAction::Convert).then_some(now),
            created_at: now,
            updated_at: now,
        };
        PaymentRepository::upsert_notification_in(&mut tx, &record).await?;

        let outcome = if gross_amount != settling.order.total() {
            let note = format!(
                "amount mismatch on {}: notified {}, order total {}",
                notification.transaction_id,
                gross_amount,
                settling.order.total()
            );
            settling.flag(&mut tx, note).await?
        } else {
            match action {
                SettlementAction::Convert => Self::apply_convert(&mut tx, &guard, &mut settling).await?,
                SettlementAction::Release => Self::apply_release(&mut tx, &mut settling).await?,
                SettlementAction::Hold => SettlementOutcome::Recorded,
            }
        };

        tx.commit().await?;
        drop(guard);

        events::enqueue_all(&self.db, &settling.events, now).await;
        Ok(outcome)
    }

    async fn apply_convert(
        conn: &mut SqliteConnection,
        guard: &StockGuard,
        settling: &mut Settling<'_>,
    ) -> EngineResult<SettlementOutcome> {
        match settling.order.status {
            status @ (OrderStatus::Paid | OrderStatus::Completed) => Ok(SettlementOutcome::AlreadyApplied(status)),
            OrderStatus::Cancelled => {
                let note = format!("payment {} settled for a cancelled order", settling.notification.transaction_id);
                settling.flag(conn, note).await
            }
            OrderStatus::Pending => {
                let order_id = settling.order.id.clone();

                // Holds the sweeper expired must fit into what is free now
                let expired: Vec<CartLine> = ReservationRepository::for_order_in(conn, &order_id)
                    .await?
                    .into_iter()
                    .filter(|h| h.status == ReservationStatus::Expired)
                    .map(|h| CartLine { product_id: h.product_id, quantity: h.quantity })
                    .collect();

                if !expired.is_empty() {
                    match AvailabilityGate::check_available(conn, guard, &expired).await {
                        Ok(_) => {}
                        Err(EngineError::Domain(CoreError::InsufficientStock { product_id, available, requested })) => {
                            let note = format!(
                                "paid after reservation expiry; {product_id} has {available} available, {requested} needed"
                            );
                            return settling.flag(conn, note).await;
                        }
                        Err(e) => return Err(e),
                    }
                }

                ReservationManager::convert(conn, guard, &order_id, settling.now).await?;
                ReservationManager::reinstate_expired(conn, guard, &order_id, settling.now).await?;
                settling.transition(conn, OrderStatus::Paid).await?;
                settling.emit(ORDER_PAID, OrderStatus::Paid);
                Ok(SettlementOutcome::Applied(OrderStatus::Paid))
            }
        }
    }

    async fn apply_release(
        conn: &mut SqliteConnection,
        settling: &mut Settling<'_>,
    ) -> EngineResult<SettlementOutcome> {
        match settling.order.status {
            OrderStatus::Cancelled => Ok(SettlementOutcome::AlreadyApplied(OrderStatus::Cancelled)),
            OrderStatus::Pending => {
                ReservationManager::release(conn, &settling.order.id, settling.now).await?;
                settling.transition(conn, OrderStatus::Cancelled).await?;
                settling.emit(ORDER_CANCELLED, OrderStatus::Cancelled);
                Ok(SettlementOutcome::Applied(OrderStatus::Cancelled))
            }
            OrderStatus::Paid => {
                // Converted stock is not put back automatically
                settling.transition(conn, OrderStatus::Cancelled).await?;
                settling.emit(ORDER_CANCELLED, OrderStatus::Cancelled);
                let note = format!(
                    "payment {} {} after the order was paid; stock not restored",
                    settling.notification.transaction_id, settling.notification.transaction_status
                );
                settling.flag(conn, note).await?;
                Ok(SettlementOutcome::Applied(OrderStatus::Cancelled))
            }
            OrderStatus::Completed => {
                error!(
                    order_id = %settling.order.id,
                    transaction_id = %settling.notification.transaction_id,
                    transaction_status = %settling.notification.transaction_status,
                    "Payment reversed for a completed order"
                );
                let note = format!(
                    "payment {} {} after the order was completed",
                    settling.notification.transaction_id, settling.notification.transaction_status
                );
                settling.flag(conn, note).await
            }
        }
    }

    /// Logs a post-verification failure and flags the order if it can be found.
    async fn recover(&self, notification: &PaymentNotification, err: EngineError) -> SettlementOutcome {
        error!(
            reference = %notification.order_id,
            transaction_id = %notification.transaction_id,
            transaction_status = %notification.transaction_status,
            error = %err,
            reconciliation_required = true,
            "Settlement failed after verification"
        );

        let note = format!("settlement of {} failed: {}", notification.transaction_id, err);
        match self.db.orders().get_by_reference(&notification.order_id).await {
            Ok(Some(order)) => {
                if let Err(e) = self.db.orders().flag_reconciliation(&order.id, &note, self.clock.now()).await {
                    error!(order_id = %order.id, error = %e, "Failed to flag order for reconciliation");
                }
            }
            Ok(None) => {}
            Err(e) => error!(reference = %notification.order_id, error = %e, "Failed to load order for flagging"),
        }

        SettlementOutcome::Recovered
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use checkout_core::Money;
    use crate::testing::{
        cart, engine_parts, file_db, notification, notification_with_key, seeded_db, FakeGateway, Services,
    };
    use std::sync::Arc;

    fn amount(cents: i64) -> String {
        Money::from_cents(cents).to_decimal_string()
    }

    /// Checks out `qty` of p-1 and returns (services, reference, total_cents).
    async fn checked_out(db: &Database, qty: i64) -> (Services, String, i64) {
        let services = engine_parts(db, Arc::new(FakeGateway::default()));
        let receipt = services.checkout.checkout(&cart(&[("p-1", qty)])).await.unwrap();
        (services, receipt.order_reference, receipt.total_cents)
    }

    async fn order(db: &Database, reference: &str) -> Order {
        db.orders().get_by_reference(reference).await.unwrap().unwrap()
    }

    async fn stock(db: &Database, product_id: &str) -> i64 {
        db.products().get("tenant-1", product_id).await.unwrap().unwrap().stock_quantity
    }

    #[tokio::test]
    async fn test_settlement_converts_holds_and_marks_paid() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;

        let body = notification(&reference, &format!("tx-{reference}"), "settlement", &amount(total));
        let outcome = s.settlement.handle_notification(&body).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Applied(OrderStatus::Paid));

        let paid = order(&db, &reference).await;
        assert_eq!(paid.status, OrderStatus::Paid);
        assert!(paid.paid_at.is_some());
        assert!(!paid.needs_reconciliation);

        let holds = db.reservations().for_order(&paid.id).await.unwrap();
        assert!(holds.iter().all(|h| h.status == ReservationStatus::Converted));
        assert_eq!(stock(&db, "p-1").await, 3);
        assert_eq!(db.products().active_reserved("p-1").await.unwrap(), 0);

        let record = db.payments().get(&format!("tx-{reference}")).await.unwrap().unwrap();
        assert_eq!(record.transaction_status, "settlement");
        assert!(record.signature_verified);
        assert!(record.settled_at.is_some());
        assert!(record.notification_payload.is_some());
        // Created at checkout, updated by the notification
        assert_eq!(record.idempotency_key, format!("charge:{reference}"));
        assert_eq!(db.outbox().count_by_type(ORDER_PAID).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replayed_notification_applies_once() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;
        let tx_id = format!("tx-{reference}");

        let body = notification(&reference, &tx_id, "settlement", &amount(total));
        assert_eq!(
            s.settlement.handle_notification(&body).await.unwrap(),
            SettlementOutcome::Applied(OrderStatus::Paid)
        );
        assert_eq!(s.settlement.handle_notification(&body).await.unwrap(), SettlementOutcome::Duplicate);
        assert_eq!(s.settlement.handle_notification(&body).await.unwrap(), SettlementOutcome::Duplicate);

        // A different status for the same transaction is a new key, but not a new payment
        let capture = notification(&reference, &tx_id, "capture", &amount(total));
        assert_eq!(
            s.settlement.handle_notification(&capture).await.unwrap(),
            SettlementOutcome::AlreadyApplied(OrderStatus::Paid)
        );

        assert_eq!(stock(&db, "p-1").await, 3);
        assert_eq!(db.payments().processed_count(&tx_id).await.unwrap(), 2);
        assert_eq!(db.outbox().count_by_type(ORDER_PAID).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deliveries_decrement_once() {
        let db = file_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;
        let body = notification(&reference, &format!("tx-{reference}"), "settlement", &amount(total));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let settlement = s.settlement.clone();
                let body = body.clone();
                tokio::spawn(async move { settlement.handle_notification(&body).await.unwrap() })
            })
            .collect();

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }

        assert_eq!(
            outcomes.iter().filter(|o| **o == SettlementOutcome::Applied(OrderStatus::Paid)).count(),
            1
        );
        assert_eq!(outcomes.iter().filter(|o| **o == SettlementOutcome::Duplicate).count(), 9);
        assert_eq!(stock(&db, "p-1").await, 3);
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;
        let tx_id = format!("tx-{reference}");

        let forged = notification_with_key(&reference, &tx_id, "settlement", &amount(total), "wrong-key");
        let err = s.settlement.handle_notification(&forged).await.unwrap_err();
        assert!(matches!(err, EngineError::Domain(CoreError::InvalidSignature)));

        assert_eq!(order(&db, &reference).await.status, OrderStatus::Pending);
        assert_eq!(db.payments().processed_count(&tx_id).await.unwrap(), 0);
        assert_eq!(db.payments().get(&tx_id).await.unwrap().unwrap().transaction_status, "pending");
        assert_eq!(stock(&db, "p-1").await, 5);
    }

    #[tokio::test]
    async fn test_unparseable_bodies_are_rejected() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let s = engine_parts(&db, Arc::new(FakeGateway::default()));

        let err = s.settlement.handle_notification(b"{not json").await.unwrap_err();
        assert!(matches!(err, EngineError::Domain(CoreError::MalformedNotification { .. })));
    }

    #[tokio::test]
    async fn test_signature_is_checked_before_the_amount() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, _) = checked_out(&db, 1).await;
        let tx_id = format!("tx-{reference}");

        let forged = notification_with_key(&reference, &tx_id, "settlement", "10.000", "wrong-key");
        let err = s.settlement.handle_notification(&forged).await.unwrap_err();
        assert!(matches!(err, EngineError::Domain(CoreError::InvalidSignature)));
        assert!(!order(&db, &reference).await.needs_reconciliation);
    }

    #[tokio::test]
    async fn test_signed_unreadable_amount_is_flagged_and_acknowledged() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, _) = checked_out(&db, 1).await;
        let tx_id = format!("tx-{reference}");

        let body = notification(&reference, &tx_id, "settlement", "10.000");
        assert_eq!(s.settlement.handle_notification(&body).await.unwrap(), SettlementOutcome::Flagged);
        assert_eq!(s.settlement.handle_notification(&body).await.unwrap(), SettlementOutcome::Duplicate);

        let flagged = order(&db, &reference).await;
        assert_eq!(flagged.status, OrderStatus::Pending);
        assert!(flagged.needs_reconciliation);
        assert!(flagged.reconciliation_note.unwrap().contains("10.000"));
        assert_eq!(stock(&db, "p-1").await, 5);
        assert_eq!(db.payments().get(&tx_id).await.unwrap().unwrap().transaction_status, "pending");
    }

    #[tokio::test]
    async fn test_late_pending_keeps_settled_record() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;
        let tx_id = format!("tx-{reference}");

        let settled = notification(&reference, &tx_id, "settlement", &amount(total));
        assert_eq!(
            s.settlement.handle_notification(&settled).await.unwrap(),
            SettlementOutcome::Applied(OrderStatus::Paid)
        );
        let late = notification(&reference, &tx_id, "pending", &amount(total));
        assert_eq!(s.settlement.handle_notification(&late).await.unwrap(), SettlementOutcome::Recorded);

        assert_eq!(order(&db, &reference).await.status, OrderStatus::Paid);
        let record = db.payments().get(&tx_id).await.unwrap().unwrap();
        assert_eq!(record.transaction_status, "settlement");
        assert!(record.settled_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_order_is_acknowledged() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let s = engine_parts(&db, Arc::new(FakeGateway::default()));

        let body = notification("ORD-NOPE", "tx-1", "settlement", "10.00");
        assert_eq!(s.settlement.handle_notification(&body).await.unwrap(), SettlementOutcome::UnknownOrder);
    }

    #[tokio::test]
    async fn test_amount_mismatch_flags_without_transition() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;

        let body = notification(&reference, &format!("tx-{reference}"), "settlement", &amount(total - 1));
        assert_eq!(s.settlement.handle_notification(&body).await.unwrap(), SettlementOutcome::Flagged);

        let flagged = order(&db, &reference).await;
        assert_eq!(flagged.status, OrderStatus::Pending);
        assert!(flagged.needs_reconciliation);
        assert!(flagged.reconciliation_note.unwrap().contains("amount mismatch"));
        assert_eq!(stock(&db, "p-1").await, 5);
        assert_eq!(db.outbox().count_by_type(ORDER_RECONCILIATION_REQUIRED).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_status_is_recorded_only() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;
        let tx_id = format!("tx-{reference}");

        let body = notification(&reference, &tx_id, "pending", &amount(total));
        assert_eq!(s.settlement.handle_notification(&body).await.unwrap(), SettlementOutcome::Recorded);

        assert_eq!(order(&db, &reference).await.status, OrderStatus::Pending);
        assert_eq!(db.products().active_reserved("p-1").await.unwrap(), 2);
        assert_eq!(db.payments().processed_count(&tx_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failure_status_releases_and_cancels() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;

        let body = notification(&reference, &format!("tx-{reference}"), "expire", &amount(total));
        assert_eq!(
            s.settlement.handle_notification(&body).await.unwrap(),
            SettlementOutcome::Applied(OrderStatus::Cancelled)
        );

        let cancelled = order(&db, &reference).await;
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(db.products().active_reserved("p-1").await.unwrap(), 0);
        assert_eq!(stock(&db, "p-1").await, 5);
        assert_eq!(db.outbox().count_by_type(ORDER_CANCELLED).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_settlement_for_cancelled_order_is_flagged() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;
        let tx_id = format!("tx-{reference}");

        let cancel = notification(&reference, &tx_id, "cancel", &amount(total));
        s.settlement.handle_notification(&cancel).await.unwrap();

        let late = notification(&reference, &tx_id, "settlement", &amount(total));
        assert_eq!(s.settlement.handle_notification(&late).await.unwrap(), SettlementOutcome::Flagged);

        let flagged = order(&db, &reference).await;
        assert_eq!(flagged.status, OrderStatus::Cancelled);
        assert!(flagged.needs_reconciliation);
        assert_eq!(stock(&db, "p-1").await, 5);
    }

    #[tokio::test]
    async fn test_cancellation_of_paid_order_is_flagged() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;
        let tx_id = format!("tx-{reference}");

        s.settlement
            .handle_notification(&notification(&reference, &tx_id, "settlement", &amount(total)))
            .await
            .unwrap();
        let outcome = s
            .settlement
            .handle_notification(&notification(&reference, &tx_id, "cancel", &amount(total)))
            .await
            .unwrap();
        assert_eq!(outcome, SettlementOutcome::Applied(OrderStatus::Cancelled));

        let cancelled = order(&db, &reference).await;
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(cancelled.needs_reconciliation);
        assert!(cancelled.paid_at.is_some());
        // Converted stock stays decremented
        assert_eq!(stock(&db, "p-1").await, 3);
    }

    #[tokio::test]
    async fn test_settlement_after_expiry_reinstates_when_stock_remains() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;

        s.clock.advance(chrono::Duration::minutes(15));
        let expired = ReservationManager::release_expired(&db, s.clock.now(), 100).await.unwrap();
        assert_eq!(expired.len(), 1);

        let body = notification(&reference, &format!("tx-{reference}"), "settlement", &amount(total));
        assert_eq!(
            s.settlement.handle_notification(&body).await.unwrap(),
            SettlementOutcome::Applied(OrderStatus::Paid)
        );

        let paid = order(&db, &reference).await;
        assert!(!paid.needs_reconciliation);
        let holds = db.reservations().for_order(&paid.id).await.unwrap();
        assert_eq!(holds[0].status, ReservationStatus::Converted);
        assert_eq!(stock(&db, "p-1").await, 3);
    }

    #[tokio::test]
    async fn test_settlement_after_expiry_flags_when_stock_is_gone() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;

        s.clock.advance(chrono::Duration::minutes(16));
        ReservationManager::release_expired(&db, s.clock.now(), 100).await.unwrap();

        // Someone else takes what the expired hold freed
        let other = s.checkout.checkout(&cart(&[("p-1", 4)])).await.unwrap();

        let body = notification(&reference, &format!("tx-{reference}"), "settlement", &amount(total));
        assert_eq!(s.settlement.handle_notification(&body).await.unwrap(), SettlementOutcome::Flagged);

        let flagged = order(&db, &reference).await;
        assert_eq!(flagged.status, OrderStatus::Pending);
        assert!(flagged.needs_reconciliation);
        assert!(flagged.reconciliation_note.unwrap().contains("p-1"));
        let holds = db.reservations().for_order(&flagged.id).await.unwrap();
        assert_eq!(holds[0].status, ReservationStatus::Expired);

        // The other order's hold is untouched and stock never went below it
        assert_eq!(stock(&db, "p-1").await, 5);
        let other = order(&db, &other.order_reference).await;
        let other_holds = db.reservations().for_order(&other.id).await.unwrap();
        assert_eq!(other_holds[0].status, ReservationStatus::Active);
    }

    #[tokio::test]
    async fn test_storage_failure_after_verification_is_recovered() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (s, reference, total) = checked_out(&db, 2).await;

        // The product row disappears behind the engine's back
        sqlx::query("PRAGMA foreign_keys = OFF").execute(db.pool()).await.unwrap();
        sqlx::query("DELETE FROM products WHERE id = 'p-1'").execute(db.pool()).await.unwrap();

        let body = notification(&reference, &format!("tx-{reference}"), "settlement", &amount(total));
        assert_eq!(s.settlement.handle_notification(&body).await.unwrap(), SettlementOutcome::Recovered);

        let flagged = order(&db, &reference).await;
        assert_eq!(flagged.status, OrderStatus::Pending);
        assert!(flagged.needs_reconciliation);
        // Nothing was claimed, so a redelivery is processed again
        assert_eq!(db.payments().processed_count(&format!("tx-{reference}")).await.unwrap(), 0);
    }
}
