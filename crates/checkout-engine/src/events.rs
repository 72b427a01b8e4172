//! Outbox event types and the best-effort enqueue used after commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use checkout_core::{ExpiredReservation, Order, OrderStatus};
use checkout_db::Database;

pub const ORDER_CREATED: &str = "order.created";
pub const ORDER_PAID: &str = "order.paid";
pub const ORDER_CANCELLED: &str = "order.cancelled";
pub const ORDER_COMPLETED: &str = "order.completed";
pub const ORDER_RECONCILIATION_REQUIRED: &str = "order.reconciliation_required";
pub const RESERVATIONS_EXPIRED: &str = "reservations.expired";

/// Tenant recorded on events that span tenants (sweeper batches).
pub const ALL_TENANTS: &str = "*";

/// Payload of every `order.*` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEventPayload {
    pub order_id: String,
    pub reference: String,
    pub status: OrderStatus,
    pub total_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Payload of `reservations.expired`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredBatchPayload {
    pub batch_id: String,
    pub reservations: Vec<ExpiredReservation>,
}

/// An event decided inside a transaction, enqueued after it commits.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub tenant_id: String,
    pub event_type: &'static str,
    pub aggregate_id: String,
    pub payload: OrderEventPayload,
}

impl PendingEvent {
    /// Order event carrying the order's state as of `status`.
    pub fn for_order(event_type: &'static str, order: &Order, status: OrderStatus) -> Self {
        PendingEvent {
            tenant_id: order.tenant_id.clone(),
            event_type,
            aggregate_id: order.id.clone(),
            payload: OrderEventPayload {
                order_id: order.id.clone(),
                reference: order.reference.clone(),
                status,
                total_cents: order.total_cents,
                transaction_id: None,
                note: None,
            },
        }
    }

    pub fn with_transaction(mut self, transaction_id: &str) -> Self {
        self.payload.transaction_id = Some(transaction_id.to_string());
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.payload.note = Some(note.to_string());
        self
    }
}

/// Enqueues committed events. Failures are logged and never propagated:
/// the state change they describe is already durable.
pub async fn enqueue_all(db: &Database, events: &[PendingEvent], now: DateTime<Utc>) {
    for event in events {
        if let Err(e) = db
            .outbox()
            .enqueue(&event.tenant_id, event.event_type, &event.aggregate_id, &event.payload, now)
            .await
        {
            warn!(
                error = %e,
                event_type = event.event_type,
                aggregate_id = %event.aggregate_id,
                "Failed to enqueue outbox event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pending_order, seeded_db};

    #[test]
    fn test_payload_omits_empty_fields() {
        let payload = OrderEventPayload {
            order_id: "o-1".into(),
            reference: "ORD-1".into(),
            status: OrderStatus::Paid,
            total_cents: 2000,
            transaction_id: None,
            note: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "paid");
        assert!(json.get("note").is_none());
    }

    #[tokio::test]
    async fn test_enqueue_all_writes_one_row_per_event() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (order, _) = pending_order(&db, "ORD-1", &[("p-1", 1)]).await;

        let events = vec![
            PendingEvent::for_order(ORDER_PAID, &order, OrderStatus::Paid).with_transaction("tx-1"),
            PendingEvent::for_order(ORDER_RECONCILIATION_REQUIRED, &order, OrderStatus::Paid)
                .with_note("amount mismatch"),
        ];
        enqueue_all(&db, &events, Utc::now()).await;

        assert_eq!(db.outbox().count_by_type(ORDER_PAID).await.unwrap(), 1);
        let pending = db.outbox().get_pending(10, 5).await.unwrap();
        let note: OrderEventPayload = serde_json::from_str(&pending[1].payload).unwrap();
        assert_eq!(note.note.as_deref(), Some("amount mismatch"));
    }
}
