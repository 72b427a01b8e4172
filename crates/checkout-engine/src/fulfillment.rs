//! Merchant fulfillment: `paid → completed`.

use tracing::info;

use checkout_core::{CoreError, OrderStatus};
use checkout_db::{Database, OrderRepository};

use crate::clock::SharedClock;
use crate::error::EngineResult;
use crate::events::{self, PendingEvent, ORDER_COMPLETED};

#[derive(Clone)]
pub struct FulfillmentService {
    db: Database,
    clock: SharedClock,
}

impl FulfillmentService {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        FulfillmentService { db, clock }
    }

    /// Marks a paid order completed. Completing a completed order is a no-op.
    ///
    /// ## Errors
    /// - `Domain(OrderNotFound)`
    /// - `Domain(InvalidTransition)` for pending or cancelled orders
    pub async fn complete_order(&self, reference: &str) -> EngineResult<OrderStatus> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;

        // Write first: the transaction never starts as a reader
        let applied = OrderRepository::complete_paid_in(&mut tx, reference, now).await?;

        let order = OrderRepository::get_by_reference_in(&mut tx, reference)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(reference.to_string()))?;

        if !applied {
            return match order.status {
                OrderStatus::Completed => Ok(OrderStatus::Completed),
                from => Err(CoreError::InvalidTransition { from, to: OrderStatus::Completed }.into()),
            };
        }

        tx.commit().await?;

        info!(order_id = %order.id, reference = %order.reference, "Order completed");
        events::enqueue_all(
            &self.db,
            &[PendingEvent::for_order(ORDER_COMPLETED, &order, OrderStatus::Completed)],
            now,
        )
        .await;

        Ok(OrderStatus::Completed)
    }
}
