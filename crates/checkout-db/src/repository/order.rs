//! # Order Repository
//!
//! Orders, their items, and status changes.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Lifecycle                                   │
//! │                                                                         │
//! │  1. CHECKOUT (one transaction, stock locks held)                       │
//! │     └── insert_in()      → Order { status: pending }                   │
//! │     └── insert_item_in() → OrderItem (price snapshot) × N              │
//! │                                                                         │
//! │  2. CHARGE (after commit)                                              │
//! │     └── set_redirect_url()                                             │
//! │                                                                         │
//! │  3. SETTLEMENT / FULFILLMENT                                           │
//! │     └── update_status_in(from, to) → compare-and-set on status         │
//! │                                                                         │
//! │  4. EDGE CASES                                                         │
//! │     └── flag_reconciliation() → needs_reconciliation = 1 + note        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use checkout_core::{Order, OrderItem, OrderStatus};

const ORDER_COLUMNS: &str = r#"
    id, tenant_id, reference, status,
    subtotal_cents, delivery_fee_cents, total_cents,
    payment_redirect_url, needs_reconciliation, reconciliation_note,
    created_at, updated_at, paid_at, completed_at, cancelled_at
"#;

const ITEM_COLUMNS: &str = r#"
    id, order_id, product_id, sku_snapshot, name_snapshot,
    quantity, unit_price_cents, total_price_cents
"#;

/// Repository for order database operations.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        Ok(sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Gets an order by its human-readable reference.
    pub async fn get_by_reference(&self, reference: &str) -> DbResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_by_reference_in(&mut conn, reference).await
    }

    /// Gets all items of an order.
    pub async fn items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let mut conn = self.pool.acquire().await?;
        Self::items_in(&mut conn, order_id).await
    }

    /// Orders flagged for manual reconciliation, oldest first.
    pub async fn needing_reconciliation(&self, tenant_id: &str) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE tenant_id = ?1 AND needs_reconciliation = 1 ORDER BY updated_at"
        );
        Ok(sqlx::query_as::<_, Order>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Stores the payment page URL returned by the gateway.
    pub async fn set_redirect_url(
        &self,
        order_id: &str,
        url: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query("UPDATE orders SET payment_redirect_url = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(order_id)
            .bind(url)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flags an order for reconciliation outside any transaction.
    pub async fn flag_reconciliation(
        &self,
        order_id: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::flag_reconciliation_in(&mut conn, order_id, note, now).await
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    pub async fn insert_in(conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
        debug!(id = %order.id, reference = %order.reference, "Inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, tenant_id, reference, status,
                subtotal_cents, delivery_fee_cents, total_cents,
                payment_redirect_url, needs_reconciliation, reconciliation_note,
                created_at, updated_at, paid_at, completed_at, cancelled_at
            ) VALUES (
                ?1, ?2, ?3, ?4,
                ?5, ?6, ?7,
                ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15
            )
            "#,
        )
        .bind(&order.id)
        .bind(&order.tenant_id)
        .bind(&order.reference)
        .bind(order.status)
        .bind(order.subtotal_cents)
        .bind(order.delivery_fee_cents)
        .bind(order.total_cents)
        .bind(&order.payment_redirect_url)
        .bind(order.needs_reconciliation)
        .bind(&order.reconciliation_note)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .bind(order.completed_at)
        .bind(order.cancelled_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts an item.
    ///
    /// ## Snapshot Pattern
    /// Product details (sku, name, price) are copied into the item while the
    /// product row is locked, so the charged price is the price that was read.
    pub async fn insert_item_in(conn: &mut SqliteConnection, item: &OrderItem) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_items (
                id, order_id, product_id, sku_snapshot, name_snapshot,
                quantity, unit_price_cents, total_price_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&item.id)
        .bind(&item.order_id)
        .bind(&item.product_id)
        .bind(&item.sku_snapshot)
        .bind(&item.name_snapshot)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.total_price_cents)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get_by_id_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        Ok(sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?)
    }

    pub async fn get_by_reference_in(
        conn: &mut SqliteConnection,
        reference: &str,
    ) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE reference = ?1");
        Ok(sqlx::query_as::<_, Order>(&sql)
            .bind(reference)
            .fetch_optional(&mut *conn)
            .await?)
    }

    pub async fn items_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 ORDER BY product_id");
        Ok(sqlx::query_as::<_, OrderItem>(&sql)
            .bind(order_id)
            .fetch_all(&mut *conn)
            .await?)
    }

    /// Compare-and-set `from → to`, stamping the matching timestamp column.
    ///
    /// Returns `false` if the order was not in `from` (someone else moved it).
    /// Legality of the edge is the caller's concern.
    pub async fn update_status_in(
        conn: &mut SqliteConnection,
        order_id: &str,
        from: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = ?3,
                updated_at = ?4,
                paid_at = CASE WHEN ?3 = 'paid' THEN ?4 ELSE paid_at END,
                completed_at = CASE WHEN ?3 = 'completed' THEN ?4 ELSE completed_at END,
                cancelled_at = CASE WHEN ?3 = 'cancelled' THEN ?4 ELSE cancelled_at END
            WHERE id = ?1 AND status = ?2
            "#,
        )
        .bind(order_id)
        .bind(from)
        .bind(to)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(order_id = %order_id, %from, %to, applied = result.rows_affected() == 1, "Order status CAS");
        Ok(result.rows_affected() == 1)
    }

    /// `paid → completed` by reference. Returns `false` if the order is not paid.
    pub async fn complete_paid_in(
        conn: &mut SqliteConnection,
        reference: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET status = 'completed', completed_at = ?2, updated_at = ?2
            WHERE reference = ?1 AND status = 'paid'
            "#,
        )
        .bind(reference)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Appends `note` to the order's note without flagging it.
    pub async fn annotate_in(
        conn: &mut SqliteConnection,
        order_id: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE orders SET
                reconciliation_note = CASE
                    WHEN reconciliation_note IS NULL THEN ?2
                    ELSE reconciliation_note || '; ' || ?2
                END,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(order_id)
        .bind(note)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Sets `needs_reconciliation` and appends `note` to the existing note.
    pub async fn flag_reconciliation_in(
        conn: &mut SqliteConnection,
        order_id: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE orders SET
                needs_reconciliation = 1,
                reconciliation_note = CASE
                    WHEN reconciliation_note IS NULL THEN ?2
                    ELSE reconciliation_note || '; ' || ?2
                END,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(order_id)
        .bind(note)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
