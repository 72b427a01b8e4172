//! # Payment Repository
//!
//! Provider charge records and notification idempotency claims.
//!
//! ## Notification Idempotency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SETTLEMENT TRANSACTION                                                 │
//! │                                                                         │
//! │  1. INSERT INTO processed_notifications (idempotency_key, ...)          │
//! │     ON CONFLICT DO NOTHING                                              │
//! │        │                                                                │
//! │        ├── rows_affected = 0 → duplicate delivery, ack and stop         │
//! │        │                                                                │
//! │        └── rows_affected = 1 → first delivery, continue                 │
//! │                                                                         │
//! │  2. UPSERT payment_transactions (by transaction_id)                     │
//! │  3. convert / release holds, order transition                           │
//! │                                                                         │
//! │  COMMIT ← the claim and its effects land together or not at all         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use chrono::{DateTime, Utc};

use crate::error::DbResult;
use checkout_core::PaymentTransaction;

const PAYMENT_COLUMNS: &str = r#"
    transaction_id, order_id, idempotency_key, transaction_status, payment_type,
    signature_verified, amount_cents, redirect_url, notification_payload,
    notification_received_at, settled_at, created_at, updated_at
"#;

/// Final provider statuses. A late intermediate status never replaces one.
const FINAL_STATUSES: &str = "'settlement', 'capture', 'deny', 'cancel', 'expire', 'failure'";

/// Repository for payment transaction records.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Records a freshly created charge.
    ///
    /// A notification may already have created the row (fast providers), in
    /// which case only the redirect URL is filled in.
    pub async fn insert_charge(&self, record: &PaymentTransaction) -> DbResult<()> {
        debug!(transaction_id = %record.transaction_id, order_id = %record.order_id, "Recording charge");

        sqlx::query(
            r#"
            INSERT INTO payment_transactions (
                transaction_id, order_id, idempotency_key, transaction_status, payment_type,
                signature_verified, amount_cents, redirect_url, notification_payload,
                notification_received_at, settled_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (transaction_id) DO UPDATE SET
                redirect_url = COALESCE(payment_transactions.redirect_url, excluded.redirect_url),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.transaction_id)
        .bind(&record.order_id)
        .bind(&record.idempotency_key)
        .bind(&record.transaction_status)
        .bind(&record.payment_type)
        .bind(record.signature_verified)
        .bind(record.amount_cents)
        .bind(&record.redirect_url)
        .bind(&record.notification_payload)
        .bind(record.notification_received_at)
        .bind(record.settled_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, transaction_id: &str) -> DbResult<Option<PaymentTransaction>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payment_transactions WHERE transaction_id = ?1");
        Ok(sqlx::query_as::<_, PaymentTransaction>(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn for_order(&self, order_id: &str) -> DbResult<Vec<PaymentTransaction>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_transactions WHERE order_id = ?1 ORDER BY created_at"
        );
        Ok(sqlx::query_as::<_, PaymentTransaction>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Number of claimed notifications for a transaction.
    pub async fn processed_count(&self, transaction_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM processed_notifications WHERE transaction_id = ?1",
        )
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    /// Claims a notification idempotency key.
    ///
    /// Returns `false` if the key was already claimed (duplicate delivery).
    pub async fn claim_notification_in(
        conn: &mut SqliteConnection,
        idempotency_key: &str,
        transaction_id: &str,
        transaction_status: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_notifications (
                idempotency_key, transaction_id, transaction_status, processed_at
            ) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(idempotency_key)
        .bind(transaction_id)
        .bind(transaction_status)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Inserts or updates the record from a verified notification.
    ///
    /// An existing row keeps its `idempotency_key`, `created_at` and
    /// `redirect_url`, and `settled_at` is only ever set once. Status,
    /// payload and receipt time follow the newest notification, except that
    /// a final status is never replaced by an intermediate one arriving late.
    pub async fn upsert_notification_in(
        conn: &mut SqliteConnection,
        record: &PaymentTransaction,
    ) -> DbResult<()> {
        let stale = format!(
            "payment_transactions.transaction_status IN ({FINAL_STATUSES}) \
             AND excluded.transaction_status NOT IN ({FINAL_STATUSES})"
        );
        let sql = format!(
            r#"
            INSERT INTO payment_transactions (
                transaction_id, order_id, idempotency_key, transaction_status, payment_type,
                signature_verified, amount_cents, redirect_url, notification_payload,
                notification_received_at, settled_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (transaction_id) DO UPDATE SET
                transaction_status = CASE WHEN {stale}
                    THEN payment_transactions.transaction_status ELSE excluded.transaction_status END,
                payment_type = COALESCE(excluded.payment_type, payment_transactions.payment_type),
                signature_verified = excluded.signature_verified,
                amount_cents = excluded.amount_cents,
                notification_payload = CASE WHEN {stale}
                    THEN payment_transactions.notification_payload ELSE excluded.notification_payload END,
                notification_received_at = CASE WHEN {stale}
                    THEN payment_transactions.notification_received_at ELSE excluded.notification_received_at END,
                settled_at = COALESCE(payment_transactions.settled_at, excluded.settled_at),
                updated_at = excluded.updated_at
            "#
        );
        sqlx::query(&sql)
            .bind(&record.transaction_id)
            .bind(&record.order_id)
            .bind(&record.idempotency_key)
            .bind(&record.transaction_status)
            .bind(&record.payment_type)
            .bind(record.signature_verified)
            .bind(record.amount_cents)
            .bind(&record.redirect_url)
            .bind(&record.notification_payload)
            .bind(record.notification_received_at)
            .bind(record.settled_at)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
