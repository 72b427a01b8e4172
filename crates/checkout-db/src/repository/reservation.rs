//! # Reservation Repository
//!
//! Time-bounded stock holds. Every status change is a compare-and-set on the
//! current status, so the three writers (checkout, settlement, sweeper) can
//! race without a hold ever leaving `active` twice.
//!
//! ```text
//!   owner         statement                                   guard
//!   ──────────    ─────────────────────────────────────────   ──────────────────
//!   checkout      INSERT ... status = 'active'                UNIQUE(order, product)
//!   settlement    UPDATE ... SET status = 'converted'         WHERE status = 'active'
//!   settlement    UPDATE ... SET status = 'released'          WHERE status = 'active'
//!   settlement    UPDATE ... SET status = 'converted'         WHERE status = 'expired'
//!   sweeper       UPDATE ... SET status = 'expired'           WHERE status = 'active'
//!                                                              AND expires_at <= now
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use checkout_core::{ExpiredReservation, Reservation};

const RESERVATION_COLUMNS: &str = r#"
    id, order_id, product_id, quantity, status,
    expires_at, created_at, released_at, converted_at
"#;

/// Repository for reservation database operations.
#[derive(Debug, Clone)]
pub struct ReservationRepository {
    pool: SqlitePool,
}

impl ReservationRepository {
    /// Creates a new ReservationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReservationRepository { pool }
    }

    /// All holds of an order, in product order.
    pub async fn for_order(&self, order_id: &str) -> DbResult<Vec<Reservation>> {
        let mut conn = self.pool.acquire().await?;
        Self::for_order_in(&mut conn, order_id).await
    }

    /// Expires up to `limit` active holds whose `expires_at <= now`.
    ///
    /// One statement: the candidate scan and the status flip cannot be split
    /// by a concurrent convert or release, and a hold that was converted in
    /// the meantime simply no longer matches `status = 'active'`.
    pub async fn release_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<ExpiredReservation>> {
        let expired = sqlx::query_as::<_, ExpiredReservation>(
            r#"
            UPDATE reservations
            SET status = 'expired', released_at = ?1
            WHERE id IN (
                SELECT id FROM reservations
                WHERE status = 'active' AND expires_at <= ?1
                ORDER BY expires_at
                LIMIT ?2
            )
            AND status = 'active'
            RETURNING id, order_id, product_id, quantity
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired reservations");
        }
        Ok(expired)
    }

    /// Number of holds currently `active` for a product.
    pub async fn count_active(&self, product_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE product_id = ?1 AND status = 'active'",
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    pub async fn create_in(conn: &mut SqliteConnection, reservation: &Reservation) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, order_id, product_id, quantity, status,
                expires_at, created_at, released_at, converted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&reservation.id)
        .bind(&reservation.order_id)
        .bind(&reservation.product_id)
        .bind(reservation.quantity)
        .bind(reservation.status)
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .bind(reservation.released_at)
        .bind(reservation.converted_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn for_order_in(conn: &mut SqliteConnection, order_id: &str) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = ?1 ORDER BY product_id"
        );
        Ok(sqlx::query_as::<_, Reservation>(&sql)
            .bind(order_id)
            .fetch_all(&mut *conn)
            .await?)
    }

    /// `active → converted` for every hold of the order. Returns the converted rows.
    pub async fn convert_active_in(
        conn: &mut SqliteConnection,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "UPDATE reservations SET status = 'converted', converted_at = ?2 \
             WHERE order_id = ?1 AND status = 'active' RETURNING {RESERVATION_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Reservation>(&sql)
            .bind(order_id)
            .bind(now)
            .fetch_all(&mut *conn)
            .await?)
    }

    /// `active → released` for every hold of the order. Returns the released rows.
    pub async fn release_active_in(
        conn: &mut SqliteConnection,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "UPDATE reservations SET status = 'released', released_at = ?2 \
             WHERE order_id = ?1 AND status = 'active' RETURNING {RESERVATION_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Reservation>(&sql)
            .bind(order_id)
            .bind(now)
            .fetch_all(&mut *conn)
            .await?)
    }

    /// `expired → converted` for every hold of the order.
    ///
    /// Only valid after the availability gate re-validated these quantities
    /// under the product locks of the same transaction.
    pub async fn reinstate_expired_in(
        conn: &mut SqliteConnection,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "UPDATE reservations SET status = 'converted', converted_at = ?2 \
             WHERE order_id = ?1 AND status = 'expired' RETURNING {RESERVATION_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Reservation>(&sql)
            .bind(order_id)
            .bind(now)
            .fetch_all(&mut *conn)
            .await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures::{hold, pending_order, seeded_db};
    use checkout_core::ReservationStatus;
    use chrono::Duration;

    #[tokio::test]
    async fn test_one_hold_per_order_and_product() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (order, _) = pending_order(&db, "ORD-1", &[("p-1", 1)]).await;
        let now = Utc::now();

        let mut tx = db.begin().await.unwrap();
        ReservationRepository::create_in(&mut tx, &hold(&order.id, "p-1", 1, now))
            .await
            .unwrap();
        let err = ReservationRepository::create_in(&mut tx, &hold(&order.id, "p-1", 1, now))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_release_expired_boundary_is_inclusive() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (order, _) = pending_order(&db, "ORD-1", &[("p-1", 1)]).await;
        let created = Utc::now();
        let h = hold(&order.id, "p-1", 1, created);
        let expires_at = h.expires_at;

        let mut tx = db.begin().await.unwrap();
        ReservationRepository::create_in(&mut tx, &h).await.unwrap();
        tx.commit().await.unwrap();

        let before = db
            .reservations()
            .release_expired(expires_at - Duration::seconds(1), 100)
            .await
            .unwrap();
        assert!(before.is_empty());

        let at = db.reservations().release_expired(expires_at, 100).await.unwrap();
        assert_eq!(at.len(), 1);
        assert_eq!(at[0].order_id, order.id);

        // Already expired: a second sweep finds nothing
        assert!(db.reservations().release_expired(expires_at, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_converted_hold_is_not_swept() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (order, _) = pending_order(&db, "ORD-1", &[("p-1", 2)]).await;
        let now = Utc::now();
        let h = hold(&order.id, "p-1", 2, now);
        let expires_at = h.expires_at;

        let mut tx = db.begin().await.unwrap();
        ReservationRepository::create_in(&mut tx, &h).await.unwrap();
        let converted = ReservationRepository::convert_active_in(&mut tx, &order.id, now)
            .await
            .unwrap();
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].status, ReservationStatus::Converted);

        // Idempotent: nothing left to convert or release
        assert!(ReservationRepository::convert_active_in(&mut tx, &order.id, now).await.unwrap().is_empty());
        assert!(ReservationRepository::release_active_in(&mut tx, &order.id, now).await.unwrap().is_empty());
        tx.commit().await.unwrap();

        assert!(db.reservations().release_expired(expires_at, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_expired_respects_batch_limit() {
        let db = seeded_db(&[("p-1", 50, 100), ("p-2", 50, 100), ("p-3", 50, 100)]).await;
        let (order, _) = pending_order(&db, "ORD-1", &[("p-1", 1), ("p-2", 1), ("p-3", 1)]).await;
        let now = Utc::now();

        let mut tx = db.begin().await.unwrap();
        for product_id in ["p-1", "p-2", "p-3"] {
            ReservationRepository::create_in(&mut tx, &hold(&order.id, product_id, 1, now))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let later = now + Duration::hours(1);
        assert_eq!(db.reservations().release_expired(later, 2).await.unwrap().len(), 2);
        assert_eq!(db.reservations().release_expired(later, 2).await.unwrap().len(), 1);
        assert!(db.reservations().release_expired(later, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reinstate_only_touches_expired() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let (order, _) = pending_order(&db, "ORD-1", &[("p-1", 2)]).await;
        let now = Utc::now();
        let h = hold(&order.id, "p-1", 2, now);
        let expires_at = h.expires_at;

        let mut tx = db.begin().await.unwrap();
        ReservationRepository::create_in(&mut tx, &h).await.unwrap();
        assert!(ReservationRepository::reinstate_expired_in(&mut tx, &order.id, now).await.unwrap().is_empty());
        tx.commit().await.unwrap();

        db.reservations().release_expired(expires_at, 10).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let reinstated = ReservationRepository::reinstate_expired_in(&mut tx, &order.id, expires_at)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(reinstated.len(), 1);
        assert_eq!(reinstated[0].status, ReservationStatus::Converted);
    }
}
