//! # Reservation Manager
//!
//! Creates, converts and releases time-bounded stock holds.
//!
//! ```text
//!  owner        operation             effect                              stock
//!  ──────────   ───────────────────   ─────────────────────────────────   ───────────
//!  checkout     create                one active hold per cart line       unchanged
//!  settlement   convert               active → converted                  - quantity
//!  settlement   release               active → released                   unchanged
//!  settlement   reinstate_expired     expired → converted (gate first)    - quantity
//!  sweeper      release_expired       active → expired (expires_at <= now) unchanged
//! ```
//!
//! Stock is only decremented at conversion, with the product rows locked by
//! the caller's transaction. Until then a hold is virtual: it lowers
//! availability, not `stock_quantity`.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use checkout_core::{CartLine, CoreError, ExpiredReservation, Reservation, ReservationStatus};
use checkout_db::{Database, ProductRepository, ReservationRepository};

use crate::error::EngineResult;
use crate::locks::StockGuard;

pub struct ReservationManager;

impl ReservationManager {
    /// Inserts one active hold per line, expiring at `now + ttl`.
    pub async fn create(
        conn: &mut SqliteConnection,
        order_id: &str,
        lines: &[CartLine],
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Reservation>> {
        let expires_at = now + ttl;
        let mut holds = Vec::with_capacity(lines.len());

        for line in lines {
            let hold = Reservation {
                id: Uuid::new_v4().to_string(),
                order_id: order_id.to_string(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                status: ReservationStatus::Active,
                expires_at,
                created_at: now,
                released_at: None,
                converted_at: None,
            };
            ReservationRepository::create_in(conn, &hold).await?;
            holds.push(hold);
        }

        debug!(order_id = %order_id, count = holds.len(), %expires_at, "Holds created");
        Ok(holds)
    }

    /// Converts the order's active holds and decrements stock accordingly.
    ///
    /// Idempotent: a second call finds nothing active and changes nothing.
    pub async fn convert(
        conn: &mut SqliteConnection,
        guard: &StockGuard,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Reservation>> {
        let converted = ReservationRepository::convert_active_in(conn, order_id, now).await?;
        Self::decrement_stock(conn, guard, &converted, now).await?;

        if !converted.is_empty() {
            info!(order_id = %order_id, count = converted.len(), "Holds converted");
        }
        Ok(converted)
    }

    /// Releases the order's active holds. Idempotent.
    pub async fn release(
        conn: &mut SqliteConnection,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Reservation>> {
        let released = ReservationRepository::release_active_in(conn, order_id, now).await?;

        if !released.is_empty() {
            info!(order_id = %order_id, count = released.len(), "Holds released");
        }
        Ok(released)
    }

    /// Turns the order's expired holds straight into converted ones.
    ///
    /// The caller must have re-validated the quantities with
    /// [`crate::gate::AvailabilityGate::check_available`] in this transaction.
    pub async fn reinstate_expired(
        conn: &mut SqliteConnection,
        guard: &StockGuard,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Reservation>> {
        let reinstated = ReservationRepository::reinstate_expired_in(conn, order_id, now).await?;
        Self::decrement_stock(conn, guard, &reinstated, now).await?;

        if !reinstated.is_empty() {
            info!(order_id = %order_id, count = reinstated.len(), "Expired holds reinstated");
        }
        Ok(reinstated)
    }

    /// Expires up to `limit` holds with `expires_at <= now`.
    pub async fn release_expired(
        db: &Database,
        now: DateTime<Utc>,
        limit: i64,
    ) -> EngineResult<Vec<ExpiredReservation>> {
        Ok(db.reservations().release_expired(now, limit).await?)
    }

    async fn decrement_stock(
        conn: &mut SqliteConnection,
        guard: &StockGuard,
        holds: &[Reservation],
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        for hold in holds {
            if !guard.covers(&hold.product_id) {
                return Err(crate::error::EngineError::LockNotHeld {
                    product_id: hold.product_id.clone(),
                });
            }
            ProductRepository::adjust_stock(conn, guard.tenant_id(), &hold.product_id, -hold.quantity, now)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(hold.product_id.clone()))?;
        }
        Ok(())
    }
}
