//! # Outbox Repository
//!
//! Durable queue of side effects (`order.created`, `order.paid`,
//! `reservations.expired`, ...) drained by the engine's dispatcher.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  ORDER PATH (checkout, settlement, sweeper)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT the state change                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  enqueue() ← best effort: a failure here is logged and never undoes    │
//! │       │      the committed order                                       │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            OUTBOX DISPATCHER (background task)                  │   │
//! │  │                                                                 │   │
//! │  │  1. get_pending(limit): dispatched_at IS NULL, oldest first    │   │
//! │  │  2. For each event:                                            │   │
//! │  │     a. publish                                                 │   │
//! │  │     b. On success: mark_dispatched()                           │   │
//! │  │     c. On failure: mark_failed() → attempts += 1, last_error   │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Delivery is at-least-once: consumers dedupe on the event id.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use checkout_core::OutboxEvent;

/// Repository for outbox operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Queues an event.
    ///
    /// ## Arguments
    /// * `event_type` - e.g. `"order.created"`
    /// * `aggregate_id` - the order ID (or a batch ID for sweeps)
    /// * `payload` - serialized to JSON
    pub async fn enqueue<T: Serialize>(
        &self,
        tenant_id: &str,
        event_type: &str,
        aggregate_id: &str,
        payload: &T,
        now: DateTime<Utc>,
    ) -> DbResult<i64> {
        let payload = serde_json::to_string(payload)?;

        debug!(event_type = %event_type, aggregate_id = %aggregate_id, "Queuing outbox event");

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO outbox_events (
                tenant_id, event_type, aggregate_id, payload, attempts, created_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5)
            RETURNING id
            "#,
        )
        .bind(tenant_id)
        .bind(event_type)
        .bind(aggregate_id)
        .bind(payload)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Gets undispatched events that still have attempts left, oldest first.
    pub async fn get_pending(&self, limit: u32, max_attempts: u32) -> DbResult<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            SELECT
                id, tenant_id, event_type, aggregate_id, payload,
                attempts, last_error, created_at, attempted_at, dispatched_at
            FROM outbox_events
            WHERE dispatched_at IS NULL AND attempts < ?2
            ORDER BY id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    pub async fn mark_dispatched(&self, id: i64, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events SET
                dispatched_at = ?2,
                attempted_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed publish attempt.
    pub async fn mark_failed(&self, id: i64, error: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts undispatched events (including ones that ran out of attempts).
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE dispatched_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Counts events of one type (dispatched or not).
    pub async fn count_by_type(&self, event_type: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE event_type = ?1")
                .bind(event_type)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Deletes events dispatched more than `days_old` days before `now`.
    ///
    /// ## Returns
    /// Number of deleted events.
    pub async fn cleanup_dispatched(&self, days_old: u32, now: DateTime<Utc>) -> DbResult<u64> {
        let cutoff = now - Duration::days(i64::from(days_old));
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE dispatched_at IS NOT NULL
            AND dispatched_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
