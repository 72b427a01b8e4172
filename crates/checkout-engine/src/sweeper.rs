//! # Reservation Sweeper
//!
//! Background task that expires stale holds.
//!
//! ```text
//!   every interval_secs:
//!     loop {
//!       batch = UPDATE reservations SET status = 'expired'
//!               WHERE status = 'active' AND expires_at <= now LIMIT batch_size
//!       if batch is empty: break
//!       enqueue reservations.expired { batch_id, reservations }
//!     }
//!     prune idle stock lock entries
//! ```
//!
//! The sweeper is the only writer of `active → expired`. It takes no stock
//! locks: expiring a hold only ever raises availability, and a settlement
//! racing it sees either the active hold (and converts it) or the expired
//! one (and re-validates).

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use checkout_db::Database;

use crate::clock::SharedClock;
use crate::config::SweeperSettings;
use crate::error::{EngineError, EngineResult};
use crate::events::{ExpiredBatchPayload, ALL_TENANTS, RESERVATIONS_EXPIRED};
use crate::locks::StockLocks;
use crate::reservations::ReservationManager;

pub struct ReservationSweeper {
    db: Database,
    clock: SharedClock,
    locks: StockLocks,
    settings: SweeperSettings,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping the sweeper.
#[derive(Clone)]
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SweeperHandle {
    /// Triggers graceful shutdown. A sweep in progress finishes first.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("Sweeper shutdown channel closed".into()))
    }
}

impl ReservationSweeper {
    pub fn new(
        db: Database,
        clock: SharedClock,
        locks: StockLocks,
        settings: SweeperSettings,
    ) -> (Self, SweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sweeper = ReservationSweeper { db, clock, locks, settings, shutdown_rx };
        (sweeper, SweeperHandle { shutdown_tx })
    }

    /// Runs the sweep loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.settings.interval_secs, "Reservation sweeper starting");

        let mut interval = tokio::time::interval(Duration::from_secs(self.settings.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Reservation sweep failed");
                    }
                    let pruned = self.locks.prune();
                    if pruned > 0 {
                        debug!(pruned, "Pruned idle stock locks");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Reservation sweeper shutting down");
                    break;
                }
            }
        }

        info!("Reservation sweeper stopped");
    }

    /// Expires every hold due at the current time.
    ///
    /// Returns the number of holds expired.
    pub async fn sweep_once(&self) -> EngineResult<usize> {
        let now = self.clock.now();
        let mut total = 0;

        loop {
            let batch = ReservationManager::release_expired(&self.db, now, self.settings.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            total += batch.len();

            let payload = ExpiredBatchPayload {
                batch_id: Uuid::new_v4().to_string(),
                reservations: batch,
            };
            if let Err(e) = self
                .db
                .outbox()
                .enqueue(ALL_TENANTS, RESERVATIONS_EXPIRED, &payload.batch_id, &payload, now)
                .await
            {
                warn!(error = %e, batch_id = %payload.batch_id, "Failed to enqueue expiry event");
            }
        }

        if total > 0 {
            info!(expired = total, "Expired stale reservations");
        }
        Ok(total)
    }
}
