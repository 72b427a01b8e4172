//! # Outbox Dispatcher
//!
//! Drains the `outbox_events` table into an [`EventPublisher`].
//!
//! ## Dispatch Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Dispatcher Flow                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    outbox_events Table                          │   │
//! │  │                                                                 │   │
//! │  │  id | event_type           | aggregate | attempts | dispatched  │   │
//! │  │  ───┼──────────────────────┼───────────┼──────────┼────────────│   │
//! │  │  1  │ order.created        │ order-1   │ 0        │ NULL        │   │
//! │  │  2  │ order.paid           │ order-1   │ 2        │ NULL        │   │
//! │  │  3  │ reservations.expired │ batch-7   │ 0        │ NULL        │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    OutboxDispatcher                             │   │
//! │  │                                                                 │   │
//! │  │  1. Poll: dispatched_at IS NULL AND attempts < max_attempts    │   │
//! │  │           ORDER BY id LIMIT batch_size                         │   │
//! │  │                                                                 │   │
//! │  │  2. Publish each event (in id order)                            │   │
//! │  │                                                                 │   │
//! │  │  3. Mark: dispatched_at = now       (success)                   │   │
//! │  │           attempts += 1, last_error (failure)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  TIMING:                                                               │
//! │  • Poll interval: 5 seconds (configurable), or on wake()               │
//! │  • Batch size: 100 events (configurable)                               │
//! │  • Max attempts: 10 (then left for an operator)                        │
//! │  • Cleanup: hourly, dispatched rows older than retention_days          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once: a crash between publish and mark re-publishes.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use checkout_core::OutboxEvent;
use checkout_db::Database;

use crate::clock::SharedClock;
use crate::config::OutboxSettings;
use crate::error::{EngineError, EngineResult, PublishError};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

// =============================================================================
// Publisher
// =============================================================================

/// Destination of outbox events (message broker, webhook fan-out, ...).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError>;
}

/// Publishes events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError> {
        info!(
            event_id = event.id,
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            aggregate_id = %event.aggregate_id,
            payload = %event.payload,
            "Event published"
        );
        Ok(())
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: usize,
    pub failed: usize,
}

pub struct OutboxDispatcher {
    db: Database,
    clock: SharedClock,
    publisher: Arc<dyn EventPublisher>,
    settings: OutboxSettings,
    wake: Arc<Notify>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the dispatcher.
#[derive(Clone)]
pub struct OutboxDispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    wake: Arc<Notify>,
}

impl OutboxDispatcherHandle {
    /// Requests a dispatch pass without waiting for the next poll.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("Outbox shutdown channel closed".into()))
    }
}

impl OutboxDispatcher {
    pub fn new(
        db: Database,
        clock: SharedClock,
        publisher: Arc<dyn EventPublisher>,
        settings: OutboxSettings,
    ) -> (Self, OutboxDispatcherHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let wake = Arc::new(Notify::new());

        let dispatcher = OutboxDispatcher {
            db,
            clock,
            publisher,
            settings,
            wake: wake.clone(),
            shutdown_rx,
        };

        (dispatcher, OutboxDispatcherHandle { shutdown_tx, wake })
    }

    /// Runs the dispatch loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!("Outbox dispatcher starting");

        let mut poll = tokio::time::interval(Duration::from_secs(self.settings.poll_interval_secs));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => self.drain().await,

                _ = self.wake.notified() => self.drain().await,

                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup().await {
                        error!(error = %e, "Outbox cleanup failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Outbox dispatcher shutting down");
                    break;
                }
            }
        }

        info!("Outbox dispatcher stopped");
    }

    /// Dispatches full batches until the queue is drained or a batch fails.
    async fn drain(&self) {
        loop {
            match self.dispatch_batch().await {
                Ok(stats) if stats.failed == 0 && stats.dispatched == self.settings.batch_size as usize => continue,
                Ok(_) => break,
                Err(e) => {
                    error!(error = %e, "Failed to process outbox batch");
                    break;
                }
            }
        }
    }

    /// Publishes one batch of pending events.
    pub async fn dispatch_batch(&self) -> EngineResult<DispatchStats> {
        let events = self
            .db
            .outbox()
            .get_pending(self.settings.batch_size, self.settings.max_attempts)
            .await?;

        if events.is_empty() {
            debug!("No pending outbox events");
            return Ok(DispatchStats::default());
        }

        let mut stats = DispatchStats::default();
        for event in &events {
            match self.publisher.publish(event).await {
                Ok(()) => {
                    self.db.outbox().mark_dispatched(event.id, self.clock.now()).await?;
                    stats.dispatched += 1;
                }
                Err(e) => {
                    let attempts = event.attempts + 1;
                    if attempts >= i64::from(self.settings.max_attempts) {
                        error!(
                            event_id = event.id,
                            event_type = %event.event_type,
                            attempts,
                            error = %e,
                            "Outbox event exhausted its attempts"
                        );
                    } else {
                        warn!(event_id = event.id, event_type = %event.event_type, attempts, error = %e, "Publish failed");
                    }
                    self.db.outbox().mark_failed(event.id, &e.to_string(), self.clock.now()).await?;
                    stats.failed += 1;
                }
            }
        }

        debug!(dispatched = stats.dispatched, failed = stats.failed, "Outbox batch processed");
        Ok(stats)
    }

    /// Deletes old dispatched events.
    pub async fn cleanup(&self) -> EngineResult<u64> {
        if self.settings.retention_days == 0 {
            return Ok(0);
        }
        let deleted = self
            .db
            .outbox()
            .cleanup_dispatched(self.settings.retention_days, self.clock.now())
            .await?;
        if deleted > 0 {
            info!(deleted, "Removed dispatched outbox events");
        }
        Ok(deleted)
    }
}

// =============================================================================
// Tests
// =============================================================================
