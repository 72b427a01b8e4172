//! # Stock Locks
//!
//! Process-wide registry of per-product async mutexes.
//!
//! ## Lock Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. StockLocks::acquire(tenant, product_ids)                            │
//! │       ids sorted + deduplicated, mutexes taken in that order            │
//! │       (two carts {A,B} and {B,A} both lock A first: no deadlock)        │
//! │                                                                         │
//! │  2. Database::begin()                                                   │
//! │       a pooled connection is taken only while the locks are held        │
//! │       (never the other way round: no lock-while-holding-connection)     │
//! │                                                                         │
//! │  3. AvailabilityGate::lock_rows(tx, &guard)                             │
//! │       touches each product row in the same order                        │
//! │                                                                         │
//! │  4. COMMIT, then drop(guard)                                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

type LockKey = (String, String);

/// Registry of per-product mutexes, keyed by `(tenant_id, product_id)`.
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct StockLocks {
    inner: Arc<Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>>,
}

/// Proof that the caller holds the locks for a set of products.
///
/// Released on drop.
#[derive(Debug)]
pub struct StockGuard {
    tenant_id: String,
    product_ids: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl StockGuard {
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Locked products, in lock order.
    pub fn product_ids(&self) -> &[String] {
        &self.product_ids
    }

    pub fn covers(&self, product_id: &str) -> bool {
        self.product_ids.binary_search_by(|id| id.as_str().cmp(product_id)).is_ok()
    }
}

impl StockLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every product in ascending ID order.
    pub async fn acquire<I, S>(&self, tenant_id: &str, product_ids: I) -> StockGuard
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids: Vec<String> = product_ids.into_iter().map(Into::into).collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            let mutex = self.mutex_for(tenant_id, id);
            guards.push(mutex.lock_owned().await);
            trace!(tenant_id = %tenant_id, product_id = %id, "Stock lock acquired");
        }

        StockGuard {
            tenant_id: tenant_id.to_string(),
            product_ids: ids,
            _guards: guards,
        }
    }

    /// Drops registry entries nobody holds or waits on.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - map.len()
    }

    /// Number of products with a registry entry.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutex_for(&self, tenant_id: &str, product_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry((tenant_id.to_string(), product_id.to_string()))
            .or_default()
            .clone()
    }
}
