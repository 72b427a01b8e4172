//! # Inventory Availability Gate
//!
//! `available = stock_quantity - SUM(active holds)`, evaluated under lock.
//!
//! ```text
//!   lock_rows            touch p-1, p-2, p-3 (ascending)   ← before any read
//!       │
//!       ▼
//!   check_available      for each line in the same order:
//!                          available < requested → InsufficientStock (first one)
//!       │
//!       ▼
//!   caller inserts holds / converts, then COMMIT releases the row locks
//! ```
//!
//! SQLite has no `SELECT ... FOR UPDATE`; the row touch is a no-op `UPDATE`
//! that makes the transaction a writer before it reads anything, and the
//! [`StockGuard`] serializes writers on the same products inside the process.

use sqlx::SqliteConnection;
use tracing::debug;

use checkout_core::{CartLine, CoreError, ProductStock};
use checkout_db::ProductRepository;

use crate::error::{EngineError, EngineResult};
use crate::locks::StockGuard;

pub struct AvailabilityGate;

impl AvailabilityGate {
    /// Locks the rows and verifies every line can be held.
    ///
    /// `lines` must be sorted by product (as produced by cart sanitization).
    /// Returns the locked product rows in line order.
    pub async fn check_and_lock(
        conn: &mut SqliteConnection,
        guard: &StockGuard,
        lines: &[CartLine],
    ) -> EngineResult<Vec<ProductStock>> {
        Self::lock_rows(conn, guard).await?;
        Self::check_available(conn, guard, lines).await
    }

    /// Touches every product row covered by `guard`, in lock order.
    ///
    /// Must run before the transaction's first read.
    pub async fn lock_rows(conn: &mut SqliteConnection, guard: &StockGuard) -> EngineResult<()> {
        for product_id in guard.product_ids() {
            if !ProductRepository::lock_row(conn, guard.tenant_id(), product_id).await? {
                return Err(CoreError::ProductNotFound(product_id.clone()).into());
            }
        }
        Ok(())
    }

    /// Availability check for rows already locked in this transaction.
    pub async fn check_available(
        conn: &mut SqliteConnection,
        guard: &StockGuard,
        lines: &[CartLine],
    ) -> EngineResult<Vec<ProductStock>> {
        let mut products = Vec::with_capacity(lines.len());

        for line in lines {
            if !guard.covers(&line.product_id) {
                return Err(EngineError::LockNotHeld { product_id: line.product_id.clone() });
            }

            let product = ProductRepository::get_in(conn, guard.tenant_id(), &line.product_id)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(line.product_id.clone()))?;
            let reserved = ProductRepository::active_reserved_in(conn, &line.product_id).await?;
            let available = product.stock_quantity - reserved;

            debug!(
                product_id = %line.product_id,
                stock = product.stock_quantity,
                reserved,
                requested = line.quantity,
                "Availability check"
            );

            if available < line.quantity {
                return Err(CoreError::InsufficientStock {
                    product_id: line.product_id.clone(),
                    available,
                    requested: line.quantity,
                }
                .into());
            }
            products.push(product);
        }

        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::StockLocks;
    use crate::testing::seeded_db;

    fn line(product_id: &str, quantity: i64) -> CartLine {
        CartLine { product_id: product_id.to_string(), quantity }
    }

    #[tokio::test]
    async fn test_available_stock_passes() {
        let db = seeded_db(&[("p-1", 5, 1000), ("p-2", 2, 500)]).await;
        let locks = StockLocks::new();
        let guard = locks.acquire("tenant-1", ["p-1", "p-2"]).await;

        let mut tx = db.begin().await.unwrap();
        let products = AvailabilityGate::check_and_lock(&mut tx, &guard, &[line("p-1", 5), line("p-2", 1)])
            .await
            .unwrap();

        assert_eq!(products.len(), 2);
        assert_eq!(products[0].id, "p-1");
        assert_eq!(products[1].price_cents, 500);
    }

    #[tokio::test]
    async fn test_first_deficient_product_in_lock_order_is_reported() {
        let db = seeded_db(&[("p-1", 1, 1000), ("p-2", 0, 500)]).await;
        let locks = StockLocks::new();
        let guard = locks.acquire("tenant-1", ["p-1", "p-2"]).await;

        let mut tx = db.begin().await.unwrap();
        let err = AvailabilityGate::check_and_lock(&mut tx, &guard, &[line("p-1", 2), line("p-2", 1)])
            .await
            .unwrap_err();

        match err {
            EngineError::Domain(CoreError::InsufficientStock { product_id, available, requested }) => {
                assert_eq!(product_id, "p-1");
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_product_is_not_found() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let locks = StockLocks::new();
        let guard = locks.acquire("tenant-1", ["p-1", "p-404"]).await;

        let mut tx = db.begin().await.unwrap();
        let err = AvailabilityGate::check_and_lock(&mut tx, &guard, &[line("p-1", 1), line("p-404", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(CoreError::ProductNotFound(id)) if id == "p-404"));
    }

    #[tokio::test]
    async fn test_other_tenants_products_are_invisible() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let locks = StockLocks::new();
        let guard = locks.acquire("tenant-2", ["p-1"]).await;

        let mut tx = db.begin().await.unwrap();
        let err = AvailabilityGate::check_and_lock(&mut tx, &guard, &[line("p-1", 1)]).await.unwrap_err();
        assert!(matches!(err, EngineError::Domain(CoreError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn test_unlocked_line_is_refused() {
        let db = seeded_db(&[("p-1", 5, 1000), ("p-2", 5, 1000)]).await;
        let locks = StockLocks::new();
        let guard = locks.acquire("tenant-1", ["p-1"]).await;

        let mut tx = db.begin().await.unwrap();
        let err = AvailabilityGate::check_and_lock(&mut tx, &guard, &[line("p-1", 1), line("p-2", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LockNotHeld { product_id } if product_id == "p-2"));
    }

    #[tokio::test]
    async fn test_negative_stock_has_no_availability() {
        let db = seeded_db(&[("p-1", -3, 1000)]).await;
        let locks = StockLocks::new();
        let guard = locks.acquire("tenant-1", ["p-1"]).await;

        let mut tx = db.begin().await.unwrap();
        let err = AvailabilityGate::check_and_lock(&mut tx, &guard, &[line("p-1", 1)]).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(CoreError::InsufficientStock { available: -3, .. })
        ));
    }
}
