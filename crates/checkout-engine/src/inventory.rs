//! Stock ledger adjustments and availability reads.

use serde::Serialize;
use tracing::info;

use checkout_core::{CoreError, ProductStock};
use checkout_db::{Database, ProductRepository};

use crate::clock::SharedClock;
use crate::error::EngineResult;
use crate::gate::AvailabilityGate;
use crate::locks::StockLocks;

/// Point-in-time view of one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub stock_quantity: i64,
    pub reserved: i64,
    pub available: i64,
}

#[derive(Clone)]
pub struct InventoryService {
    db: Database,
    locks: StockLocks,
    clock: SharedClock,
}

impl InventoryService {
    pub fn new(db: Database, locks: StockLocks, clock: SharedClock) -> Self {
        InventoryService { db, locks, clock }
    }

    /// Adds a product to the ledger.
    pub async fn register(&self, product: &ProductStock) -> EngineResult<()> {
        self.db.products().insert(product).await?;
        info!(product_id = %product.id, tenant_id = %product.tenant_id, stock = product.stock_quantity, "Product registered");
        Ok(())
    }

    /// Adds `delta` units (negative to write stock off) and returns the new level.
    ///
    /// A write-off may not take stock below what active holds already promised.
    pub async fn restock(&self, tenant_id: &str, product_id: &str, delta: i64) -> EngineResult<i64> {
        let guard = self.locks.acquire(tenant_id, [product_id]).await;
        let mut tx = self.db.begin().await?;
        AvailabilityGate::lock_rows(&mut tx, &guard).await?;

        if delta < 0 {
            let product = ProductRepository::get_in(&mut tx, tenant_id, product_id)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;
            let reserved = ProductRepository::active_reserved_in(&mut tx, product_id).await?;
            let available = product.stock_quantity - reserved;
            if available < -delta {
                return Err(CoreError::InsufficientStock {
                    product_id: product_id.to_string(),
                    available,
                    requested: -delta,
                }
                .into());
            }
        }

        let stock = ProductRepository::adjust_stock(&mut tx, tenant_id, product_id, delta, self.clock.now())
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;
        tx.commit().await?;

        info!(product_id = %product_id, delta, stock, "Stock adjusted");
        Ok(stock)
    }

    /// Stock, active holds and what is left. Unlocked: a snapshot only.
    pub async fn availability(&self, tenant_id: &str, product_id: &str) -> EngineResult<Availability> {
        let product = self
            .db
            .products()
            .get(tenant_id, product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;
        let reserved = self.db.products().active_reserved(product_id).await?;

        Ok(Availability {
            stock_quantity: product.stock_quantity,
            reserved,
            available: product.stock_quantity - reserved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::testing::{cart, engine_parts, product, seeded_db, FakeGateway, TENANT};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_restock_and_availability() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let s = engine_parts(&db, Arc::new(FakeGateway::default()));

        s.checkout.checkout(&cart(&[("p-1", 4)])).await.unwrap();
        assert_eq!(
            s.inventory.availability(TENANT, "p-1").await.unwrap(),
            Availability { stock_quantity: 5, reserved: 4, available: 1 }
        );

        assert_eq!(s.inventory.restock(TENANT, "p-1", 10).await.unwrap(), 15);
        assert_eq!(s.inventory.availability(TENANT, "p-1").await.unwrap().available, 11);
    }

    #[tokio::test]
    async fn test_write_off_cannot_break_holds() {
        let db = seeded_db(&[("p-1", 5, 1000)]).await;
        let s = engine_parts(&db, Arc::new(FakeGateway::default()));
        s.checkout.checkout(&cart(&[("p-1", 3)])).await.unwrap();

        let err = s.inventory.restock(TENANT, "p-1", -3).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(CoreError::InsufficientStock { available: 2, requested: 3, .. })
        ));
        assert_eq!(s.inventory.restock(TENANT, "p-1", -2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let db = seeded_db(&[]).await;
        let s = engine_parts(&db, Arc::new(FakeGateway::default()));

        let err = s.inventory.restock(TENANT, "p-404", 1).await.unwrap_err();
        assert!(matches!(err.as_domain(), Some(CoreError::ProductNotFound(_))));
        let err = s.inventory.availability(TENANT, "p-404").await.unwrap_err();
        assert!(matches!(err.as_domain(), Some(CoreError::ProductNotFound(_))));

        s.inventory.register(&product("p-404", 2, 100)).await.unwrap();
        assert_eq!(s.inventory.availability(TENANT, "p-404").await.unwrap().available, 2);
    }
}
