//! # Product Repository (Stock Ledger)
//!
//! Authoritative per-product stock. Every statement that changes
//! `stock_quantity` runs on a connection whose transaction holds the
//! product's row lock (see [`ProductRepository::lock_row`]).
//!
//! ## Row Locking on SQLite
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SQLite has no SELECT ... FOR UPDATE. The equivalent is to make the     │
//! │  first statement of the transaction a write:                            │
//! │                                                                         │
//! │    BEGIN                                                                │
//! │    UPDATE products SET updated_at = updated_at                          │
//! │     WHERE tenant_id = ? AND id = ?     ← takes the write lock           │
//! │    SELECT stock_quantity ...           ← reads are now serialized       │
//! │    ...                                                                  │
//! │    COMMIT                              ← lock released                  │
//! │                                                                         │
//! │  A no-op UPDATE that matches zero rows doubles as the existence check.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use checkout_core::ProductStock;

const PRODUCT_COLUMNS: &str =
    "id, tenant_id, sku, name, stock_quantity, price_cents, created_at, updated_at";

/// Repository for the stock ledger.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a product row.
    pub async fn insert(&self, product: &ProductStock) -> DbResult<()> {
        debug!(id = %product.id, sku = %product.sku, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, tenant_id, sku, name, stock_quantity, price_cents, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&product.id)
        .bind(&product.tenant_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.stock_quantity)
        .bind(product.price_cents)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a product of a tenant (unlocked read).
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<ProductStock>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = ?1 AND id = ?2");
        let product = sqlx::query_as::<_, ProductStock>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    /// Lists a tenant's products ordered by SKU.
    pub async fn list(&self, tenant_id: &str) -> DbResult<Vec<ProductStock>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = ?1 ORDER BY sku");
        let products = sqlx::query_as::<_, ProductStock>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    /// Total active (unexpired-by-sweeper) held quantity for a product.
    pub async fn active_reserved(&self, product_id: &str) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::active_reserved_in(&mut conn, product_id).await
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    /// Takes the row lock for `(tenant_id, id)` inside the caller's transaction.
    ///
    /// Returns `false` when the product does not exist for the tenant.
    pub async fn lock_row(conn: &mut SqliteConnection, tenant_id: &str, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE products SET updated_at = updated_at WHERE tenant_id = ?1 AND id = ?2",
        )
        .bind(tenant_id)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Reads a product row on the caller's connection.
    pub async fn get_in(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> DbResult<Option<ProductStock>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = ?1 AND id = ?2");
        let product = sqlx::query_as::<_, ProductStock>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(product)
    }

    /// `SUM(quantity)` of the product's `active` reservations.
    pub async fn active_reserved_in(conn: &mut SqliteConnection, product_id: &str) -> DbResult<i64> {
        let reserved: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
            FROM reservations
            WHERE product_id = ?1 AND status = 'active'
            "#,
        )
        .bind(product_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(reserved)
    }

    /// Adds `delta` (may be negative) to `stock_quantity`.
    ///
    /// Returns the new stock level, or `None` if the product does not exist.
    pub async fn adjust_stock(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
        delta: i64,
        now: DateTime<Utc>,
    ) -> DbResult<Option<i64>> {
        let stock: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + ?3, updated_at = ?4
            WHERE tenant_id = ?1 AND id = ?2
            RETURNING stock_quantity
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(delta)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?;

        debug!(product_id = %id, delta, stock = ?stock, "Stock adjusted");
        Ok(stock)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
