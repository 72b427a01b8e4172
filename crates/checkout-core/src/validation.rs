//! # Validation Module
//!
//! Input validation for carts and catalog rows.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP handler (axum)                                          │
//! │  └── Type validation (JSON deserialization)                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE (before any lock is taken)                       │
//! │  ├── Cart shape: non-empty, ≤ 100 products, 1..=999 per product        │
//! │  └── Merge duplicate lines, sort into lock order                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Availability gate (under lock)                               │
//! │  └── Stock minus active holds                                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: Database (SQLite)                                            │
//! │  ├── CHECK constraints, UNIQUE (order_id, product_id)                  │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use checkout_core::types::{Cart, CartLine};
//! use checkout_core::validation::sanitize_cart;
//!
//! let cart = Cart {
//!     tenant_id: "tenant-1".into(),
//!     items: vec![
//!         CartLine { product_id: "b".into(), quantity: 1 },
//!         CartLine { product_id: "a".into(), quantity: 2 },
//!         CartLine { product_id: "b".into(), quantity: 3 },
//!     ],
//!     delivery_fee_cents: 0,
//! };
//! let cart = sanitize_cart(&cart).unwrap();
//! assert_eq!(cart.product_ids(), vec!["a", "b"]);
//! assert_eq!(cart.lines[1].quantity, 4);
//! ```

use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{Cart, CartLine, ValidatedCart};
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates that an identifier-like field is present.
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Only alphanumeric characters, hyphens, underscores
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    validate_required("sku", sku)?;

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a product name (1..=200 characters).
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    validate_required("name", name)?;

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a quantity value.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in cents. Zero is allowed (free items).
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "price".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Cart
// =============================================================================

/// Sanitizes a cart before checkout.
///
/// ## Rules
/// - `tenant_id` is required
/// - At least one line, at most MAX_CART_ITEMS distinct products
/// - Every line quantity > 0
/// - Duplicate products are merged; the merged quantity must be ≤ 999
/// - Delivery fee must not be negative
///
/// ## Output
/// Lines sorted ascending by `product_id`, which is the order the
/// availability gate locks them in.
pub fn sanitize_cart(cart: &Cart) -> CoreResult<ValidatedCart> {
    validate_required("tenant_id", &cart.tenant_id)?;

    if cart.items.is_empty() {
        return Err(CoreError::EmptyCart);
    }

    let mut merged: BTreeMap<&str, i64> = BTreeMap::new();
    for line in &cart.items {
        validate_required("product_id", &line.product_id)?;
        if line.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }
        let entry = merged.entry(line.product_id.trim()).or_insert(0);
        *entry = entry.saturating_add(line.quantity);
    }

    if merged.len() > MAX_CART_ITEMS {
        return Err(CoreError::CartTooLarge {
            max: MAX_CART_ITEMS,
        });
    }

    if let Some(qty) = merged.values().copied().find(|&qty| qty > MAX_ITEM_QUANTITY) {
        return Err(CoreError::QuantityTooLarge {
            requested: qty,
            max: MAX_ITEM_QUANTITY,
        });
    }

    if cart.delivery_fee_cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "delivery_fee".to_string(),
        }
        .into());
    }

    Ok(ValidatedCart {
        tenant_id: cart.tenant_id.trim().to_string(),
        lines: merged
            .into_iter()
            .map(|(product_id, quantity)| CartLine {
                product_id: product_id.to_string(),
                quantity,
            })
            .collect(),
        delivery_fee: Money::from_cents(cart.delivery_fee_cents),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
