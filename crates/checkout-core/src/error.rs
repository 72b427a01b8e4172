//! # Error Types
//!
//! Domain-specific error types for checkout-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  checkout-core errors (this file)                                      │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  checkout-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  checkout-engine errors                                                │
//! │  └── EngineError      - Core + Db + gateway, what services return      │
//! │                                                                         │
//! │  checkout-api errors                                                   │
//! │  └── ApiError         - What HTTP clients see (code + status)          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → ApiError → Client   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (product ID, reference, etc.)
//! 3. Errors are enum variants, never String; callers match on the variant
//! 4. Each error variant maps to one HTTP status in the API layer

use thiserror::Error;

use crate::order::OrderStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations. None of them leave
/// partial state behind: they are raised before or inside a transaction
/// that is then rolled back.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found for the tenant.
    ///
    /// ## When This Occurs
    /// - Cart references a product ID that doesn't exist
    /// - Product belongs to another tenant
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Not enough unreserved stock to admit the cart.
    ///
    /// ## When This Occurs
    /// - `stock_quantity - active holds < requested` for a cart line
    /// - Settlement re-validation of an expired hold finds the stock gone
    ///
    /// ## User Workflow
    /// ```text
    /// Checkout (qty: 3)
    ///      │
    ///      ▼
    /// Lock product, read stock=5, active holds=3
    ///      │
    ///      ▼
    /// InsufficientStock { product_id, available: 2, requested: 3 }
    ///      │
    ///      ▼
    /// HTTP 409: "Only 2 left"
    /// ```
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// Order cannot be found (by ID or reference).
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// The order state machine rejected a status change.
    ///
    /// ## When This Occurs
    /// - A late `settlement` for an order that was already cancelled
    /// - Fulfilling an order that is still pending
    #[error("Invalid order transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Payment notification signature did not match.
    #[error("Payment notification signature mismatch")]
    InvalidSignature,

    /// Payment notification body could not be understood.
    #[error("Malformed payment notification: {reason}")]
    MalformedNotification { reason: String },

    /// Cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// Cart has exceeded maximum allowed distinct products.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Item quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Monetary amount is invalid.
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before any lock is taken.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid decimal amount).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product_id: "prod-1".to_string(),
            available: 2,
            requested: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for prod-1: available 2, requested 3"
        );
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = CoreError::InvalidTransition {
            from: OrderStatus::Completed,
            to: OrderStatus::Paid,
        };
        assert_eq!(
            err.to_string(),
            "Invalid order transition from completed to paid"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "tenant_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
