//! # checkout-core: Pure Business Logic for the Checkout Engine
//!
//! Every rule of the order path that can be expressed without I/O lives here:
//! money arithmetic, cart sanitization, the order state machine, reservation
//! status rules and payment-notification verification.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Checkout Engine Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 checkout-api (axum HTTP)                        │   │
//! │  │     POST /checkout   POST /payments/notifications   ...        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │           checkout-engine (locks, transactions, tasks)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ checkout-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────────┐  │   │
//! │  │   │  types   │ │  money   │ │  order   │ │  notification    │  │   │
//! │  │   │ Order    │ │  Money   │ │  state   │ │  signature +     │  │   │
//! │  │   │ Reserv.  │ │ decimal  │ │  machine │ │  status mapping  │  │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO CLOCK                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 checkout-db (SQLite repositories)               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entities (ProductStock, Order, Reservation, PaymentTransaction, ...)
//! - [`money`] - Integer money with decimal-string parsing for provider amounts
//! - [`order`] - Order status state machine
//! - [`notification`] - Payment notification wire type, signature, status mapping
//! - [`validation`] - Cart sanitization
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use checkout_core::order::OrderStatus;
//!
//! let status = OrderStatus::Pending;
//! assert_eq!(status.transition_to(OrderStatus::Paid).unwrap(), OrderStatus::Paid);
//! assert!(OrderStatus::Completed.transition_to(OrderStatus::Paid).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod notification;
pub mod order;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use order::OrderStatus;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default reservation time-to-live in seconds (15 minutes).
///
/// ## Business Reason
/// Long enough for a customer to finish a hosted payment page, short enough
/// that abandoned carts give their stock back quickly.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

/// Maximum distinct products allowed in a single cart.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single product in a cart.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;
