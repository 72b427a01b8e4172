//! # Engine Error Types
//!
//! Error types for checkout, settlement and the background tasks.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Domain         │  │   Database      │  │     Gateway             │ │
//! │  │  (CoreError)    │  │   (DbError)     │  │     (GatewayError)      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InsufficientSt.│  │  QueryFailed    │  │  Transport              │ │
//! │  │  ProductNotFound│  │  UniqueViolation│  │  ServerError (retried)  │ │
//! │  │  InvalidTrans.  │  │  PoolExhausted  │  │  Rejected (permanent)   │ │
//! │  │  InvalidSignat. │  │                 │  │  InvalidResponse        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │  Configuration  │  │  Internal                                   │  │
//! │  │  (ConfigError)  │  │  LockNotHeld, ConcurrentModification,       │  │
//! │  │                 │  │  Publish, ChannelError                      │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers match on variants, never on messages: the HTTP layer maps
//! `Domain(InsufficientStock)` to 409 and `PaymentUnavailable` to 502.

use thiserror::Error;

use checkout_core::CoreError;
use checkout_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A business rule rejected the request.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Storage failure.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The payment provider could not create a charge.
    /// The order has already been compensated when this is returned.
    #[error("Payment provider unavailable: {0}")]
    PaymentUnavailable(#[source] GatewayError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stock rows were touched without the matching in-process lock.
    #[error("Stock lock not held for product {product_id}")]
    LockNotHeld { product_id: String },

    /// A compare-and-set lost against a writer that should have been excluded.
    #[error("Order {order_id} was modified concurrently")]
    ConcurrentModification { order_id: String },

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database(DbError::from(err))
    }
}

impl EngineError {
    /// Returns the domain error if this is one.
    pub fn as_domain(&self) -> Option<&CoreError> {
        match self {
            EngineError::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// True for errors caused by the request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, EngineError::Domain(_))
    }

    /// True if the same request might succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Database(DbError::PoolExhausted) => true,
            EngineError::PaymentUnavailable(e) => e.is_transient(),
            _ => false,
        }
    }
}

// =============================================================================
// Gateway Errors
// =============================================================================

/// Failures talking to the payment provider.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Connect error, timeout, reset.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider answered 5xx or 429.
    #[error("Provider error {status}: {body}")]
    ServerError { status: u16, body: String },

    /// Provider refused the request (4xx).
    #[error("Provider rejected charge {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Provider answered 2xx with a body we could not use.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Transient failures are retried with backoff; the rest fail fast.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::ServerError { .. })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load config: {0}")]
    LoadFailed(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

// =============================================================================
// Publish Errors
// =============================================================================

/// An outbox event could not be delivered. The dispatcher retries it.
#[derive(Debug, Clone, Error)]
#[error("Publish failed: {0}")]
pub struct PublishError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_gateway_errors() {
        assert!(GatewayError::Transport("connection refused".into()).is_transient());
        assert!(GatewayError::ServerError { status: 503, body: String::new() }.is_transient());

        assert!(!GatewayError::Rejected { status: 400, body: String::new() }.is_transient());
        assert!(!GatewayError::InvalidResponse("missing redirect_url".into()).is_transient());
    }

    #[test]
    fn test_domain_errors_are_client_errors() {
        let err: EngineError = CoreError::EmptyCart.into();
        assert!(err.is_client_error());
        assert!(matches!(err.as_domain(), Some(CoreError::EmptyCart)));

        let err = EngineError::PaymentUnavailable(GatewayError::Transport("timeout".into()));
        assert!(!err.is_client_error());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::LockNotHeld { product_id: "p-9".into() };
        assert_eq!(err.to_string(), "Stock lock not held for product p-9");

        let err = EngineError::PaymentUnavailable(GatewayError::Rejected {
            status: 401,
            body: "unauthorized".into(),
        });
        assert!(err.to_string().contains("401"));
    }
}
