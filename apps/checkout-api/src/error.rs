//! # API Error Type
//!
//! Unified error type for HTTP handlers.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Handler ── Result<T, ApiError>                                         │
//! │                 │                                                       │
//! │  EngineError ───┤                                                       │
//! │    Domain(CoreError)     ──► 400 / 403 / 404 / 409                      │
//! │    Database(DbError)     ──► 500 / 503 (details logged, not returned)   │
//! │    PaymentUnavailable    ──► 502                                        │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │  { "code": "INSUFFICIENT_STOCK",                                        │
//! │    "message": "Insufficient stock for p-1: available 2, requested 3" }  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use checkout_core::CoreError;
use checkout_db::DbError;
use checkout_engine::EngineError;

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Product or order not found (404)
    NotFound,

    /// Input validation failed (400)
    ValidationError,

    /// Notification body could not be parsed (400)
    MalformedNotification,

    /// Notification signature mismatch (403)
    InvalidSignature,

    /// Not enough unreserved stock (409)
    InsufficientStock,

    /// Order state machine rejected the change (409)
    InvalidTransition,

    /// Payment provider could not create a charge (502)
    PaymentUnavailable,

    /// Storage temporarily unavailable (503)
    Unavailable,

    /// Database operation failed (500)
    DatabaseError,

    /// Internal server error (500)
    Internal,
}

impl ErrorCode {
    pub const fn status(&self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ValidationError | ErrorCode::MalformedNotification => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidSignature => StatusCode::FORBIDDEN,
            ErrorCode::InsufficientStock | ErrorCode::InvalidTransition => StatusCode::CONFLICT,
            ErrorCode::PaymentUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DatabaseError | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError { code, message: message.into() }
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        ApiError::new(ErrorCode::NotFound, format!("{resource} not found: {id}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Internal, message)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let code = match &err {
            CoreError::ProductNotFound(id) => return ApiError::not_found("Product", id),
            CoreError::OrderNotFound(reference) => return ApiError::not_found("Order", reference),
            CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            CoreError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            CoreError::InvalidSignature => ErrorCode::InvalidSignature,
            CoreError::MalformedNotification { .. } => ErrorCode::MalformedNotification,
            CoreError::EmptyCart
            | CoreError::CartTooLarge { .. }
            | CoreError::QuantityTooLarge { .. }
            | CoreError::InvalidAmount { .. }
            | CoreError::Validation(_) => ErrorCode::ValidationError,
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => ApiError::not_found(&entity, &id),
            DbError::PoolExhausted | DbError::ConnectionFailed(_) => {
                tracing::error!(error = %err, "Database unavailable");
                ApiError::new(ErrorCode::Unavailable, "Database temporarily unavailable")
            }
            other => {
                // Log the actual error but return a generic message
                tracing::error!(error = %other, "Database operation failed");
                ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Domain(e) => e.into(),
            EngineError::Database(e) => e.into(),
            EngineError::PaymentUnavailable(e) => {
                ApiError::new(ErrorCode::PaymentUnavailable, format!("Payment provider unavailable: {e}"))
            }
            other => {
                tracing::error!(error = %other, "Request failed");
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}
