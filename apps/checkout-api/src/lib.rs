//! # Checkout API
//!
//! HTTP surface of the checkout engine.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  POST /checkout                      201 CheckoutReceipt                │
//! │                                      400 / 404 / 409 / 502              │
//! │  POST /payments/notifications        200 { outcome, status }            │
//! │       (raw body, provider webhook)   400 malformed / 403 signature      │
//! │  GET  /orders/{reference}            200 order + items + holds +        │
//! │                                          payments, 404                  │
//! │  POST /orders/{reference}/complete   200, 404, 409 invalid transition   │
//! │  GET  /tenants/{tenant}/reconciliation  flagged orders                  │
//! │  GET  /health                        200 / 503                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The notification route reads the body as raw bytes: the signature is
//! checked against the fields the provider sent, before any typed decoding
//! of the rest of the request.

pub mod error;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::debug;

use checkout_core::{Cart, Order, OrderDetails};
use checkout_engine::{CheckoutReceipt, Engine, SettlementOutcome};

pub use error::{ApiError, ErrorCode};

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Builds the application router over `engine`.
pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/checkout", post(checkout))
        .route("/payments/notifications", post(payment_notification))
        .route("/orders/{reference}", get(order_details))
        .route("/orders/{reference}/complete", post(complete_order))
        .route("/tenants/{tenant_id}/reconciliation", get(reconciliation_queue))
        .route("/health", get(health))
        .with_state(engine)
}

async fn checkout(
    State(engine): State<Engine>,
    Json(cart): Json<Cart>,
) -> ApiResult<(StatusCode, Json<CheckoutReceipt>)> {
    debug!(tenant_id = %cart.tenant_id, lines = cart.items.len(), "Checkout requested");
    let receipt = engine.checkout(&cart).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn payment_notification(
    State(engine): State<Engine>,
    body: Bytes,
) -> ApiResult<Json<SettlementOutcome>> {
    Ok(Json(engine.handle_notification(&body).await?))
}

async fn order_details(
    State(engine): State<Engine>,
    Path(reference): Path<String>,
) -> ApiResult<Json<OrderDetails>> {
    Ok(Json(engine.order_details(&reference).await?))
}

async fn complete_order(
    State(engine): State<Engine>,
    Path(reference): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let status = engine.complete_order(&reference).await?;
    Ok(Json(json!({ "reference": reference, "status": status })))
}

async fn reconciliation_queue(
    State(engine): State<Engine>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(engine.orders_needing_reconciliation(&tenant_id).await?))
}

async fn health(State(engine): State<Engine>) -> impl IntoResponse {
    if engine.health_check().await {
        let migrations = match engine.migration_status().await {
            Ok((known, applied)) => json!({ "known": known, "applied": applied }),
            Err(e) => {
                tracing::warn!(error = %e, "Migration status unavailable");
                serde_json::Value::Null
            }
        };
        (StatusCode::OK, Json(json!({ "status": "ok", "database": "ok", "migrations": migrations })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "database": "unreachable" })),
        )
    }
}

// =============================================================================
// Handler Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    use checkout_core::notification::signature_for;
    use checkout_core::{Money, ProductStock};
    use checkout_db::{Database, DbConfig};
    use checkout_engine::{
        ChargeRequest, ChargeResponse, EngineConfig, GatewayError, PaymentGateway, SystemClock,
    };

    const SERVER_KEY: &str = "api-test-key";

    #[derive(Default)]
    struct StubGateway {
        down: AtomicBool,
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(GatewayError::Transport("connection refused".into()));
            }
            Ok(ChargeResponse {
                transaction_id: format!("tx-{}", request.order_reference),
                redirect_url: format!("https://pay.example/{}", request.order_reference),
                expires_at: None,
            })
        }
    }

    async fn app(gateway: Arc<StubGateway>) -> Router {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        db.products()
            .insert(&ProductStock {
                id: "p-1".into(),
                tenant_id: "tenant-1".into(),
                sku: "SKU-1".into(),
                name: "Espresso beans".into(),
                stock_quantity: 5,
                price_cents: 1250,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let mut config = EngineConfig::default();
        config.payment.server_key = SERVER_KEY.into();
        router(Engine::new(db, config, gateway, Arc::new(SystemClock)))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() { serde_json::Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, json)
    }

    fn cart_body(qty: i64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "tenant_id": "tenant-1",
            "items": [{ "product_id": "p-1", "quantity": qty }],
        }))
        .unwrap()
    }

    fn notification_body(reference: &str, status: &str, gross_amount: &str, key: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "order_id": reference,
            "transaction_id": format!("tx-{reference}"),
            "transaction_status": status,
            "status_code": "200",
            "gross_amount": gross_amount,
            "payment_type": "qris",
            "signature_key": signature_for(reference, "200", gross_amount, key),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(Arc::new(StubGateway::default())).await;
        let (status, body) = send(&app, "GET", "/health", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["migrations"]["known"], body["migrations"]["applied"]);
    }

    #[tokio::test]
    async fn test_checkout_settle_complete() {
        let app = app(Arc::new(StubGateway::default())).await;

        let (status, receipt) = send(&app, "POST", "/checkout", cart_body(2)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(receipt["status"], "pending");
        assert_eq!(receipt["totalCents"], 2500);
        let reference = receipt["orderReference"].as_str().unwrap().to_string();
        assert!(receipt["paymentRedirectUrl"].as_str().unwrap().ends_with(&reference));
        assert!(receipt["reservationExpiresAt"].is_string());

        // Forged signature
        let amount = Money::from_cents(2500).to_decimal_string();
        let forged = notification_body(&reference, "settlement", &amount, "not-the-key");
        let (status, body) = send(&app, "POST", "/payments/notifications", forged).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "INVALID_SIGNATURE");

        let genuine = notification_body(&reference, "settlement", &amount, SERVER_KEY);
        let (status, body) = send(&app, "POST", "/payments/notifications", genuine.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "applied");
        assert_eq!(body["status"], "paid");

        let (status, body) = send(&app, "POST", "/payments/notifications", genuine).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "duplicate");

        let (status, details) = send(&app, "GET", &format!("/orders/{reference}"), Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(details["order"]["status"], "paid");
        assert_eq!(details["items"].as_array().unwrap().len(), 1);
        assert_eq!(details["reservations"][0]["status"], "converted");

        let uri = format!("/orders/{reference}/complete");
        let (status, body) = send(&app, "POST", &uri, Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
    }

    #[tokio::test]
    async fn test_checkout_errors() {
        let app = app(Arc::new(StubGateway::default())).await;

        let (status, _) = send(&app, "POST", "/checkout", cart_body(4)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, "POST", "/checkout", cart_body(2)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INSUFFICIENT_STOCK");

        let (status, body) = send(&app, "POST", "/checkout", cart_body(0)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let unknown = serde_json::to_vec(&json!({
            "tenant_id": "tenant-1",
            "items": [{ "product_id": "p-404", "quantity": 1 }],
        }))
        .unwrap();
        let (status, body) = send(&app, "POST", "/checkout", unknown).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_gateway_outage_is_bad_gateway() {
        let gateway = Arc::new(StubGateway::default());
        gateway.down.store(true, Ordering::SeqCst);
        let app = app(gateway.clone()).await;

        let (status, body) = send(&app, "POST", "/checkout", cart_body(5)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "PAYMENT_UNAVAILABLE");

        // The holds were released by compensation
        gateway.down.store(false, Ordering::SeqCst);
        let (status, _) = send(&app, "POST", "/checkout", cart_body(5)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_order_routes_for_unknown_and_pending_orders() {
        let app = app(Arc::new(StubGateway::default())).await;

        let (status, body) = send(&app, "GET", "/orders/ORD-NOPE", Vec::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (_, receipt) = send(&app, "POST", "/checkout", cart_body(1)).await;
        let reference = receipt["orderReference"].as_str().unwrap();
        let (status, body) = send(&app, "POST", &format!("/orders/{reference}/complete"), Vec::new()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_amount_mismatch_lands_in_reconciliation_queue() {
        let app = app(Arc::new(StubGateway::default())).await;
        let (_, receipt) = send(&app, "POST", "/checkout", cart_body(1)).await;
        let reference = receipt["orderReference"].as_str().unwrap().to_string();

        let (_, body) = send(&app, "GET", "/tenants/tenant-1/reconciliation", Vec::new()).await;
        assert!(body.as_array().unwrap().is_empty());

        let short = notification_body(&reference, "settlement", "1.00", SERVER_KEY);
        let (status, body) = send(&app, "POST", "/payments/notifications", short).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "flagged");

        let (status, body) = send(&app, "GET", "/tenants/tenant-1/reconciliation", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        let flagged = body.as_array().unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0]["reference"], reference.as_str());
        assert_eq!(flagged[0]["status"], "pending");
    }

    #[tokio::test]
    async fn test_malformed_notification() {
        let app = app(Arc::new(StubGateway::default())).await;

        let (status, body) = send(&app, "POST", "/payments/notifications", b"{\"order_id\":".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MALFORMED_NOTIFICATION");

        // Unknown orders are acknowledged
        let body = notification_body("ORD-NOPE", "settlement", "10.00", SERVER_KEY);
        let (status, body) = send(&app, "POST", "/payments/notifications", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "unknown_order");
    }
}
