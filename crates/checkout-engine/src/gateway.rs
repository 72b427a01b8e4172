//! # Payment Gateway
//!
//! Charge creation at the payment provider.
//!
//! ```text
//!   POST {base_url}/charges            basic auth: server_key
//!   {
//!     "order_id": "ORD-20260301-1A2B3C4D",
//!     "gross_amount": "125000.00",
//!     "expiry_secs": 900
//!   }
//!
//!   201 { "transaction_id": "...", "redirect_url": "...", "expiry_time": "..." }
//! ```
//!
//! Transport errors and 5xx/429 answers are retried with exponential backoff
//! until `max_elapsed_secs`; any other 4xx fails immediately. The call is
//! always made outside every lock and transaction.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use checkout_core::Money;

use crate::config::PaymentSettings;
use crate::error::GatewayError;

/// Charge request for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Order reference; the provider echoes it back as `order_id`.
    pub order_reference: String,
    pub gross_amount: Money,
    pub expiry_secs: i64,
}

/// What the provider returns for a created charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub transaction_id: String,
    pub redirect_url: String,
    #[serde(default, rename = "expiry_time")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError>;
}

#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    order_id: &'a str,
    gross_amount: String,
    expiry_secs: i64,
}

/// HTTP implementation backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    server_key: String,
    initial_backoff: Duration,
    max_elapsed: Duration,
}

impl HttpPaymentGateway {
    pub fn new(settings: &PaymentSettings) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(HttpPaymentGateway {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            server_key: settings.server_key.clone(),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_elapsed: Duration::from_secs(settings.max_elapsed_secs),
        })
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            current_interval: self.initial_backoff,
            max_interval: self.max_elapsed.max(self.initial_backoff),
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }

    async fn send_once(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        let body = ChargeBody {
            order_id: &request.order_reference,
            gross_amount: request.gross_amount.to_decimal_string(),
            expiry_secs: request.expiry_secs,
        };

        let response = self
            .client
            .post(format!("{}/charges", self.base_url))
            .basic_auth(&self.server_key, None::<&str>)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let charge: ChargeResponse = response
                .json()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            if charge.transaction_id.is_empty() || charge.redirect_url.is_empty() {
                return Err(GatewayError::InvalidResponse(
                    "transaction_id and redirect_url are required".into(),
                ));
            }
            return Ok(charge);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(GatewayError::ServerError { status: status.as_u16(), body })
        } else {
            Err(GatewayError::Rejected { status: status.as_u16(), body })
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        debug!(reference = %request.order_reference, amount = %request.gross_amount, "Requesting charge");

        let operation = move || async move {
            self.send_once(request).await.map_err(|e| {
                if e.is_transient() {
                    warn!(reference = %request.order_reference, error = %e, "Charge attempt failed, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        };

        backoff::future::retry(self.create_backoff(), operation).await
    }
}
