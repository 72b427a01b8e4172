//! # Payment Notifications
//!
//! Wire type, signature verification and status mapping for the asynchronous
//! payment notifications the provider POSTs back after a charge.
//!
//! ## Verification Flow
//! ```text
//! raw body ──► parse() ──► verify_signature(server_key) ──► action()
//!    │             │                    │                       │
//!    │        Malformed (400)     InvalidSignature (403)   Convert / Release / Hold
//!    │
//!    └── nothing is written before verify_signature succeeds
//! ```
//!
//! The signature is `hex(SHA-512(order_id + status_code + gross_amount +
//! server_key))`, lowercase, compared byte for byte in constant time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

// =============================================================================
// Wire Type
// =============================================================================

/// A payment notification as sent by the provider.
///
/// `order_id` is the order *reference*, not the internal UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub order_id: String,
    pub transaction_id: String,
    pub transaction_status: String,
    pub status_code: String,
    pub gross_amount: String,
    #[serde(default)]
    pub payment_type: Option<String>,
    pub signature_key: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
}

/// What settlement does with a verified notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementAction {
    /// Convert holds, order → paid.
    Convert,
    /// Release holds, order → cancelled.
    Release,
    /// Record the notification only.
    Hold,
}

impl PaymentNotification {
    /// Parses a raw request body.
    pub fn parse(body: &[u8]) -> CoreResult<Self> {
        let notification: PaymentNotification =
            serde_json::from_slice(body).map_err(|e| CoreError::MalformedNotification {
                reason: e.to_string(),
            })?;

        for (field, value) in [
            ("order_id", &notification.order_id),
            ("transaction_id", &notification.transaction_id),
            ("transaction_status", &notification.transaction_status),
            ("signature_key", &notification.signature_key),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::MalformedNotification {
                    reason: format!("{field} is empty"),
                });
            }
        }

        Ok(notification)
    }

    /// Verifies `signature_key` against the shared server key.
    pub fn verify_signature(&self, server_key: &str) -> CoreResult<()> {
        let expected = signature_for(
            &self.order_id,
            &self.status_code,
            &self.gross_amount,
            server_key,
        );
        if constant_time_eq(expected.as_bytes(), self.signature_key.as_bytes()) {
            Ok(())
        } else {
            Err(CoreError::InvalidSignature)
        }
    }

    /// Deduplication key: `transaction_id:transaction_status[:fraud_status]`.
    ///
    /// Two deliveries of the same provider event produce the same key; a
    /// genuine status change on the same transaction produces a new one.
    pub fn idempotency_key(&self) -> String {
        match self.fraud_status.as_deref() {
            Some(fraud) if !fraud.is_empty() => format!(
                "{}:{}:{}",
                self.transaction_id, self.transaction_status, fraud
            ),
            _ => format!("{}:{}", self.transaction_id, self.transaction_status),
        }
    }

    /// Parsed gross amount.
    pub fn gross_amount(&self) -> CoreResult<Money> {
        Ok(Money::parse_decimal(&self.gross_amount)?)
    }

    /// Maps the provider status to a settlement action.
    ///
    /// | transaction_status | fraud_status | action |
    /// |---|---|---|
    /// | settlement | any | Convert |
    /// | capture | accept / absent | Convert |
    /// | capture | challenge / other | Hold |
    /// | deny, cancel, expire, failure | any | Release |
    /// | pending, authorize, other | any | Hold |
    pub fn action(&self) -> SettlementAction {
        match self.transaction_status.as_str() {
            "settlement" => SettlementAction::Convert,
            "capture" => match self.fraud_status.as_deref() {
                None | Some("") | Some("accept") => SettlementAction::Convert,
                Some(_) => SettlementAction::Hold,
            },
            "deny" | "cancel" | "expire" | "failure" => SettlementAction::Release,
            _ => SettlementAction::Hold,
        }
    }
}

// =============================================================================
// Signature
// =============================================================================

/// Computes the lowercase hex SHA-512 signature for a notification.
pub fn signature_for(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Byte comparison whose running time does not depend on where the inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_KEY: &str = "SB-server-key-test";

    fn notification(status: &str, fraud: Option<&str>) -> PaymentNotification {
        let signature = signature_for("ORD-20260301-ABCDEF12", "200", "150000.00", SERVER_KEY);
        PaymentNotification {
            order_id: "ORD-20260301-ABCDEF12".to_string(),
            transaction_id: "tx-1".to_string(),
            transaction_status: status.to_string(),
            status_code: "200".to_string(),
            gross_amount: "150000.00".to_string(),
            payment_type: Some("bank_transfer".to_string()),
            signature_key: signature,
            fraud_status: fraud.map(str::to_string),
        }
    }

    #[test]
    fn test_valid_signature_accepted() {
        assert!(notification("settlement", None)
            .verify_signature(SERVER_KEY)
            .is_ok());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let result = notification("settlement", None).verify_signature("other-key");
        assert!(matches!(result, Err(CoreError::InvalidSignature)));
    }

    #[test]
    fn test_tampered_amount_rejected() {
        let mut n = notification("settlement", None);
        n.gross_amount = "1.00".to_string();
        assert!(matches!(
            n.verify_signature(SERVER_KEY),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn test_signature_comparison_is_case_sensitive() {
        let mut n = notification("settlement", None);
        n.signature_key = n.signature_key.to_ascii_uppercase();
        assert!(n.verify_signature(SERVER_KEY).is_err());
    }

    #[test]
    fn test_signature_is_sha512_hex() {
        let sig = signature_for("a", "b", "c", "d");
        assert_eq!(sig.len(), 128);
        assert!(sig.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(notification("settlement", None).action(), SettlementAction::Convert);
        assert_eq!(notification("capture", None).action(), SettlementAction::Convert);
        assert_eq!(notification("capture", Some("accept")).action(), SettlementAction::Convert);
        assert_eq!(notification("capture", Some("challenge")).action(), SettlementAction::Hold);
        for status in ["deny", "cancel", "expire", "failure"] {
            assert_eq!(notification(status, None).action(), SettlementAction::Release);
        }
        for status in ["pending", "authorize", "refund"] {
            assert_eq!(notification(status, None).action(), SettlementAction::Hold);
        }
    }

    #[test]
    fn test_idempotency_key() {
        assert_eq!(notification("settlement", None).idempotency_key(), "tx-1:settlement");
        assert_eq!(
            notification("capture", Some("challenge")).idempotency_key(),
            "tx-1:capture:challenge"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            PaymentNotification::parse(b"not json"),
            Err(CoreError::MalformedNotification { .. })
        ));
        assert!(matches!(
            PaymentNotification::parse(br#"{"order_id":"x"}"#),
            Err(CoreError::MalformedNotification { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_empty_fields() {
        let mut n = notification("settlement", None);
        n.transaction_id = " ".to_string();
        let body = serde_json::to_vec(&n).unwrap();
        assert!(PaymentNotification::parse(&body).is_err());
    }

    #[test]
    fn test_parse_accepts_optional_fields_missing() {
        let body = br#"{
            "order_id": "ORD-1",
            "transaction_id": "tx-9",
            "transaction_status": "pending",
            "status_code": "201",
            "gross_amount": "10.00",
            "signature_key": "abc"
        }"#;
        let n = PaymentNotification::parse(body).unwrap();
        assert_eq!(n.fraud_status, None);
        assert_eq!(n.payment_type, None);
        assert_eq!(n.gross_amount().unwrap().cents(), 1000);
    }
}
