//! # Order State Machine
//!
//! Legal order status transitions.
//!
//! ```text
//!                 settlement / capture
//!   ┌─────────┐ ──────────────────────► ┌─────────┐  fulfillment  ┌───────────┐
//!   │ pending │                         │  paid   │ ────────────► │ completed │
//!   └────┬────┘                         └────┬────┘               └───────────┘
//!        │ deny/cancel/expire/failure        │ cancel (reconciliation)
//!        │                                   │
//!        ▼                                   ▼
//!   ┌───────────────────────────────────────────┐
//!   │                 cancelled                 │
//!   └───────────────────────────────────────────┘
//! ```
//!
//! `completed` and `cancelled` are terminal. Re-applying the current status is
//! not a transition: callers check [`OrderStatus::is`] first and treat a
//! repeat as an idempotent no-op.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// The lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created at checkout; stock is held, payment outstanding.
    Pending,
    /// Payment settled; holds converted into stock decrements.
    Paid,
    /// Fulfilled by the merchant.
    Completed,
    /// Payment failed, expired or was cancelled.
    Cancelled,
}

impl OrderStatus {
    /// Stable lowercase name (also the database representation).
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is possible.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    #[inline]
    pub fn is(&self, other: OrderStatus) -> bool {
        *self == other
    }

    /// Whether `self → next` is an edge of the machine.
    pub const fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Paid, OrderStatus::Completed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Cancelled)
        )
    }

    /// Validates `self → next`, returning `next` on success.
    ///
    /// ## Example
    /// ```rust
    /// use checkout_core::order::OrderStatus;
    /// use checkout_core::CoreError;
    ///
    /// assert_eq!(OrderStatus::Paid.transition_to(OrderStatus::Completed).unwrap(), OrderStatus::Completed);
    /// assert!(matches!(
    ///     OrderStatus::Cancelled.transition_to(OrderStatus::Paid),
    ///     Err(CoreError::InvalidTransition { .. })
    /// ));
    /// ```
    pub fn transition_to(self, next: OrderStatus) -> CoreResult<OrderStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Pending
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(CoreError::Validation(
                crate::error::ValidationError::InvalidFormat {
                    field: "status".to_string(),
                    reason: format!("unknown order status '{other}'"),
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    #[test]
    fn test_happy_path() {
        let status = OrderStatus::Pending;
        let status = status.transition_to(OrderStatus::Paid).unwrap();
        let status = status.transition_to(OrderStatus::Completed).unwrap();
        assert!(status.is_terminal());
    }

    #[test]
    fn test_cancellation_edges() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_terminal_states_reject_paid() {
        for from in [OrderStatus::Completed, OrderStatus::Cancelled] {
            match from.transition_to(OrderStatus::Paid) {
                Err(CoreError::InvalidTransition { from: f, to }) => {
                    assert_eq!(f, from);
                    assert_eq!(to, OrderStatus::Paid);
                }
                other => panic!("expected InvalidTransition, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for from in [OrderStatus::Completed, OrderStatus::Cancelled] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_self_transition_is_not_an_edge() {
        for status in ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_no_backwards_edges() {
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Completed));
    }

    #[test]
    fn test_round_trip_str() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<OrderStatus>().is_err());
    }
}
