//! Status enums for payments and hosted checkout sessions.

use serde::{Deserialize, Serialize};

/// Payment intent status as reported by the payment processor.
///
/// Unknown values are preserved in [`PaymentStatus::Other`] so a processor
/// API upgrade never turns a status lookup into a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(untagged)]
    Other(String),
}

impl PaymentStatus {
    /// Whether the status can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Canceled)
    }

    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the customer sees after being redirected back from payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnOutcome {
    /// Order confirmed; offer "continue shopping".
    Confirmed,
    /// Payment still processing; ask the customer to wait.
    Processing,
    /// Payment failed; offer "try again".
    Failed,
    /// Status not yet known.
    Pending,
}

impl ReturnOutcome {
    /// Map a status lookup (or its failure) to the return-page outcome.
    #[must_use]
    pub fn from_lookup(status: Option<&PaymentStatus>) -> Self {
        match status {
            Some(PaymentStatus::Succeeded) => Self::Confirmed,
            Some(PaymentStatus::Processing) => Self::Processing,
            Some(PaymentStatus::RequiresPaymentMethod) | None => Self::Failed,
            Some(_) => Self::Pending,
        }
    }
}

/// Hosted checkout session status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutSessionStatus {
    Open,
    Complete,
    Expired,
    #[serde(untagged)]
    Other(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_parses_known_values() {
        let status: PaymentStatus = serde_json::from_str("\"requires_payment_method\"").unwrap();
        assert_eq!(status, PaymentStatus::RequiresPaymentMethod);

        let status: PaymentStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert!(status.is_terminal());
    }

    #[test]
    fn test_payment_status_preserves_unknown_values() {
        let status: PaymentStatus = serde_json::from_str("\"on_hold\"").unwrap();
        assert_eq!(status, PaymentStatus::Other("on_hold".to_string()));
        assert_eq!(status.to_string(), "on_hold");
        assert!(!status.is_terminal());
    }

    #[test]
    fn test_return_outcome_mapping() {
        assert_eq!(
            ReturnOutcome::from_lookup(Some(&PaymentStatus::Succeeded)),
            ReturnOutcome::Confirmed
        );
        assert_eq!(
            ReturnOutcome::from_lookup(Some(&PaymentStatus::Processing)),
            ReturnOutcome::Processing
        );
        assert_eq!(
            ReturnOutcome::from_lookup(Some(&PaymentStatus::RequiresPaymentMethod)),
            ReturnOutcome::Failed
        );
        assert_eq!(ReturnOutcome::from_lookup(None), ReturnOutcome::Failed);
        assert_eq!(
            ReturnOutcome::from_lookup(Some(&PaymentStatus::RequiresAction)),
            ReturnOutcome::Pending
        );
    }

    #[test]
    fn test_checkout_session_status() {
        let status: CheckoutSessionStatus = serde_json::from_str("\"complete\"").unwrap();
        assert_eq!(status, CheckoutSessionStatus::Complete);
    }
}
