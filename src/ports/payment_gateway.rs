//! Payment gateway port for external payment processing.
//!
//! The engine never sees card data. It forwards an opaque payment token and
//! receives a success flag plus the processor's payment id.
//!
//! # Design
//!
//! - **Gateway agnostic**: `charge` is the only outbound operation
//! - **Idempotent**: Every charge carries an idempotency key derived from the
//!   subscription and period, so a retried request cannot double-charge
//! - **Declines are values**: A declined card is `Ok(ChargeResult { success: false, .. })`;
//!   `Err(PaymentError)` means the gateway could not give an answer

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId};

/// Port for payment gateway integrations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge `amount_cents` against the payment method behind `payment_token`.
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResult, PaymentError>;

    /// Verify a signed gateway notification and parse it.
    ///
    /// Returns `Ok(None)` for authentic notifications this engine does not act on.
    fn verify_notification(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<Option<PaymentNotification>, PaymentError>;
}

/// Request to charge a payment method once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub amount_cents: i64,
    /// ISO 4217 code, lowercase (e.g. "usd").
    pub currency: String,
    /// Opaque token from the client-side payment form.
    pub payment_token: String,
    pub idempotency_key: String,
    /// Attached as gateway metadata so notifications can be routed back.
    pub subscription_id: SubscriptionId,
}

/// Answer from the gateway for one charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeResult {
    pub success: bool,
    pub external_payment_id: String,
    pub failure_reason: Option<String>,
    /// Present when the customer must complete an extra step (e.g. 3-D Secure).
    pub redirect_url: Option<String>,
}

impl ChargeResult {
    pub fn succeeded(external_payment_id: impl Into<String>) -> Self {
        Self {
            success: true,
            external_payment_id: external_payment_id.into(),
            failure_reason: None,
            redirect_url: None,
        }
    }

    pub fn declined(external_payment_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            external_payment_id: external_payment_id.into(),
            failure_reason: Some(reason.into()),
            redirect_url: None,
        }
    }

    pub fn requires_action(
        external_payment_id: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            external_payment_id: external_payment_id.into(),
            failure_reason: None,
            redirect_url: Some(redirect_url.into()),
        }
    }

    /// Returns true if the charge is neither settled nor declined yet.
    pub fn needs_customer_action(&self) -> bool {
        !self.success && self.redirect_url.is_some()
    }
}

/// Authenticated asynchronous notification from the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    /// Gateway event id, unique per notification.
    pub event_id: String,
    pub external_payment_id: String,
    pub subscription_id: SubscriptionId,
    /// Idempotency key of the charge attempt, echoed back from gateway metadata.
    #[serde(default)]
    pub charge_key: Option<String>,
    pub outcome: NotificationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Succeeded { amount_cents: i64 },
    Failed { reason: String },
}

/// Errors from payment gateway operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentError {
    pub code: PaymentErrorCode,
    pub message: String,
    /// Gateway's own error code (if available).
    pub provider_code: Option<String>,
    pub retryable: bool,
}

impl PaymentError {
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::Timeout, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::ProviderError, message)
    }

    pub fn invalid_webhook(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::InvalidWebhook, message)
    }
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PaymentError {}

impl From<PaymentError> for DomainError {
    fn from(err: PaymentError) -> Self {
        let code = match err.code {
            PaymentErrorCode::Timeout => ErrorCode::PaymentTimeout,
            PaymentErrorCode::InvalidWebhook => ErrorCode::InvalidWebhookSignature,
            _ => ErrorCode::PaymentFailed,
        };
        DomainError::new(code, err.message)
    }
}

/// Payment error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorCode {
    NetworkError,
    Timeout,
    AuthenticationError,
    RateLimitExceeded,
    InvalidWebhook,
    ProviderError,
}

impl PaymentErrorCode {
    /// Check if this error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentErrorCode::NetworkError
                | PaymentErrorCode::Timeout
                | PaymentErrorCode::RateLimitExceeded
        )
    }
}

impl std::fmt::Display for PaymentErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentErrorCode::NetworkError => "network_error",
            PaymentErrorCode::Timeout => "timeout",
            PaymentErrorCode::AuthenticationError => "authentication_error",
            PaymentErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            PaymentErrorCode::InvalidWebhook => "invalid_webhook",
            PaymentErrorCode::ProviderError => "provider_error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn _accepts_dyn(_: &dyn PaymentGateway) {}

    #[test]
    fn requires_action_is_not_success() {
        let result = ChargeResult::requires_action("pi_1", "https://bank.example/3ds");
        assert!(!result.success);
        assert!(result.needs_customer_action());
    }

    #[test]
    fn decline_is_not_pending_action() {
        let result = ChargeResult::declined("pi_1", "card_declined");
        assert!(!result.needs_customer_action());
    }

    #[test]
    fn timeouts_map_to_payment_timeout_code() {
        let err: DomainError = PaymentError::timeout("slow").into();
        assert_eq!(err.code, ErrorCode::PaymentTimeout);
    }

    #[test]
    fn network_errors_are_retryable() {
        assert!(PaymentError::network("reset").retryable);
        assert!(!PaymentError::provider("bad request").retryable);
    }
}
