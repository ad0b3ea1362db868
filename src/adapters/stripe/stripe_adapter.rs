//! Stripe payment gateway adapter.
//!
//! Implements `PaymentGateway` on top of Stripe PaymentIntents. Each charge
//! creates and confirms an intent in one request, keyed by the caller's
//! idempotency key so a retried charge never bills twice.
//!
//! # Security
//!
//! - HMAC-SHA256 signature verification with constant-time comparison
//! - Timestamp validation (5-minute window) for replay attack prevention
//! - Secrets handled via `secrecy::SecretString`

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::foundation::SubscriptionId;
use crate::ports::{
    ChargeRequest, ChargeResult, NotificationOutcome, PaymentError, PaymentErrorCode,
    PaymentGateway, PaymentNotification,
};

use super::webhook_types::{
    SignatureHeader, StripeErrorBody, StripePaymentIntent, StripeWebhookEvent,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age for webhook events (5 minutes).
const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Clock skew tolerance for future timestamps (60 seconds).
const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

/// Metadata key linking an intent back to its subscription.
const SUBSCRIPTION_METADATA_KEY: &str = "subscription_id";

/// Metadata key linking an intent back to the charge attempt that created it.
const CHARGE_KEY_METADATA_KEY: &str = "charge_key";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    /// Where the customer lands after completing 3-D Secure.
    return_url: Option<String>,

    /// Whether to require livemode events in production.
    require_livemode: bool,
}

impl StripeConfig {
    pub fn new(api_key: SecretString, webhook_secret: SecretString) -> Self {
        Self {
            api_key,
            webhook_secret,
            api_base_url: "https://api.stripe.com".to_string(),
            return_url: None,
            require_livemode: false,
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_return_url(mut self, url: impl Into<String>) -> Self {
        self.return_url = Some(url.into());
        self
    }

    /// Require livemode events in production.
    pub fn with_require_livemode(mut self, require: bool) -> Self {
        self.require_livemode = require;
        self
    }
}

/// Stripe payment gateway.
pub struct StripePaymentGateway {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripePaymentGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    /// Verify webhook signature using HMAC-SHA256.
    fn verify_signature(&self, payload: &[u8], header: &SignatureHeader) -> Result<(), PaymentError> {
        let now = chrono::Utc::now().timestamp();
        let age = now - header.timestamp;

        if age > MAX_TIMESTAMP_AGE_SECS {
            tracing::warn!(
                event_timestamp = header.timestamp,
                current_time = now,
                age_secs = age,
                "Webhook event too old - possible replay attack"
            );
            return Err(PaymentError::invalid_webhook(format!(
                "Event too old ({} seconds)",
                age
            )));
        }

        if age < -MAX_FUTURE_TOLERANCE_SECS {
            tracing::warn!(
                event_timestamp = header.timestamp,
                current_time = now,
                "Webhook event from future - clock skew or manipulation"
            );
            return Err(PaymentError::invalid_webhook("Event timestamp in future"));
        }

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.expose_secret().as_bytes())
            .map_err(|e| PaymentError::invalid_webhook(format!("Unusable webhook secret: {}", e)))?;
        mac.update(header.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        let matched = header
            .v1_signatures
            .iter()
            .any(|candidate| expected.as_slice().ct_eq(candidate.as_slice()).unwrap_u8() == 1);

        if !matched {
            tracing::warn!("Invalid webhook signature");
            return Err(PaymentError::invalid_webhook("Invalid signature"));
        }

        Ok(())
    }

    /// Turns a verified event into a notification, or `None` for events
    /// this service does not act on.
    fn parse_event(&self, payload: &[u8]) -> Result<Option<PaymentNotification>, PaymentError> {
        let event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse webhook payload");
            PaymentError::invalid_webhook(format!("Invalid JSON: {}", e))
        })?;

        if self.config.require_livemode && !event.livemode {
            tracing::warn!(event_id = %event.id, "Rejected test mode event in production");
            return Err(PaymentError::invalid_webhook(
                "Test mode events not allowed in production",
            ));
        }

        let succeeded = match event.event_type.as_str() {
            "payment_intent.succeeded" => true,
            "payment_intent.payment_failed" => false,
            other => {
                tracing::debug!(event_id = %event.id, event_type = other, "Ignoring webhook event");
                return Ok(None);
            }
        };

        let intent: StripePaymentIntent = serde_json::from_value(event.data.object).map_err(|e| {
            PaymentError::invalid_webhook(format!("Invalid payment intent: {}", e))
        })?;

        let Some(subscription_id) = intent
            .metadata
            .get(SUBSCRIPTION_METADATA_KEY)
            .and_then(|raw| raw.parse::<SubscriptionId>().ok())
        else {
            tracing::warn!(
                event_id = %event.id,
                payment_intent = %intent.id,
                "Payment intent carries no subscription reference"
            );
            return Ok(None);
        };

        let outcome = if succeeded {
            NotificationOutcome::Succeeded {
                amount_cents: intent.amount_received,
            }
        } else {
            NotificationOutcome::Failed {
                reason: intent.failure_reason(),
            }
        };

        let charge_key = intent.metadata.get(CHARGE_KEY_METADATA_KEY).cloned();

        Ok(Some(PaymentNotification {
            event_id: event.id,
            external_payment_id: intent.id,
            subscription_id,
            charge_key,
            outcome,
        }))
    }

    /// Maps a confirmed intent to the gateway result.
    fn intent_result(intent: StripePaymentIntent) -> Result<ChargeResult, PaymentError> {
        match intent.status.as_str() {
            "succeeded" => Ok(ChargeResult::succeeded(intent.id)),
            "requires_action" => match intent.redirect_url() {
                Some(url) => Ok(ChargeResult::requires_action(intent.id.clone(), url)),
                None => Ok(ChargeResult::declined(intent.id.clone(), "unsupported_next_action")),
            },
            "requires_payment_method" | "canceled" => {
                let reason = intent.failure_reason();
                Ok(ChargeResult::declined(intent.id, reason))
            }
            // processing: settlement arrives later; fail closed here
            other => Err(PaymentError::provider(format!(
                "Payment intent {} left in status {}",
                intent.id, other
            ))),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripePaymentGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResult, PaymentError> {
        let url = format!("{}/v1/payment_intents", self.config.api_base_url);

        let mut params = vec![
            ("amount", request.amount_cents.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("payment_method", request.payment_token.clone()),
            ("confirm", "true".to_string()),
            (
                "metadata[subscription_id]",
                request.subscription_id.to_string(),
            ),
            ("metadata[charge_key]", request.idempotency_key.clone()),
        ];
        if let Some(return_url) = &self.config.return_url {
            params.push(("return_url", return_url.clone()));
        }

        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
            .header("Idempotency-Key", request.idempotency_key.as_str())
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PaymentError::timeout(e.to_string())
                } else {
                    PaymentError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let intent: StripePaymentIntent = response.json().await.map_err(|e| {
                PaymentError::provider(format!("Failed to parse Stripe response: {}", e))
            })?;
            return Self::intent_result(intent);
        }

        let error_text = response.text().await.unwrap_or_default();
        let body: Option<StripeErrorBody> = serde_json::from_str(&error_text).ok();

        if let Some(body) = body.as_ref().filter(|b| b.error.is_card_error()) {
            let payment_id = body
                .error
                .payment_intent
                .as_ref()
                .map(|pi| pi.id.clone())
                .unwrap_or_default();
            tracing::info!(
                subscription_id = %request.subscription_id,
                reason = %body.error.reason(),
                "Stripe declined charge"
            );
            return Ok(ChargeResult::declined(payment_id, body.error.reason()));
        }

        tracing::error!(status = %status, error = %error_text, "Stripe charge failed");
        let code = match status.as_u16() {
            401 | 403 => PaymentErrorCode::AuthenticationError,
            429 => PaymentErrorCode::RateLimitExceeded,
            _ => PaymentErrorCode::ProviderError,
        };
        let mut err = PaymentError::new(code, format!("Stripe API error: {}", status));
        if let Some(provider_code) = body.and_then(|b| b.error.code) {
            err = err.with_provider_code(provider_code);
        }
        Err(err)
    }

    fn verify_notification(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<Option<PaymentNotification>, PaymentError> {
        let header = SignatureHeader::parse(signature).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse Stripe-Signature header");
            PaymentError::invalid_webhook(e.to_string())
        })?;

        self.verify_signature(payload, &header)?;

        let notification = self.parse_event(payload)?;
        if let Some(n) = &notification {
            tracing::info!(
                event_id = %n.event_id,
                subscription_id = %n.subscription_id,
                "Webhook signature verified"
            );
        }
        Ok(notification)
    }
}
