//! Payment configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::domain::subscription::Subscription;

/// Which gateway adapter handles charges.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    #[default]
    Stripe,
    /// Always-succeeding in-process gateway for local development.
    Mock,
}

/// Payment gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    #[serde(default)]
    pub provider: PaymentProvider,

    pub stripe_api_key: Option<SecretString>,

    pub stripe_webhook_secret: Option<SecretString>,

    /// Override for the Stripe API base URL
    pub stripe_api_base_url: Option<String>,

    /// Where customers return after 3-D Secure
    pub return_url: Option<String>,

    /// ISO 4217 currency code charged for every plan
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Upper bound on a single gateway call; a timeout counts as a failed charge
    #[serde(default = "default_charge_timeout")]
    pub charge_timeout_secs: u64,

    /// How long a charge may wait for customer confirmation before it is abandoned
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,
}

impl PaymentConfig {
    pub fn charge_timeout(&self) -> Duration {
        Duration::from_secs(self.charge_timeout_secs)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key
            .as_ref()
            .map(|k| k.expose_secret().starts_with("sk_test_"))
            .unwrap_or(false)
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency);
        }

        // A charge must settle well inside the renewal claim window.
        let max_timeout = Subscription::RENEWAL_CLAIM_TTL_SECS / 2;
        if self.charge_timeout_secs == 0 || self.charge_timeout_secs > max_timeout {
            return Err(ValidationError::InvalidChargeTimeout { max: max_timeout });
        }
        // Pending records younger than an in-flight charge must not be swept.
        if self.pending_timeout_secs < 60 || self.pending_timeout_secs <= 2 * self.charge_timeout_secs {
            return Err(ValidationError::InvalidPendingTimeout);
        }

        if self.provider == PaymentProvider::Mock {
            return Ok(());
        }

        let api_key = self
            .stripe_api_key
            .as_ref()
            .ok_or(ValidationError::MissingRequired("PAYMENT__STRIPE_API_KEY"))?;
        let webhook_secret = self
            .stripe_webhook_secret
            .as_ref()
            .ok_or(ValidationError::MissingRequired("PAYMENT__STRIPE_WEBHOOK_SECRET"))?;

        if !api_key.expose_secret().starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !webhook_secret.expose_secret().starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }

        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            provider: PaymentProvider::default(),
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base_url: None,
            return_url: None,
            currency: default_currency(),
            charge_timeout_secs: default_charge_timeout(),
            pending_timeout_secs: default_pending_timeout(),
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_charge_timeout() -> u64 {
    30
}

fn default_pending_timeout() -> u64 {
    3600
}
