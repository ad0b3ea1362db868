//! Stripe-specific wire types for charges and webhooks.
//!
//! These types mirror the parts of Stripe's PaymentIntent API that the
//! gateway reads. Unknown fields are ignored so API version bumps do not
//! break parsing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ════════════════════════════════════════════════════════════════════════════════
// Signature Parsing
// ════════════════════════════════════════════════════════════════════════════════

/// Error parsing the Stripe-Signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureParseError {
    /// Header is empty or missing.
    MissingHeader,
    /// Missing timestamp component (t=...).
    MissingTimestamp,
    /// Missing v1 signature component.
    MissingV1Signature,
    /// Invalid timestamp format.
    InvalidTimestamp,
    /// Invalid signature format (not valid hex).
    InvalidSignatureFormat,
}

impl std::fmt::Display for SignatureParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHeader => write!(f, "Missing Stripe-Signature header"),
            Self::MissingTimestamp => write!(f, "Missing timestamp (t=) in signature"),
            Self::MissingV1Signature => write!(f, "Missing v1 signature in header"),
            Self::InvalidTimestamp => write!(f, "Invalid timestamp format"),
            Self::InvalidSignatureFormat => write!(f, "Invalid signature format (not valid hex)"),
        }
    }
}

impl std::error::Error for SignatureParseError {}

/// Parsed Stripe-Signature header components.
///
/// The header format is `t=timestamp,v1=signature[,v1=signature...]`.
/// Stripe sends several `v1` entries while a signing secret is being
/// rolled; any one of them may match.
#[derive(Debug, Clone)]
pub struct SignatureHeader {
    /// Unix timestamp when Stripe generated the event.
    pub timestamp: i64,

    /// Candidate v1 signatures (HMAC-SHA256).
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureParseError> {
        if header.trim().is_empty() {
            return Err(SignatureParseError::MissingHeader);
        }

        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or(SignatureParseError::MissingTimestamp)?;

            match key.trim() {
                "t" => {
                    timestamp = Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| SignatureParseError::InvalidTimestamp)?,
                    );
                }
                "v1" => {
                    let bytes = hex::decode(value.trim())
                        .map_err(|_| SignatureParseError::InvalidSignatureFormat)?;
                    v1_signatures.push(bytes);
                }
                // v0 and unknown schemes are ignored
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureParseError::MissingTimestamp)?;
        if v1_signatures.is_empty() {
            return Err(SignatureParseError::MissingV1Signature);
        }

        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Stripe Event Types
// ════════════════════════════════════════════════════════════════════════════════

/// Stripe webhook event envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeWebhookEvent {
    /// Unique event identifier (evt_...).
    pub id: String,

    /// Event type (e.g., "payment_intent.succeeded").
    #[serde(rename = "type")]
    pub event_type: String,

    pub created: i64,

    pub data: StripeEventData,

    #[serde(default)]
    pub livemode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEventData {
    /// The object affected by this event.
    pub object: serde_json::Value,
}

// ════════════════════════════════════════════════════════════════════════════════
// PaymentIntent
// ════════════════════════════════════════════════════════════════════════════════

/// Stripe PaymentIntent object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePaymentIntent {
    /// Unique identifier (pi_...).
    pub id: String,

    /// requires_payment_method, requires_action, processing, succeeded, canceled, ...
    pub status: String,

    /// Amount in the smallest currency unit.
    pub amount: i64,

    #[serde(default)]
    pub amount_received: i64,

    pub currency: String,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    pub last_payment_error: Option<StripeApiError>,

    pub next_action: Option<StripeNextAction>,
}

impl StripePaymentIntent {
    /// Human-readable reason for the most recent failure.
    pub fn failure_reason(&self) -> String {
        self.last_payment_error
            .as_ref()
            .map(StripeApiError::reason)
            .unwrap_or_else(|| self.status.clone())
    }

    /// URL the customer must visit to authenticate, if any.
    pub fn redirect_url(&self) -> Option<&str> {
        self.next_action
            .as_ref()
            .and_then(|a| a.redirect_to_url.as_ref())
            .map(|r| r.url.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeNextAction {
    #[serde(rename = "type")]
    pub action_type: String,

    pub redirect_to_url: Option<StripeRedirect>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeRedirect {
    pub url: String,
}

/// Error object returned in API error bodies and `last_payment_error`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StripeApiError {
    /// card_error, invalid_request_error, api_error, ...
    #[serde(rename = "type", default)]
    pub error_type: String,

    pub code: Option<String>,

    pub decline_code: Option<String>,

    pub message: Option<String>,

    /// Present on card errors raised while confirming an intent.
    pub payment_intent: Option<Box<StripePaymentIntent>>,
}

impl StripeApiError {
    /// Most specific machine-readable reason available.
    pub fn reason(&self) -> String {
        self.decline_code
            .clone()
            .or_else(|| self.code.clone())
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| self.error_type.clone())
    }

    pub fn is_card_error(&self) -> bool {
        self.error_type == "card_error"
    }
}

/// Body of a non-2xx Stripe API response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeErrorBody {
    pub error: StripeApiError,
}
