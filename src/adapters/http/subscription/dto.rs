//! HTTP DTOs (Data Transfer Objects) for subscription endpoints.
//!
//! Wire names are camelCase. Identifiers arrive as plain strings and are
//! validated by the handlers so a bad value yields a field-level 400 rather
//! than a generic extractor rejection.

use serde::{Deserialize, Serialize};

use crate::application::handlers::subscription::SubscriptionSummary;
use crate::domain::subscription::{AuthorStats, PlanType, SubscriptionStatus};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to subscribe a reader to an author.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub subscriber_id: String,
    pub author_id: String,
    pub plan_type: PlanType,
    /// Opaque token from the client-side payment form.
    pub payment_token: String,
    #[serde(default)]
    pub discount_code: Option<String>,
}

/// Request to cancel a subscription.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSubscriptionRequest {
    pub subscription_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Defaults to cancelling at period end.
    #[serde(default)]
    pub immediately: bool,
}

/// Request to renew a cancelled or expired subscription.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewSubscriptionRequest {
    pub subscription_id: String,
    /// New token if the subscriber changed card.
    #[serde(default)]
    pub payment_token: Option<String>,
}

/// Query string for listing a subscriber's subscriptions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSubscriptionsParams {
    #[serde(default)]
    pub active_only: bool,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Response for subscription creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionResponse {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    /// Only present when the customer must authenticate the charge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// Subscription summary returned by cancel, renew and the read endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: String,
    pub subscriber_id: String,
    pub author_id: String,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub price_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percent: Option<u8>,
    /// ISO 8601.
    pub started_at: String,
    pub expires_at: String,
    pub next_billing_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_expires_at: Option<String>,
    pub cancelled_at: Option<String>,
    pub cancellation_reason: Option<String>,
    pub auto_renewal: bool,
    pub total_paid_cents: i64,
    pub last_payment_id: Option<String>,
    pub has_access: bool,
    /// Only present when a renewal awaits customer authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

impl From<SubscriptionSummary> for SubscriptionResponse {
    fn from(summary: SubscriptionSummary) -> Self {
        Self {
            id: summary.id.to_string(),
            subscriber_id: summary.subscriber_id.to_string(),
            author_id: summary.author_id.to_string(),
            plan_type: summary.plan,
            status: summary.status,
            price_cents: summary.price_cents,
            discount_percent: summary.discount_percent.map(|p| p.value()),
            started_at: summary.started_at.as_datetime().to_rfc3339(),
            expires_at: summary.expires_at.as_datetime().to_rfc3339(),
            next_billing_date: summary.next_billing_date.map(|t| t.as_datetime().to_rfc3339()),
            trial_expires_at: summary.trial_expires_at.map(|t| t.as_datetime().to_rfc3339()),
            cancelled_at: summary.cancelled_at.map(|t| t.as_datetime().to_rfc3339()),
            cancellation_reason: summary.cancellation_reason,
            auto_renewal: summary.auto_renewal,
            total_paid_cents: summary.total_paid_cents,
            last_payment_id: summary.last_payment_id,
            has_access: summary.has_access,
            redirect_url: None,
        }
    }
}

/// Response for a subscriber's subscription list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionListResponse {
    pub subscriptions: Vec<SubscriptionResponse>,
}

/// Author revenue figures. Amounts are in cents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorStatsResponse {
    pub total_subscriptions: u64,
    pub active_subscriptions: u64,
    pub monthly_revenue: i64,
    pub total_revenue: i64,
}

impl From<AuthorStats> for AuthorStatsResponse {
    fn from(stats: AuthorStats) -> Self {
        Self {
            total_subscriptions: stats.total_subscriptions,
            active_subscriptions: stats.active_subscriptions,
            monthly_revenue: stats.monthly_revenue_cents,
            total_revenue: stats.total_revenue_cents,
        }
    }
}

/// Acknowledgement for a gateway webhook.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    /// `applied` or `ignored`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Response DTO
// ════════════════════════════════════════════════════════════════════════════════

/// Standard error response for API errors.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error_code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{AuthorId, SubscriberId, SubscriptionId, Timestamp};

    #[test]
    fn create_request_uses_camel_case() {
        let json = r#"{
            "subscriberId": "reader-1",
            "authorId": "author-1",
            "planType": "yearly",
            "paymentToken": "pm_card_visa"
        }"#;
        let request: CreateSubscriptionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.plan_type, PlanType::Yearly);
        assert_eq!(request.payment_token, "pm_card_visa");
        assert!(request.discount_code.is_none());
    }

    #[test]
    fn unknown_plan_type_is_rejected() {
        let json = r#"{
            "subscriberId": "reader-1",
            "authorId": "author-1",
            "planType": "weekly",
            "paymentToken": "pm_card_visa"
        }"#;
        assert!(serde_json::from_str::<CreateSubscriptionRequest>(json).is_err());
    }

    #[test]
    fn cancel_request_defaults_to_period_end() {
        let json = r#"{"subscriptionId": "00000000-0000-0000-0000-000000000000"}"#;
        let request: CancelSubscriptionRequest = serde_json::from_str(json).unwrap();
        assert!(!request.immediately);
        assert!(request.reason.is_none());
    }

    #[test]
    fn create_response_omits_redirect_when_absent() {
        let response = CreateSubscriptionResponse {
            subscription_id: "abc".to_string(),
            status: SubscriptionStatus::Active,
            redirect_url: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["subscriptionId"], "abc");
        assert_eq!(json["status"], "active");
        assert!(json.get("redirectUrl").is_none());
    }

    #[test]
    fn stats_response_uses_wire_names() {
        let response = AuthorStatsResponse::from(AuthorStats {
            total_subscriptions: 4,
            active_subscriptions: 2,
            monthly_revenue_cents: 1000,
            total_revenue_cents: 7000,
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["totalSubscriptions"], 4);
        assert_eq!(json["activeSubscriptions"], 2);
        assert_eq!(json["monthlyRevenue"], 1000);
        assert_eq!(json["totalRevenue"], 7000);
    }

    #[test]
    fn summary_maps_to_response() {
        let now = Timestamp::now();
        let summary = SubscriptionSummary {
            id: SubscriptionId::new(),
            subscriber_id: SubscriberId::new("reader-1").unwrap(),
            author_id: AuthorId::new("author-1").unwrap(),
            plan: PlanType::Lifetime,
            status: SubscriptionStatus::Active,
            price_cents: 20000,
            discount_percent: None,
            started_at: now,
            expires_at: now.add_days(36500),
            next_billing_date: None,
            trial_expires_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            auto_renewal: false,
            total_paid_cents: 20000,
            last_payment_id: Some("pi_1".to_string()),
            has_access: true,
        };

        let response = SubscriptionResponse::from(summary.clone());
        assert_eq!(response.id, summary.id.to_string());
        assert_eq!(response.started_at, now.as_datetime().to_rfc3339());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["planType"], "lifetime");
        assert!(json["nextBillingDate"].is_null());
        assert!(json.get("discountPercent").is_none());
    }
}
