//! HTTP handlers for subscription endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Json, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use crate::application::handlers::subscription::{
    AutoRenewSubscriptionHandler, CancelStalePendingHandler, CancelSubscriptionCommand,
    CancelSubscriptionHandler, ExpireSubscriptionHandler, ReconcileCountersHandler, ChargePolicy, ConfirmPaymentCommand,
    ConfirmPaymentHandler, ConfirmPaymentResult, CreateSubscriptionCommand,
    CreateSubscriptionHandler, GetAuthorStatsHandler, GetAuthorStatsQuery, GetSubscriptionHandler,
    GetSubscriptionQuery, ListSubscriberSubscriptionsHandler, ListSubscriberSubscriptionsQuery,
    PaymentOutcome, RenewSubscriptionCommand, RenewSubscriptionHandler, SubscriptionSummary,
};
use crate::domain::foundation::{AuthorId, SubscriberId, SubscriptionId};
use crate::domain::subscription::{DiscountCode, Subscription, SubscriptionError};
use crate::ports::{
    AuthorDirectory, Clock, DiscountValidator, EventPublisher, PaymentGateway, SubscriptionStore,
};

use super::dto::{
    AuthorStatsResponse, CancelSubscriptionRequest, CreateSubscriptionRequest,
    CreateSubscriptionResponse, ErrorResponse, ListSubscriptionsParams, RenewSubscriptionRequest,
    SubscriptionListResponse, SubscriptionResponse, WebhookResponse,
};

/// Header carrying the gateway's webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned per request; handlers are built on demand from the shared ports.
#[derive(Clone)]
pub struct SubscriptionAppState {
    pub store: Arc<dyn SubscriptionStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub authors: Arc<dyn AuthorDirectory>,
    pub discounts: Arc<dyn DiscountValidator>,
    pub event_publisher: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
    pub charge_policy: ChargePolicy,
}

impl SubscriptionAppState {
    pub fn create_handler(&self) -> CreateSubscriptionHandler {
        CreateSubscriptionHandler::new(
            self.store.clone(),
            self.gateway.clone(),
            self.authors.clone(),
            self.discounts.clone(),
            self.event_publisher.clone(),
            self.clock.clone(),
            self.charge_policy.clone(),
        )
    }

    pub fn cancel_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(
            self.store.clone(),
            self.event_publisher.clone(),
            self.clock.clone(),
        )
    }

    pub fn renew_handler(&self) -> RenewSubscriptionHandler {
        RenewSubscriptionHandler::new(
            self.store.clone(),
            self.gateway.clone(),
            self.event_publisher.clone(),
            self.clock.clone(),
            self.charge_policy.clone(),
        )
    }

    pub fn confirm_payment_handler(&self) -> ConfirmPaymentHandler {
        ConfirmPaymentHandler::new(
            self.store.clone(),
            self.gateway.clone(),
            self.event_publisher.clone(),
            self.clock.clone(),
        )
    }

    pub fn get_handler(&self) -> GetSubscriptionHandler {
        GetSubscriptionHandler::new(self.store.clone(), self.clock.clone())
    }

    pub fn list_handler(&self) -> ListSubscriberSubscriptionsHandler {
        ListSubscriberSubscriptionsHandler::new(self.store.clone(), self.clock.clone())
    }

    pub fn stats_handler(&self) -> GetAuthorStatsHandler {
        GetAuthorStatsHandler::new(self.store.clone(), self.authors.clone())
    }

    // Background handlers, shared with the expiration sweeper.

    pub fn auto_renew_handler(&self) -> AutoRenewSubscriptionHandler {
        AutoRenewSubscriptionHandler::new(
            self.store.clone(),
            self.gateway.clone(),
            self.event_publisher.clone(),
            self.clock.clone(),
            self.charge_policy.clone(),
        )
    }

    pub fn expire_handler(&self) -> ExpireSubscriptionHandler {
        ExpireSubscriptionHandler::new(
            self.store.clone(),
            self.event_publisher.clone(),
            self.clock.clone(),
        )
    }

    pub fn stale_pending_handler(&self, pending_timeout: Duration) -> CancelStalePendingHandler {
        CancelStalePendingHandler::new(
            self.store.clone(),
            self.event_publisher.clone(),
            self.clock.clone(),
            pending_timeout,
        )
    }

    pub fn reconcile_handler(&self) -> ReconcileCountersHandler {
        ReconcileCountersHandler::new(self.store.clone())
    }

    fn summary(&self, subscription: &Subscription) -> SubscriptionResponse {
        SubscriptionResponse::from(SubscriptionSummary::from_subscription(
            subscription,
            self.clock.now(),
        ))
    }
}

fn parse_subscription_id(raw: &str) -> Result<SubscriptionId, SubscriptionError> {
    raw.trim()
        .parse()
        .map_err(|_| SubscriptionError::validation("subscriptionId", "must be a UUID"))
}

// ════════════════════════════════════════════════════════════════════════════════
// Query Handlers (GET endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/subscriptions/:id - Get one subscription
pub async fn get_subscription(
    State(state): State<SubscriptionAppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let query = GetSubscriptionQuery {
        subscription_id: parse_subscription_id(&id)?,
    };
    let summary = state.get_handler().handle(query).await?;
    Ok(Json(SubscriptionResponse::from(summary)))
}

/// GET /api/subscribers/:subscriber_id/subscriptions - List a reader's subscriptions
pub async fn list_subscriber_subscriptions(
    State(state): State<SubscriptionAppState>,
    Path(subscriber_id): Path<String>,
    Query(params): Query<ListSubscriptionsParams>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let query = ListSubscriberSubscriptionsQuery {
        subscriber_id: SubscriberId::new(subscriber_id)?,
        active_only: params.active_only,
    };
    let summaries = state.list_handler().handle(query).await?;
    Ok(Json(SubscriptionListResponse {
        subscriptions: summaries.into_iter().map(SubscriptionResponse::from).collect(),
    }))
}

/// GET /api/subscriptions/stats/:author_id - Author revenue figures
pub async fn get_author_stats(
    State(state): State<SubscriptionAppState>,
    Path(author_id): Path<String>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let query = GetAuthorStatsQuery {
        author_id: AuthorId::new(author_id)?,
    };
    let stats = state.stats_handler().handle(query).await?;
    Ok(Json(AuthorStatsResponse::from(stats)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/subscriptions/create - Subscribe a reader to an author
///
/// 201 when the subscription is active or in trial, 202 when the customer
/// must still authenticate the charge at `redirectUrl`.
pub async fn create_subscription(
    State(state): State<SubscriptionAppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let discount_code = request
        .discount_code
        .as_deref()
        .filter(|code| !code.trim().is_empty())
        .map(DiscountCode::try_new)
        .transpose()?;

    let cmd = CreateSubscriptionCommand {
        subscriber_id: SubscriberId::new(request.subscriber_id)?,
        author_id: AuthorId::new(request.author_id)?,
        plan: request.plan_type,
        payment_token: request.payment_token,
        discount_code,
    };

    let handler = state.create_handler();
    let result = run_detached(async move { handler.handle(cmd).await }).await?;
    let status = match result.payment {
        PaymentOutcome::RequiresAction { .. } => StatusCode::ACCEPTED,
        PaymentOutcome::Captured | PaymentOutcome::TrialStarted => StatusCode::CREATED,
    };
    let response = CreateSubscriptionResponse {
        subscription_id: result.subscription.id.to_string(),
        status: result.subscription.status,
        redirect_url: result.redirect_url().map(str::to_string),
    };

    Ok((status, Json(response)))
}

/// Runs a charging command on its own task. Dropping the request future
/// (client disconnect, request timeout) leaves the charge and its settlement
/// running to completion.
async fn run_detached<T, F>(work: F) -> Result<T, SubscriptionError>
where
    F: Future<Output = Result<T, SubscriptionError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work).await.map_err(|e| {
        error!(error = %e, "Charging task ended abnormally");
        SubscriptionError::infrastructure(format!("charging task failed: {}", e))
    })?
}

/// POST /api/subscriptions/cancel - Cancel now or at period end
pub async fn cancel_subscription(
    State(state): State<SubscriptionAppState>,
    Json(request): Json<CancelSubscriptionRequest>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let cmd = CancelSubscriptionCommand {
        subscription_id: parse_subscription_id(&request.subscription_id)?,
        reason: request.reason,
        immediately: request.immediately,
    };

    let result = state.cancel_handler().handle(cmd).await?;
    Ok(Json(state.summary(&result.subscription)))
}

/// POST /api/subscriptions/renew - Reactivate a cancelled or expired subscription
pub async fn renew_subscription(
    State(state): State<SubscriptionAppState>,
    Json(request): Json<RenewSubscriptionRequest>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let cmd = RenewSubscriptionCommand {
        subscription_id: parse_subscription_id(&request.subscription_id)?,
        payment_token: request.payment_token,
    };

    let handler = state.renew_handler();
    let result = run_detached(async move { handler.handle(cmd).await }).await?;
    let status = if result.redirect_url.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    let mut response = state.summary(&result.subscription);
    response.redirect_url = result.redirect_url;

    Ok((status, Json(response)))
}

/// POST /api/webhooks/payments - Gateway payment confirmations
///
/// Authentic notifications that need no action are acknowledged with 200 so
/// the gateway stops retrying them.
pub async fn handle_payment_webhook(
    State(state): State<SubscriptionAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            SubscriptionError::validation(SIGNATURE_HEADER, "Missing webhook signature header")
        })?;

    let cmd = ConfirmPaymentCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    let response = match state.confirm_payment_handler().handle(cmd).await? {
        ConfirmPaymentResult::Applied { subscription, .. } => WebhookResponse {
            status: "applied",
            subscription_id: Some(subscription.id.to_string()),
            reason: None,
        },
        ConfirmPaymentResult::Ignored { reason } => WebhookResponse {
            status: "ignored",
            subscription_id: None,
            reason: Some(reason),
        },
    };

    Ok(Json(response))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts application errors to HTTP responses.
#[derive(Debug)]
pub struct SubscriptionApiError(SubscriptionError);

impl From<SubscriptionError> for SubscriptionApiError {
    fn from(err: SubscriptionError) -> Self {
        Self(err)
    }
}

impl From<crate::domain::foundation::ValidationError> for SubscriptionApiError {
    fn from(err: crate::domain::foundation::ValidationError) -> Self {
        Self(SubscriptionError::from(err))
    }
}

impl IntoResponse for SubscriptionApiError {
    fn into_response(self) -> axum::response::Response {
        let err = self.0;
        let status = match &err {
            SubscriptionError::NotFound(_) | SubscriptionError::AuthorNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SubscriptionError::DuplicateActive { .. }
            | SubscriptionError::InvalidState { .. }
            | SubscriptionError::ConcurrentModification(_) => StatusCode::CONFLICT,
            SubscriptionError::ValidationFailed { .. }
            | SubscriptionError::InvalidPlan(_)
            | SubscriptionError::InvalidDiscount { .. } => StatusCode::BAD_REQUEST,
            SubscriptionError::PaymentFailed { .. } | SubscriptionError::PaymentTimeout { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            SubscriptionError::InvalidWebhookSignature => StatusCode::UNAUTHORIZED,
            SubscriptionError::Consistency(_) | SubscriptionError::Infrastructure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error_code = err.code().to_string();
        let details = match &err {
            SubscriptionError::DuplicateActive {
                subscriber_id,
                author_id,
            } => Some(json!({ "subscriberId": subscriber_id, "authorId": author_id })),
            SubscriptionError::InvalidState { current, attempted } => {
                Some(json!({ "current": current, "attempted": attempted }))
            }
            SubscriptionError::ValidationFailed { field, .. } => Some(json!({ "field": field })),
            SubscriptionError::InvalidDiscount { code, .. } => Some(json!({ "code": code })),
            SubscriptionError::PaymentFailed {
                subscription_id: Some(id),
                ..
            }
            | SubscriptionError::PaymentTimeout {
                subscription_id: Some(id),
            } => Some(json!({ "subscriptionId": id.to_string() })),
            _ => None,
        };

        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Internal detail goes to the log, not the client.
            error!(error = %err, error_code = %error_code, "Request failed");
            ErrorResponse::new(error_code, "Internal error")
        } else {
            match details {
                Some(details) => ErrorResponse::with_details(error_code, err.message(), details),
                None => ErrorResponse::new(error_code, err.message()),
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: SubscriptionError) -> StatusCode {
        SubscriptionApiError::from(err).into_response().status()
    }

    #[test]
    fn error_categories_map_to_distinct_statuses() {
        assert_eq!(status_of(SubscriptionError::not_found(SubscriptionId::new())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(SubscriptionError::duplicate_active("r", "a")), StatusCode::CONFLICT);
        assert_eq!(status_of(SubscriptionError::validation("planType", "bad")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(SubscriptionError::payment_failed(None, "card_declined")),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(SubscriptionError::PaymentTimeout { subscription_id: None }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(status_of(SubscriptionError::InvalidWebhookSignature), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(SubscriptionError::infrastructure("db down")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bad_subscription_id_is_a_validation_error() {
        let err = parse_subscription_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, SubscriptionError::ValidationFailed { ref field, .. } if field == "subscriptionId"));
    }
}
