//! Axum router configuration for subscription endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    cancel_subscription, create_subscription, get_author_stats, get_subscription,
    handle_payment_webhook, list_subscriber_subscriptions, renew_subscription,
    SubscriptionAppState,
};

/// Subscription commands and queries.
///
/// # Routes
/// - `POST /create` - Subscribe a reader to an author
/// - `POST /cancel` - Cancel now or at period end
/// - `POST /renew` - Reactivate a cancelled or expired subscription
/// - `GET /stats/:author_id` - Author revenue figures
/// - `GET /:id` - One subscription
pub fn subscription_routes() -> Router<SubscriptionAppState> {
    Router::new()
        .route("/create", post(create_subscription))
        .route("/cancel", post(cancel_subscription))
        .route("/renew", post(renew_subscription))
        .route("/stats/:author_id", get(get_author_stats))
        .route("/:id", get(get_subscription))
}

/// Per-subscriber listing.
///
/// # Routes
/// - `GET /:subscriber_id/subscriptions` - A reader's subscriptions
pub fn subscriber_routes() -> Router<SubscriptionAppState> {
    Router::new().route(
        "/:subscriber_id/subscriptions",
        get(list_subscriber_subscriptions),
    )
}

/// Gateway callbacks. Authenticated by signature, not by user.
///
/// # Routes
/// - `POST /payments` - Payment confirmations
pub fn webhook_routes() -> Router<SubscriptionAppState> {
    Router::new().route("/payments", post(handle_payment_webhook))
}

/// The complete subscription API, suitable for mounting at `/api`.
pub fn subscription_router() -> Router<SubscriptionAppState> {
    Router::new()
        .nest("/subscriptions", subscription_routes())
        .nest("/subscribers", subscriber_routes())
        .nest("/webhooks", webhook_routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::adapters::http::subscription::handlers::SIGNATURE_HEADER;
    use crate::adapters::stripe::{MockCharge, MockPaymentGateway};
    use crate::application::handlers::subscription::testing::Fixture;
    use crate::domain::foundation::{SubscriberId, SubscriptionId};
    use crate::domain::subscription::{PlanType, SubscriptionStatus};
    use crate::ports::{NotificationOutcome, PaymentNotification, SubscriptionStore};

    fn app(fx: &Fixture) -> Router {
        let state = SubscriptionAppState {
            store: fx.store.clone(),
            gateway: Arc::new(fx.gateway.clone()),
            authors: fx.authors.clone(),
            discounts: fx.discounts.clone(),
            event_publisher: fx.events.clone(),
            clock: fx.clock.clone(),
            charge_policy: fx.policy(),
        };
        Router::new().nest("/api", subscription_router()).with_state(state)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn create_body(subscriber: &str) -> Value {
        json!({
            "subscriberId": subscriber,
            "authorId": "author-1",
            "planType": "monthly",
            "paymentToken": "pm_card_visa"
        })
    }

    #[tokio::test]
    async fn create_returns_created_subscription() {
        let fx = Fixture::new();
        let (status, body) = send(app(&fx), post_json("/api/subscriptions/create", create_body("reader-1"))).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "active");
        assert!(body["subscriptionId"].is_string());
        assert!(body.get("redirectUrl").is_none());
        assert_eq!(fx.count().await, 1);
    }

    #[tokio::test]
    async fn create_surfaces_redirect_for_customer_action() {
        let fx = Fixture::new();
        fx.gateway
            .push_outcome(MockCharge::RequireAction("https://3ds.example/auth".into()));

        let (status, body) = send(app(&fx), post_json("/api/subscriptions/create", create_body("reader-1"))).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["redirectUrl"], "https://3ds.example/auth");
    }

    #[tokio::test]
    async fn dropped_request_still_settles_its_charge() {
        let fx = Fixture::new();
        fx.gateway.set_delay(Duration::from_millis(50));

        let request = app(&fx).oneshot(post_json("/api/subscriptions/create", create_body("reader-1")));
        let timed_out = tokio::time::timeout(Duration::from_millis(10), request).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let subs = fx
            .store
            .find_by_subscriber(&SubscriberId::new("reader-1").unwrap())
            .await
            .unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].status, SubscriptionStatus::Active);
        assert_eq!(fx.count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_create_is_conflict() {
        let fx = Fixture::new();
        send(app(&fx), post_json("/api/subscriptions/create", create_body("reader-1"))).await;

        let (status, body) = send(app(&fx), post_json("/api/subscriptions/create", create_body("reader-1"))).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_code"], "DUPLICATE_SUBSCRIPTION");
        assert_eq!(body["details"]["subscriberId"], "reader-1");
    }

    #[tokio::test]
    async fn declined_payment_is_payment_required() {
        let fx = Fixture::new();
        fx.gateway.push_outcome(MockCharge::Decline("card_declined".into()));

        let (status, body) = send(app(&fx), post_json("/api/subscriptions/create", create_body("reader-1"))).await;

        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error_code"], "PAYMENT_FAILED");
        assert!(body["details"]["subscriptionId"].is_string());
    }

    #[tokio::test]
    async fn invalid_discount_is_bad_request() {
        let fx = Fixture::new();
        let mut body = create_body("reader-1");
        body["discountCode"] = json!("OLD10");

        let (status, body) = send(app(&fx), post_json("/api/subscriptions/create", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_DISCOUNT_CODE");
    }

    #[tokio::test]
    async fn cancel_then_renew_round_trip() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Monthly).await;

        let (status, body) = send(
            app(&fx),
            post_json(
                "/api/subscriptions/cancel",
                json!({ "subscriptionId": sub.id.to_string(), "immediately": true, "reason": "moving on" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");
        assert_eq!(body["cancellationReason"], "moving on");
        assert_eq!(body["hasAccess"], false);

        let (status, body) = send(
            app(&fx),
            post_json("/api/subscriptions/renew", json!({ "subscriptionId": sub.id.to_string() })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");
        assert_eq!(body["hasAccess"], true);
        assert_eq!(fx.count().await, 1);
    }

    #[tokio::test]
    async fn cancel_with_malformed_id_is_bad_request() {
        let fx = Fixture::new();
        let (status, body) = send(
            app(&fx),
            post_json("/api/subscriptions/cancel", json!({ "subscriptionId": "nope" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"]["field"], "subscriptionId");
    }

    #[tokio::test]
    async fn get_and_list_subscriptions() {
        let fx = Fixture::new();
        let sub = fx.active("reader-1", PlanType::Yearly).await;

        let (status, body) = send(app(&fx), get(&format!("/api/subscriptions/{}", sub.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["planType"], "yearly");
        assert_eq!(body["totalPaidCents"], 6000);

        let (status, body) = send(app(&fx), get("/api/subscribers/reader-1/subscriptions?activeOnly=true")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscriptions"].as_array().map(Vec::len), Some(1));

        let (status, _) = send(
            app(&fx),
            get(&format!("/api/subscriptions/{}", SubscriptionId::new())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_reports_author_revenue() {
        let fx = Fixture::new();
        fx.active("reader-1", PlanType::Monthly).await;
        fx.active("reader-2", PlanType::Yearly).await;

        let (status, body) = send(app(&fx), get("/api/subscriptions/stats/author-1")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalSubscriptions"], 2);
        assert_eq!(body["activeSubscriptions"], 2);
        assert_eq!(body["monthlyRevenue"], 1000);
        assert_eq!(body["totalRevenue"], 6500);

        let (status, body) = send(app(&fx), get("/api/subscriptions/stats/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "AUTHOR_NOT_FOUND");
    }

    #[tokio::test]
    async fn webhook_confirms_pending_subscription() {
        let fx = Fixture::new();
        let sub = fx.pending("reader-1").await;
        let payload = MockPaymentGateway::notification_payload(&PaymentNotification {
            event_id: "evt_1".to_string(),
            subscription_id: sub.id,
            external_payment_id: "pi_mock_1".to_string(),
            charge_key: Some(format!("create-{}", sub.id)),
            outcome: NotificationOutcome::Succeeded { amount_cents: 500 },
        });

        let request = Request::builder()
            .method("POST")
            .uri("/api/webhooks/payments")
            .header(SIGNATURE_HEADER, MockPaymentGateway::VALID_SIGNATURE)
            .body(Body::from(payload))
            .unwrap();
        let (status, body) = send(app(&fx), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "applied");
        assert_eq!(fx.count().await, 1);
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_unauthorized() {
        let fx = Fixture::new();
        let request = Request::builder()
            .method("POST")
            .uri("/api/webhooks/payments")
            .header(SIGNATURE_HEADER, "t=1,v1=forged")
            .body(Body::from("{}"))
            .unwrap();

        let (status, body) = send(app(&fx), request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "INVALID_WEBHOOK_SIGNATURE");
    }

    #[tokio::test]
    async fn webhook_without_signature_is_bad_request() {
        let fx = Fixture::new();
        let request = Request::builder()
            .method("POST")
            .uri("/api/webhooks/payments")
            .body(Body::from("{}"))
            .unwrap();

        let (status, _) = send(app(&fx), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
