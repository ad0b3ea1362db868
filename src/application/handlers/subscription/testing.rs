//! Test fixture wiring the handlers to in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use crate::adapters::clock::ManualClock;
use crate::adapters::memory::{
    DiscountRule, InMemoryAuthorDirectory, InMemoryDiscountValidator, InMemorySubscriptionStore,
};
use crate::adapters::stripe::{MockCharge, MockPaymentGateway};
use crate::adapters::InMemoryEventBus;
use crate::domain::foundation::{AuthorId, Percentage, SubscriberId, SubscriptionId, Timestamp};
use crate::domain::subscription::{DiscountCode, PlanType, Subscription, SubscriptionStatus};
use crate::ports::{AuthorPricing, SubscriptionStore};

use super::*;

pub(crate) const AUTHOR: &str = "author-1";

/// 08:00 UTC on the given day.
pub(crate) fn at(y: i32, m: u32, d: u32) -> Timestamp {
    Timestamp::from_datetime(Utc.with_ymd_and_hms(y, m, d, 8, 0, 0).unwrap())
}

pub(crate) fn pricing(trial_days: u32) -> AuthorPricing {
    AuthorPricing {
        monthly_cents: Some(500),
        yearly_cents: Some(6000),
        lifetime_cents: Some(20000),
        trial_days,
    }
}

/// In-memory adapters plus a manual clock starting at 2024-01-15 08:00 UTC.
pub(crate) struct Fixture {
    pub store: Arc<InMemorySubscriptionStore>,
    pub gateway: MockPaymentGateway,
    pub authors: Arc<InMemoryAuthorDirectory>,
    pub discounts: Arc<InMemoryDiscountValidator>,
    pub events: Arc<InMemoryEventBus>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_trial(0)
    }

    pub fn with_trial(trial_days: u32) -> Self {
        let clock = Arc::new(ManualClock::new(at(2024, 1, 15)));
        let authors = InMemoryAuthorDirectory::new()
            .with_author(AuthorId::new(AUTHOR).unwrap(), pricing(trial_days));
        let discounts = InMemoryDiscountValidator::new(clock.clone())
            .with_code(
                DiscountCode::try_new("SAVE20").unwrap(),
                DiscountRule::percent(Percentage::try_new(20).unwrap()),
            )
            .with_code(
                DiscountCode::try_new("FREE100").unwrap(),
                DiscountRule::percent(Percentage::try_new(100).unwrap()),
            )
            .with_code(
                DiscountCode::try_new("OLD10").unwrap(),
                DiscountRule::percent(Percentage::try_new(10).unwrap()).expiring_at(at(2024, 1, 1)),
            );

        Self {
            store: Arc::new(InMemorySubscriptionStore::new()),
            gateway: MockPaymentGateway::new(),
            authors: Arc::new(authors),
            discounts: Arc::new(discounts),
            events: Arc::new(InMemoryEventBus::new()),
            clock,
        }
    }

    pub fn policy(&self) -> ChargePolicy {
        ChargePolicy::new("USD", Duration::from_millis(200))
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(3600)
    }

    pub fn add_author(&self, author_id: &str, pricing: AuthorPricing) {
        self.authors
            .set_pricing(AuthorId::new(author_id).unwrap(), pricing)
            .unwrap();
    }

    pub fn set_monthly_price(&self, cents: i64) {
        let mut updated = pricing(0);
        updated.monthly_cents = Some(cents);
        self.add_author(AUTHOR, updated);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Handlers
    // ════════════════════════════════════════════════════════════════════════════

    pub fn create_handler(&self) -> CreateSubscriptionHandler {
        CreateSubscriptionHandler::new(
            self.store.clone(),
            Arc::new(self.gateway.clone()),
            self.authors.clone(),
            self.discounts.clone(),
            self.events.clone(),
            self.clock.clone(),
            self.policy(),
        )
    }

    pub fn cancel_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(self.store.clone(), self.events.clone(), self.clock.clone())
    }

    pub fn renew_handler(&self) -> RenewSubscriptionHandler {
        RenewSubscriptionHandler::new(
            self.store.clone(),
            Arc::new(self.gateway.clone()),
            self.events.clone(),
            self.clock.clone(),
            self.policy(),
        )
    }

    pub fn expire_handler(&self) -> ExpireSubscriptionHandler {
        ExpireSubscriptionHandler::new(self.store.clone(), self.events.clone(), self.clock.clone())
    }

    pub fn auto_renew_handler(&self) -> AutoRenewSubscriptionHandler {
        AutoRenewSubscriptionHandler::new(
            self.store.clone(),
            Arc::new(self.gateway.clone()),
            self.events.clone(),
            self.clock.clone(),
            self.policy(),
        )
    }

    pub fn confirm_handler(&self) -> ConfirmPaymentHandler {
        ConfirmPaymentHandler::new(
            self.store.clone(),
            Arc::new(self.gateway.clone()),
            self.events.clone(),
            self.clock.clone(),
        )
    }

    pub fn stale_pending_handler(&self) -> CancelStalePendingHandler {
        CancelStalePendingHandler::new(
            self.store.clone(),
            self.events.clone(),
            self.clock.clone(),
            self.pending_timeout(),
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

    pub fn reconcile_handler(&self) -> ReconcileCountersHandler {
        ReconcileCountersHandler::new(self.store.clone())
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Scenarios
    // ════════════════════════════════════════════════════════════════════════════

    pub fn command(&self, subscriber: &str, plan: PlanType) -> CreateSubscriptionCommand {
        CreateSubscriptionCommand {
            subscriber_id: SubscriberId::new(subscriber).unwrap(),
            author_id: AuthorId::new(AUTHOR).unwrap(),
            plan,
            payment_token: "pm_card_visa".to_string(),
            discount_code: None,
        }
    }

    /// Creates a paid, active subscription to `AUTHOR`.
    pub async fn active(&self, subscriber: &str, plan: PlanType) -> Subscription {
        self.gateway.push_outcome(MockCharge::Succeed);
        let result = self
            .create_handler()
            .handle(self.command(subscriber, plan))
            .await
            .unwrap();
        assert_eq!(result.subscription.status, SubscriptionStatus::Active);
        result.subscription
    }

    /// Creates a subscription waiting on 3-D Secure confirmation.
    pub async fn pending(&self, subscriber: &str) -> Subscription {
        self.gateway
            .push_outcome(MockCharge::RequireAction("https://3ds.example".into()));
        let result = self
            .create_handler()
            .handle(self.command(subscriber, PlanType::Monthly))
            .await
            .unwrap();
        assert_eq!(result.subscription.status, SubscriptionStatus::Pending);
        result.subscription
    }

    /// Creates a trial; requires a fixture built `with_trial`.
    pub async fn trial(&self, subscriber: &str) -> Subscription {
        let result = self
            .create_handler()
            .handle(self.command(subscriber, PlanType::Monthly))
            .await
            .unwrap();
        assert_eq!(result.subscription.status, SubscriptionStatus::Trial);
        result.subscription
    }

    pub async fn find(&self, id: SubscriptionId) -> Subscription {
        self.store.find_by_id(&id).await.unwrap().unwrap()
    }

    /// `AUTHOR`'s stored subscriber counter.
    pub async fn count(&self) -> i64 {
        self.store
            .subscriber_count(&AuthorId::new(AUTHOR).unwrap())
            .await
            .unwrap()
    }
}
