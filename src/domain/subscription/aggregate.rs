//! Subscription aggregate entity.
//!
//! A Subscription ties one subscriber to one author for a plan and tracks
//! the paid period, the money collected, and where it sits in the lifecycle.
//!
//! # Design Decisions
//!
//! - **Money in cents**: All monetary values stored as i64 cents (not floats)
//! - **Price snapshot**: `price_cents` is fixed at creation and reused for every renewal
//! - **Explicit clock**: Every transition takes `now` so callers decide the time source
//! - **Counters live in the store**: Transitions only change status; the store derives
//!   the author's counter delta from the before/after status in the same atomic write

use crate::domain::foundation::{
    AuthorId, DomainError, ErrorCode, Percentage, StateMachine, SubscriberId, SubscriptionId,
    Timestamp,
};
use serde::{Deserialize, Serialize};

use super::{BillingPeriod, PaymentReference, PlanType, SubscriptionStatus};

/// System reason recorded when the first charge fails.
pub const PAYMENT_FAILED_REASON: &str = "payment_failed";

/// System reason recorded when a charge needing confirmation is never confirmed.
pub const CONFIRMATION_TIMEOUT_REASON: &str = "payment_confirmation_timeout";

/// What the subscriber is buying, resolved before the record exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTerms {
    pub subscriber_id: SubscriberId,
    pub author_id: AuthorId,
    pub plan: PlanType,
    /// Price after discount.
    pub price_cents: i64,
    pub discount_percent: Option<Percentage>,
    /// Opaque, reusable gateway token (e.g. a saved payment method id).
    pub payment_token: String,
}

/// Effect of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelEffect {
    /// Status moved to `Cancelled` now.
    Cancelled,
    /// Auto-renewal switched off; the sweeper will expire it at period end.
    ScheduledAtPeriodEnd,
    /// Nothing changed; the request repeated an earlier one.
    Unchanged,
}

/// Subscription aggregate.
///
/// # Invariants
///
/// - `expires_at > started_at`
/// - `next_billing_date == Some(expires_at)` for recurring plans while a period is paid
/// - `total_paid_cents` never decreases
/// - `cancelled_at` is set only while status is `Cancelled` (or pending a renewal out of it)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub subscriber_id: SubscriberId,
    pub author_id: AuthorId,
    pub plan: PlanType,
    pub price_cents: i64,
    pub discount_percent: Option<Percentage>,
    pub status: SubscriptionStatus,

    /// Token charged on renewal. Never raw card data.
    pub payment_token: String,

    pub started_at: Timestamp,
    pub expires_at: Timestamp,
    pub next_billing_date: Option<Timestamp>,
    pub trial_expires_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
    pub cancellation_reason: Option<String>,

    pub auto_renewal: bool,
    pub total_paid_cents: i64,
    pub last_payment: Option<PaymentReference>,

    /// Status to fall back to if a manual renewal charge fails.
    pub renewal_from: Option<SubscriptionStatus>,

    /// Set while a sweeper holds the record for an auto-renewal charge.
    pub renewal_claimed_at: Option<Timestamp>,

    /// Idempotency key of the charge a `Pending` record is waiting on.
    /// Gateway notifications settle the record only if they echo it back
    /// or name the payment already recorded for this attempt.
    #[serde(default)]
    pub pending_charge_key: Option<String>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Optimistic concurrency token, bumped by the store on every write.
    pub version: u32,
}

impl Subscription {
    /// How long a sweeper's renewal claim shields the record from other writers.
    pub const RENEWAL_CLAIM_TTL_SECS: u64 = 300;

    /// Creates a subscription awaiting its first charge.
    pub fn new_pending(id: SubscriptionId, terms: SubscriptionTerms, period: BillingPeriod, now: Timestamp) -> Self {
        Self {
            id,
            subscriber_id: terms.subscriber_id,
            author_id: terms.author_id,
            plan: terms.plan,
            price_cents: terms.price_cents,
            discount_percent: terms.discount_percent,
            status: SubscriptionStatus::Pending,
            payment_token: terms.payment_token,
            started_at: period.started_at,
            expires_at: period.expires_at,
            next_billing_date: period.next_billing_date,
            trial_expires_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            auto_renewal: terms.plan.is_recurring(),
            total_paid_cents: 0,
            last_payment: None,
            renewal_from: None,
            renewal_claimed_at: None,
            pending_charge_key: Some(format!("create-{}", id)),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Creates a subscription in a free trial that converts at `now + trial_days`.
    pub fn new_trial(id: SubscriptionId, terms: SubscriptionTerms, trial_days: u32, now: Timestamp) -> Self {
        let trial_end = now.add_days(i64::from(trial_days));
        Self {
            id,
            subscriber_id: terms.subscriber_id,
            author_id: terms.author_id,
            plan: terms.plan,
            price_cents: terms.price_cents,
            discount_percent: terms.discount_percent,
            status: SubscriptionStatus::Trial,
            payment_token: terms.payment_token,
            started_at: now,
            expires_at: trial_end,
            next_billing_date: Some(trial_end),
            trial_expires_at: Some(trial_end),
            cancelled_at: None,
            cancellation_reason: None,
            auto_renewal: true,
            total_paid_cents: 0,
            last_payment: None,
            renewal_from: None,
            renewal_claimed_at: None,
            pending_charge_key: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Returns true while the subscriber may read the author's paid content.
    pub fn has_access(&self, now: Timestamp) -> bool {
        self.status.is_counted() && now.is_before(&self.expires_at)
    }

    /// Returns true if the period has elapsed and the sweeper should act.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status.is_counted() && self.expires_at <= now
    }

    /// Returns true if this record ever gave the subscriber access, as a
    /// trial or a paid period. A first purchase that is still in flight, or
    /// whose charge was declined or never confirmed, did not.
    pub fn ever_counted(&self) -> bool {
        match self.status {
            SubscriptionStatus::Pending => self.renewal_from.is_some(),
            SubscriptionStatus::Cancelled => !self.first_charge_failed(),
            _ => true,
        }
    }

    fn first_charge_failed(&self) -> bool {
        self.trial_expires_at.is_none()
            && self.total_paid_cents == 0
            && self
                .cancellation_reason
                .as_deref()
                .is_some_and(|reason| reason.starts_with(PAYMENT_FAILED_REASON))
    }

    /// Returns true if another worker currently holds the renewal claim.
    pub fn renewal_claim_active(&self, now: Timestamp) -> bool {
        self.renewal_claimed_at
            .map(|claimed| now.is_before(&claimed.plus_secs(Self::RENEWAL_CLAIM_TTL_SECS)))
            .unwrap_or(false)
    }

    /// Records a charge that is waiting on customer action (e.g. 3-D Secure).
    pub fn await_confirmation(&mut self, payment: PaymentReference, now: Timestamp) -> Result<(), DomainError> {
        self.require_status(SubscriptionStatus::Pending, "await payment confirmation")?;
        self.last_payment = Some(payment);
        self.updated_at = now;
        Ok(())
    }

    /// Activates a newly created subscription after its first captured charge.
    pub fn activate(&mut self, payment: PaymentReference, now: Timestamp) -> Result<(), DomainError> {
        if self.renewal_from.is_some() {
            return Err(invalid_state(self.status, "activate a pending renewal without a new period"));
        }
        Self::require_captured(&payment)?;
        self.transition_to(SubscriptionStatus::Active)?;
        self.record_capture(payment);
        self.pending_charge_key = None;
        self.updated_at = now;
        Ok(())
    }

    /// Claims a `Cancelled` or `Expired` subscription for manual renewal.
    /// It sits in `Pending` while the charge is in flight.
    pub fn begin_renewal(&mut self, now: Timestamp) -> Result<(), DomainError> {
        if !self.status.is_renewable() {
            return Err(invalid_state(self.status, "renew"));
        }
        let previous = self.status;
        self.transition_to(SubscriptionStatus::Pending)?;
        self.renewal_from = Some(previous);
        self.last_payment = None;
        // Each claim bumps the version, so the key is unique per attempt.
        self.pending_charge_key = Some(format!("renewal-{}-v{}", self.id, self.version));
        self.updated_at = now;
        Ok(())
    }

    /// Marks an elapsed `Active`/`Trial` subscription as being renewed by
    /// the caller. Status and counters are unchanged.
    pub fn claim_renewal(&mut self, now: Timestamp) -> Result<(), DomainError> {
        if !self.is_due(now) || !self.auto_renewal {
            return Err(invalid_state(self.status, "auto-renew"));
        }
        if self.renewal_claim_active(now) {
            return Err(DomainError::new(
                ErrorCode::ConcurrentModification,
                format!("Subscription {} is already being renewed", self.id),
            ));
        }
        self.renewal_claimed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Starts a new paid period after a captured renewal charge.
    ///
    /// Accepts a manual renewal (`Pending` claimed from `Cancelled`/`Expired`)
    /// or a sweeper renewal of an elapsed `Active`/`Trial` subscription.
    pub fn renew(&mut self, period: BillingPeriod, payment: PaymentReference, now: Timestamp) -> Result<(), DomainError> {
        let is_manual = self.status == SubscriptionStatus::Pending && self.renewal_from.is_some();
        if !is_manual && !self.status.is_counted() {
            return Err(invalid_state(self.status, "renew"));
        }
        Self::require_captured(&payment)?;
        self.transition_to(SubscriptionStatus::Active)?;

        self.started_at = period.started_at;
        self.expires_at = period.expires_at;
        self.next_billing_date = period.next_billing_date;
        self.cancelled_at = None;
        self.cancellation_reason = None;
        self.renewal_from = None;
        self.renewal_claimed_at = None;
        self.pending_charge_key = None;
        self.auto_renewal = self.plan.is_recurring();
        self.record_capture(payment);
        self.updated_at = now;
        Ok(())
    }

    /// Settles a failed or timed-out charge.
    ///
    /// - first purchase: `Pending -> Cancelled` with a system reason
    /// - manual renewal: back to the status it was renewed from
    /// - sweeper renewal: `Active`/`Trial -> Expired`
    pub fn fail_charge(&mut self, payment: PaymentReference, now: Timestamp) -> Result<(), DomainError> {
        let reason = payment
            .failure_reason
            .clone()
            .unwrap_or_else(|| PAYMENT_FAILED_REASON.to_string());

        match (self.status, self.renewal_from) {
            (SubscriptionStatus::Pending, None) => {
                self.transition_to(SubscriptionStatus::Cancelled)?;
                self.cancelled_at = Some(now);
                self.cancellation_reason = Some(format!("{}: {}", PAYMENT_FAILED_REASON, reason));
                self.auto_renewal = false;
            }
            (SubscriptionStatus::Pending, Some(previous)) => {
                self.transition_to(previous)?;
                self.renewal_from = None;
            }
            (status, _) if status.is_counted() => {
                self.transition_to(SubscriptionStatus::Expired)?;
                self.renewal_claimed_at = None;
                self.auto_renewal = false;
            }
            (status, _) => return Err(invalid_state(status, "settle a failed charge")),
        }

        self.last_payment = Some(payment);
        self.pending_charge_key = None;
        self.updated_at = now;
        Ok(())
    }

    /// Cancels the subscription now or at the end of the paid period.
    ///
    /// Repeating a cancel is not an error and reports `Unchanged`.
    pub fn cancel(&mut self, reason: Option<String>, immediately: bool, now: Timestamp) -> Result<CancelEffect, DomainError> {
        if self.status == SubscriptionStatus::Cancelled {
            return Ok(CancelEffect::Unchanged);
        }
        if !self.status.is_counted() {
            return Err(invalid_state(self.status, "cancel"));
        }
        if self.renewal_claim_active(now) {
            return Err(DomainError::new(
                ErrorCode::ConcurrentModification,
                format!("Subscription {} is being renewed, retry shortly", self.id),
            ));
        }

        if immediately {
            self.transition_to(SubscriptionStatus::Cancelled)?;
            self.cancelled_at = Some(now);
            self.auto_renewal = false;
            self.renewal_claimed_at = None;
            self.cancellation_reason = reason;
            self.updated_at = now;
            return Ok(CancelEffect::Cancelled);
        }

        if !self.auto_renewal {
            return Ok(CancelEffect::Unchanged);
        }
        self.auto_renewal = false;
        self.cancellation_reason = reason;
        self.updated_at = now;
        Ok(CancelEffect::ScheduledAtPeriodEnd)
    }

    /// Ends an elapsed period without renewal.
    pub fn expire(&mut self, now: Timestamp) -> Result<(), DomainError> {
        if !self.is_due(now) {
            return Err(invalid_state(self.status, "expire"));
        }
        self.transition_to(SubscriptionStatus::Expired)?;
        self.renewal_claimed_at = None;
        self.updated_at = now;
        Ok(())
    }

    fn record_capture(&mut self, payment: PaymentReference) {
        self.total_paid_cents += payment.captured_amount();
        self.last_payment = Some(payment);
    }

    fn require_captured(payment: &PaymentReference) -> Result<(), DomainError> {
        if payment.captured {
            Ok(())
        } else {
            Err(DomainError::validation("payment", "Payment was not captured"))
        }
    }

    fn require_status(&self, expected: SubscriptionStatus, action: &str) -> Result<(), DomainError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(invalid_state(self.status, action))
        }
    }

    fn transition_to(&mut self, target: SubscriptionStatus) -> Result<(), DomainError> {
        self.status = self.status.transition_to(target).map_err(|_| {
            DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!(
                    "Cannot transition subscription from {} to {}",
                    self.status, target
                ),
            )
        })?;
        Ok(())
    }
}

fn invalid_state(current: SubscriptionStatus, action: &str) -> DomainError {
    DomainError::new(
        ErrorCode::InvalidStateTransition,
        format!("Cannot {} a subscription in {} state", action, current),
    )
    .with_detail("current", current.as_str())
    .with_detail("attempted", action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::PlanCalculator;
    use chrono::{TimeZone, Utc};

    fn at(y: i32, m: u32, d: u32) -> Timestamp {
        Timestamp::from_datetime(Utc.with_ymd_and_hms(y, m, d, 8, 0, 0).unwrap())
    }

    fn terms(plan: PlanType) -> SubscriptionTerms {
        SubscriptionTerms {
            subscriber_id: SubscriberId::new("reader-1").unwrap(),
            author_id: AuthorId::new("author-1").unwrap(),
            plan,
            price_cents: 500,
            discount_percent: None,
            payment_token: "pm_card_visa".to_string(),
        }
    }

    fn pending(plan: PlanType, now: Timestamp) -> Subscription {
        let period = PlanCalculator::period(now, plan).unwrap();
        Subscription::new_pending(SubscriptionId::new(), terms(plan), period, now)
    }

    fn active(plan: PlanType, now: Timestamp) -> Subscription {
        let mut sub = pending(plan, now);
        sub.activate(PaymentReference::captured("pi_1", 500, now), now).unwrap();
        sub
    }

    fn declined(now: Timestamp) -> PaymentReference {
        PaymentReference::failed(Some("pi_x".into()), 500, "card_declined", now)
    }

    // Creation

    #[test]
    fn new_pending_uses_calculated_period() {
        let sub = pending(PlanType::Monthly, at(2024, 1, 15));
        assert_eq!(sub.status, SubscriptionStatus::Pending);
        assert_eq!(sub.expires_at, at(2024, 2, 15));
        assert_eq!(sub.next_billing_date, Some(at(2024, 2, 15)));
        assert!(sub.auto_renewal);
        assert_eq!(sub.total_paid_cents, 0);
        assert_eq!(sub.pending_charge_key, Some(format!("create-{}", sub.id)));
    }

    #[test]
    fn lifetime_does_not_auto_renew() {
        let sub = pending(PlanType::Lifetime, at(2024, 1, 15));
        assert!(!sub.auto_renewal);
        assert!(sub.next_billing_date.is_none());
    }

    #[test]
    fn new_trial_is_counted_without_payment() {
        let now = at(2024, 5, 1);
        let sub = Subscription::new_trial(SubscriptionId::new(), terms(PlanType::Monthly), 14, now);
        assert_eq!(sub.status, SubscriptionStatus::Trial);
        assert!(sub.status.is_counted());
        assert_eq!(sub.trial_expires_at, Some(at(2024, 5, 15)));
        assert_eq!(sub.expires_at, at(2024, 5, 15));
        assert_eq!(sub.total_paid_cents, 0);
    }

    // Activation

    #[test]
    fn activate_records_captured_amount() {
        let sub = active(PlanType::Monthly, at(2024, 1, 15));
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.total_paid_cents, 500);
        assert_eq!(
            sub.last_payment.as_ref().and_then(|p| p.external_payment_id.as_deref()),
            Some("pi_1")
        );
    }

    #[test]
    fn activate_rejects_uncaptured_payment() {
        let now = at(2024, 1, 15);
        let mut sub = pending(PlanType::Monthly, now);
        let result = sub.activate(declined(now), now);
        assert!(result.is_err());
        assert_eq!(sub.status, SubscriptionStatus::Pending);
    }

    #[test]
    fn failed_first_charge_cancels_with_system_reason() {
        let now = at(2024, 1, 15);
        let mut sub = pending(PlanType::Monthly, now);
        sub.fail_charge(declined(now), now).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert_eq!(sub.cancelled_at, Some(now));
        assert_eq!(
            sub.cancellation_reason.as_deref(),
            Some("payment_failed: card_declined")
        );
        assert_eq!(sub.total_paid_cents, 0);
        assert!(sub.last_payment.is_some());
    }

    // Cancellation

    #[test]
    fn cancel_immediately_sets_cancelled_state() {
        let now = at(2024, 1, 20);
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        let effect = sub.cancel(Some("too busy".into()), true, now).unwrap();

        assert_eq!(effect, CancelEffect::Cancelled);
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert_eq!(sub.cancelled_at, Some(now));
        assert!(!sub.auto_renewal);
        assert_eq!(sub.cancellation_reason.as_deref(), Some("too busy"));
    }

    #[test]
    fn cancel_at_period_end_keeps_status() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        let effect = sub.cancel(None, false, at(2024, 1, 20)).unwrap();

        assert_eq!(effect, CancelEffect::ScheduledAtPeriodEnd);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(!sub.auto_renewal);
        assert!(sub.cancelled_at.is_none());
    }

    #[test]
    fn repeated_cancel_is_unchanged() {
        let now = at(2024, 1, 20);
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        sub.cancel(None, true, now).unwrap();
        let snapshot = sub.clone();

        assert_eq!(sub.cancel(None, true, now).unwrap(), CancelEffect::Unchanged);
        assert_eq!(sub, snapshot);
    }

    #[test]
    fn repeated_scheduled_cancel_is_unchanged() {
        let now = at(2024, 1, 20);
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        sub.cancel(None, false, now).unwrap();
        assert_eq!(sub.cancel(None, false, now).unwrap(), CancelEffect::Unchanged);
    }

    #[test]
    fn cancel_rejects_pending_and_expired() {
        let now = at(2024, 1, 15);
        let mut sub = pending(PlanType::Monthly, now);
        assert!(sub.cancel(None, true, now).is_err());

        let mut sub = active(PlanType::Monthly, now);
        sub.expire(at(2024, 3, 1)).unwrap();
        assert!(sub.cancel(None, true, at(2024, 3, 1)).is_err());
    }

    #[test]
    fn cancel_is_refused_while_renewal_claimed() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        let due = at(2024, 2, 15);
        sub.claim_renewal(due).unwrap();

        let err = sub.cancel(None, true, due.plus_secs(10)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConcurrentModification);
    }

    // Expiry

    #[test]
    fn expire_requires_elapsed_period() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        assert!(sub.expire(at(2024, 2, 1)).is_err());
        sub.expire(at(2024, 2, 15)).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Expired);
    }

    #[test]
    fn expire_twice_is_rejected() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        sub.expire(at(2024, 2, 16)).unwrap();
        assert!(sub.expire(at(2024, 2, 17)).is_err());
    }

    // Renewal

    #[test]
    fn sweeper_renewal_moves_period_forward() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        let due = at(2024, 2, 15);
        sub.claim_renewal(due).unwrap();
        let period = PlanCalculator::period(due, PlanType::Monthly).unwrap();
        sub.renew(period, PaymentReference::captured("pi_2", 500, due), due).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.expires_at, at(2024, 3, 15));
        assert_eq!(sub.total_paid_cents, 1000);
        assert!(sub.renewal_claimed_at.is_none());
    }

    #[test]
    fn claim_renewal_rejects_second_claimer() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        let due = at(2024, 2, 15);
        sub.claim_renewal(due).unwrap();
        let err = sub.claim_renewal(due.plus_secs(1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConcurrentModification);
    }

    #[test]
    fn stale_claim_can_be_taken_over() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        let due = at(2024, 2, 15);
        sub.claim_renewal(due).unwrap();
        let later = due.plus_secs(Subscription::RENEWAL_CLAIM_TTL_SECS + 1);
        assert!(sub.claim_renewal(later).is_ok());
    }

    #[test]
    fn claim_renewal_requires_auto_renewal() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        sub.cancel(None, false, at(2024, 1, 16)).unwrap();
        assert!(sub.claim_renewal(at(2024, 2, 15)).is_err());
    }

    #[test]
    fn failed_sweeper_renewal_expires() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        let due = at(2024, 2, 15);
        sub.claim_renewal(due).unwrap();
        sub.fail_charge(declined(due), due).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Expired);
        assert!(!sub.auto_renewal);
        assert_eq!(sub.total_paid_cents, 500);
    }

    #[test]
    fn manual_renewal_from_cancelled_clears_cancellation() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        sub.cancel(Some("moving".into()), true, at(2024, 1, 20)).unwrap();

        let now = at(2024, 4, 1);
        sub.begin_renewal(now).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Pending);
        assert_eq!(sub.renewal_from, Some(SubscriptionStatus::Cancelled));

        let period = PlanCalculator::period(now, PlanType::Monthly).unwrap();
        sub.renew(period, PaymentReference::captured("pi_3", 500, now), now).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.cancelled_at.is_none());
        assert!(sub.cancellation_reason.is_none());
        assert_eq!(sub.started_at, now);
        assert!(sub.auto_renewal);
    }

    #[test]
    fn failed_manual_renewal_returns_to_previous_status() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        sub.expire(at(2024, 2, 15)).unwrap();

        let now = at(2024, 4, 1);
        sub.begin_renewal(now).unwrap();
        sub.fail_charge(declined(now), now).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Expired);

        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        sub.cancel(None, true, at(2024, 1, 16)).unwrap();
        sub.begin_renewal(now).unwrap();
        sub.fail_charge(declined(now), now).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
        assert_eq!(sub.cancelled_at, Some(at(2024, 1, 16)));
    }

    #[test]
    fn each_renewal_attempt_waits_on_its_own_charge() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        assert_eq!(sub.pending_charge_key, None);
        sub.cancel(None, true, at(2024, 1, 16)).unwrap();

        let now = at(2024, 1, 20);
        sub.begin_renewal(now).unwrap();
        let first = sub.pending_charge_key.clone().unwrap();
        sub.fail_charge(declined(now), now).unwrap();
        assert_eq!(sub.pending_charge_key, None);

        // The store bumps the version on every write.
        sub.version += 2;
        sub.begin_renewal(now).unwrap();
        let second = sub.pending_charge_key.clone().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn only_records_that_gave_access_count_as_history() {
        let now = at(2024, 1, 15);
        let mut declined_first = pending(PlanType::Monthly, now);
        assert!(!declined_first.ever_counted());
        declined_first.fail_charge(declined(now), now).unwrap();
        assert!(!declined_first.ever_counted());

        let mut cancelled = active(PlanType::Monthly, now);
        cancelled.cancel(Some("too expensive".into()), true, now).unwrap();
        assert!(cancelled.ever_counted());

        let trial = Subscription::new_trial(SubscriptionId::new(), terms(PlanType::Monthly), 7, now);
        assert!(trial.ever_counted());
    }

    #[test]
    fn begin_renewal_rejects_active() {
        let mut sub = active(PlanType::Monthly, at(2024, 1, 15));
        let err = sub.begin_renewal(at(2024, 1, 20)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidStateTransition);
    }

    #[test]
    fn trial_converts_through_renew() {
        let now = at(2024, 5, 1);
        let mut sub = Subscription::new_trial(SubscriptionId::new(), terms(PlanType::Yearly), 7, now);
        let end = at(2024, 5, 8);
        sub.claim_renewal(end).unwrap();
        let period = PlanCalculator::period(end, PlanType::Yearly).unwrap();
        sub.renew(period, PaymentReference::captured("pi_t", 500, end), end).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.expires_at, at(2025, 5, 8));
        assert_eq!(sub.trial_expires_at, Some(end));
    }

    // Access

    #[test]
    fn access_ends_at_expiry() {
        let sub = active(PlanType::Monthly, at(2024, 1, 15));
        assert!(sub.has_access(at(2024, 2, 14)));
        assert!(!sub.has_access(at(2024, 2, 15)));
    }

    #[test]
    fn pending_has_no_access() {
        let sub = pending(PlanType::Monthly, at(2024, 1, 15));
        assert!(!sub.has_access(at(2024, 1, 16)));
    }
}
