//! Revenue projections derived from an author's subscriptions.
//!
//! Nothing here is stored. Every figure is recomputed from one snapshot of
//! the author's subscription set, so it cannot drift from the records.

use serde::Serialize;

use super::{PlanType, Subscription, SubscriptionStatus};

/// Dashboard figures for one author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuthorStats {
    /// Every subscription ever created for the author, any status.
    pub total_subscriptions: u64,
    /// Subscriptions currently counted as subscribers (`active` or `trial`).
    pub active_subscriptions: u64,
    /// Recurring revenue normalized to one month, in cents.
    pub monthly_revenue_cents: i64,
    /// Everything ever captured, in cents.
    pub total_revenue_cents: i64,
}

/// Pure revenue calculations.
pub struct RevenueAccountant;

impl RevenueAccountant {
    /// Sum of monthly-normalized prices over `active` subscriptions.
    ///
    /// Yearly prices are summed first and divided by 12 once, so rounding
    /// loses at most one cent overall. Lifetime plans are not recurring and
    /// contribute nothing.
    pub fn monthly_revenue<'a>(subscriptions: impl IntoIterator<Item = &'a Subscription>) -> i64 {
        let (monthly, yearly) = subscriptions
            .into_iter()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .fold((0i64, 0i64), |(monthly, yearly), s| match s.plan {
                PlanType::Monthly => (monthly + s.price_cents, yearly),
                PlanType::Yearly => (monthly, yearly + s.price_cents),
                PlanType::Lifetime => (monthly, yearly),
            });
        monthly + yearly / 12
    }

    /// Sum of `total_paid_cents` across every subscription regardless of status.
    pub fn total_revenue<'a>(subscriptions: impl IntoIterator<Item = &'a Subscription>) -> i64 {
        subscriptions.into_iter().map(|s| s.total_paid_cents).sum()
    }

    /// All dashboard figures from one snapshot.
    pub fn stats(subscriptions: &[Subscription]) -> AuthorStats {
        AuthorStats {
            total_subscriptions: subscriptions.len() as u64,
            active_subscriptions: subscriptions
                .iter()
                .filter(|s| s.status.is_counted())
                .count() as u64,
            monthly_revenue_cents: Self::monthly_revenue(subscriptions),
            total_revenue_cents: Self::total_revenue(subscriptions),
        }
    }
}
