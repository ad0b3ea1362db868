//! Author pricing lookup port.
//!
//! Authors set their own prices. The engine reads the current price at
//! create/renew time and snapshots it onto the subscription, so later price
//! changes never alter existing subscriptions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AuthorId, DomainError};
use crate::domain::subscription::PlanType;

#[async_trait]
pub trait AuthorDirectory: Send + Sync {
    /// Current pricing for the author, `None` if the author is unknown.
    async fn pricing(&self, author_id: &AuthorId) -> Result<Option<AuthorPricing>, DomainError>;
}

/// An author's price list in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorPricing {
    pub monthly_cents: Option<i64>,
    pub yearly_cents: Option<i64>,
    pub lifetime_cents: Option<i64>,
    /// Free trial length offered to first-time subscribers; 0 disables trials.
    pub trial_days: u32,
}

impl AuthorPricing {
    /// Price for the plan, `None` if the author does not offer it.
    pub fn price_for(&self, plan: PlanType) -> Option<i64> {
        match plan {
            PlanType::Monthly => self.monthly_cents,
            PlanType::Yearly => self.yearly_cents,
            PlanType::Lifetime => self.lifetime_cents,
        }
    }
}
