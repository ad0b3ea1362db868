//! Plan types and billing period arithmetic.
//!
//! The calculator is pure: given a start instant and a plan it returns the
//! period end and the next billing instant. Month and year steps use
//! calendar arithmetic, so a subscription started on Jan 31 renews on the
//! last day of February rather than drifting by a fixed day count.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::{Timestamp, ValidationError};

/// Billing cadence of a subscription.
///
/// Immutable once the subscription starts; changing plan means cancelling
/// and creating a new subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Monthly,
    Yearly,
    Lifetime,
}

impl PlanType {
    pub const ALL: [PlanType; 3] = [PlanType::Monthly, PlanType::Yearly, PlanType::Lifetime];

    /// Wire and storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Monthly => "monthly",
            PlanType::Yearly => "yearly",
            PlanType::Lifetime => "lifetime",
        }
    }

    /// Returns true if the plan charges again at the end of each period.
    pub fn is_recurring(&self) -> bool {
        !matches!(self, PlanType::Lifetime)
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(PlanType::Monthly),
            "yearly" => Ok(PlanType::Yearly),
            "lifetime" => Ok(PlanType::Lifetime),
            other => Err(ValidationError::invalid_format(
                "plan_type",
                format!("unknown plan type '{}', expected monthly, yearly or lifetime", other),
            )),
        }
    }
}

/// Dates produced for one paid period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub started_at: Timestamp,
    pub expires_at: Timestamp,
    /// `None` for lifetime plans.
    pub next_billing_date: Option<Timestamp>,
}

/// Maps a plan and a start instant to period dates.
pub struct PlanCalculator;

impl PlanCalculator {
    /// Lifetime plans expire this far in the future so the sweep query
    /// needs no special case for them.
    pub const LIFETIME_YEARS: u32 = 100;

    /// Computes the billing period starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` only if the end date is not representable.
    pub fn period(start: Timestamp, plan: PlanType) -> Result<BillingPeriod, ValidationError> {
        let expires_at = match plan {
            PlanType::Monthly => start.add_months(1),
            PlanType::Yearly => start.add_years(1),
            PlanType::Lifetime => start.add_years(Self::LIFETIME_YEARS),
        }
        .ok_or_else(|| {
            ValidationError::invalid_format("started_at", "billing period end is out of range")
        })?;

        let next_billing_date = plan.is_recurring().then_some(expires_at);

        Ok(BillingPeriod {
            started_at: start,
            expires_at,
            next_billing_date,
        })
    }
}
