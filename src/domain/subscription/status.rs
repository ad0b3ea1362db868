//! Subscription status state machine.

use crate::domain::foundation::{StateMachine, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Awaiting the outcome of a charge. Not counted, no access.
    Pending,

    /// Paid period in progress.
    Active,

    /// Free trial period in progress. Counted like `Active`.
    Trial,

    /// Cancelled by the subscriber or by a failed first charge.
    Cancelled,

    /// Period ended without renewal.
    Expired,
}

impl SubscriptionStatus {
    /// Returns true if a subscription in this status counts toward the
    /// author's `subscriber_count`.
    pub fn is_counted(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trial)
    }

    /// Returns true if the subscription blocks creating another one for
    /// the same subscriber and author.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Pending | SubscriptionStatus::Active | SubscriptionStatus::Trial
        )
    }

    /// Returns true if an explicit renew request is accepted from this status.
    pub fn is_renewable(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled | SubscriptionStatus::Expired)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubscriptionStatus::Pending),
            "active" => Ok(SubscriptionStatus::Active),
            "trial" => Ok(SubscriptionStatus::Trial),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown subscription status '{}'", other),
            )),
        }
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            // From PENDING: charge settled either way
            (Pending, Active)
                | (Pending, Cancelled)
                | (Pending, Expired)
            // From ACTIVE
                | (Active, Active) // Auto-renewal
                | (Active, Cancelled)
                | (Active, Expired)
            // From TRIAL
                | (Trial, Active) // Conversion
                | (Trial, Cancelled)
                | (Trial, Expired)
            // Manual renewal claims the record as PENDING while charging
                | (Cancelled, Pending)
                | (Expired, Pending)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Pending => vec![Active, Cancelled, Expired],
            Active => vec![Active, Cancelled, Expired],
            Trial => vec![Active, Cancelled, Expired],
            Cancelled => vec![Pending],
            Expired => vec![Pending],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionStatus::*;

    const ALL: [SubscriptionStatus; 5] = [Pending, Active, Trial, Cancelled, Expired];

    #[test]
    fn only_active_and_trial_are_counted() {
        let counted: Vec<_> = ALL.iter().filter(|s| s.is_counted()).collect();
        assert_eq!(counted, vec![&Active, &Trial]);
    }

    #[test]
    fn pending_blocks_duplicates_but_is_not_counted() {
        assert!(Pending.is_open());
        assert!(!Pending.is_counted());
    }

    #[test]
    fn pending_settles_to_active_or_cancelled() {
        assert_eq!(Pending.transition_to(Active), Ok(Active));
        assert_eq!(Pending.transition_to(Cancelled), Ok(Cancelled));
        assert!(Pending.transition_to(Trial).is_err());
    }

    #[test]
    fn active_renews_into_itself() {
        assert!(Active.can_transition_to(&Active));
    }

    #[test]
    fn terminal_looking_states_only_reopen_through_pending() {
        assert!(Cancelled.can_transition_to(&Pending));
        assert!(Expired.can_transition_to(&Pending));
        assert!(!Cancelled.can_transition_to(&Active));
        assert!(!Expired.can_transition_to(&Cancelled));
    }

    #[test]
    fn no_status_is_terminal() {
        for status in ALL {
            assert!(!status.is_terminal(), "{:?} should not be terminal", status);
        }
    }

    #[test]
    fn can_transition_to_agrees_with_valid_transitions() {
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(&to),
                    from.valid_transitions().contains(&to),
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn parses_storage_representation() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
        assert!("past_due".parse::<SubscriptionStatus>().is_err());
    }
}
