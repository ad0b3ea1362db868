//! Record of the most recent charge attempt on a subscription.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;

/// Opaque reference to one charge attempt.
///
/// Written once per attempt and replaced by the next attempt. Failed and
/// timed-out attempts are recorded too so the subscription stays auditable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    /// Processor-side identifier, absent when the gateway never answered.
    pub external_payment_id: Option<String>,
    pub amount_cents: i64,
    pub captured: bool,
    pub failure_reason: Option<String>,
    pub attempted_at: Timestamp,
}

impl PaymentReference {
    pub fn captured(
        external_payment_id: impl Into<String>,
        amount_cents: i64,
        attempted_at: Timestamp,
    ) -> Self {
        Self {
            external_payment_id: Some(external_payment_id.into()),
            amount_cents,
            captured: true,
            failure_reason: None,
            attempted_at,
        }
    }

    pub fn failed(
        external_payment_id: Option<String>,
        amount_cents: i64,
        reason: impl Into<String>,
        attempted_at: Timestamp,
    ) -> Self {
        Self {
            external_payment_id,
            amount_cents,
            captured: false,
            failure_reason: Some(reason.into()),
            attempted_at,
        }
    }

    /// Charge accepted by the gateway but waiting on customer action.
    pub fn awaiting_confirmation(
        external_payment_id: impl Into<String>,
        amount_cents: i64,
        attempted_at: Timestamp,
    ) -> Self {
        Self {
            external_payment_id: Some(external_payment_id.into()),
            amount_cents,
            captured: false,
            failure_reason: None,
            attempted_at,
        }
    }

    /// Amount that actually reached the author.
    pub fn captured_amount(&self) -> i64 {
        if self.captured {
            self.amount_cents
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_attempt_captures_nothing() {
        let p = PaymentReference::failed(None, 500, "card_declined", Timestamp::now());
        assert_eq!(p.captured_amount(), 0);
        assert_eq!(p.failure_reason.as_deref(), Some("card_declined"));
    }

    #[test]
    fn captured_attempt_reports_amount() {
        let p = PaymentReference::captured("pi_1", 500, Timestamp::now());
        assert_eq!(p.captured_amount(), 500);
    }
}
