//! Mock payment gateway for testing.
//!
//! Provides a configurable `PaymentGateway` for unit and integration tests:
//! - Scripted charge outcomes, consumed in order
//! - Artificial latency for timeout paths
//! - Call tracking
//! - Idempotency-key replay, matching Stripe's behaviour
//! - Webhook notifications accepted under a fixed test signature

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::ports::{ChargeRequest, ChargeResult, PaymentError, PaymentGateway, PaymentNotification};

/// Outcome of one scripted charge.
#[derive(Debug, Clone)]
pub enum MockCharge {
    Succeed,
    Decline(String),
    RequireAction(String),
    Fail(PaymentError),
}

/// Mock payment gateway for testing.
///
/// # Example
///
/// ```ignore
/// let gateway = MockPaymentGateway::new();
/// gateway.push_outcome(MockCharge::Decline("card_declined".into()));
///
/// let result = gateway.charge(request).await?;
/// assert!(!result.success);
/// assert_eq!(gateway.charge_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockPaymentGateway {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Outcomes consumed in FIFO order; empty means `default_outcome`.
    scripted: VecDeque<MockCharge>,

    default_outcome: Option<MockCharge>,

    delay: Option<Duration>,

    /// Every charge request received, in order.
    charges: Vec<ChargeRequest>,

    /// Results already returned, keyed by idempotency key.
    settled: HashMap<String, ChargeResult>,

    next_payment_number: u64,
}

impl MockPaymentGateway {
    /// Signature the mock accepts on `verify_notification`.
    pub const VALID_SIGNATURE: &'static str = "t=0,v1=mock";

    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway that fails every charge with a network error.
    pub fn unavailable() -> Self {
        let mock = Self::new();
        mock.set_default(MockCharge::Fail(PaymentError::network("connection refused")));
        mock
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Queue the outcome of the next charge.
    pub fn push_outcome(&self, outcome: MockCharge) {
        self.state().scripted.push_back(outcome);
    }

    /// Outcome used once the scripted queue is empty. Defaults to `Succeed`.
    pub fn set_default(&self, outcome: MockCharge) {
        self.state().default_outcome = Some(outcome);
    }

    /// Delay every charge, e.g. to exceed the caller's timeout.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.state().charges.clone()
    }

    pub fn charge_count(&self) -> usize {
        self.state().charges.len()
    }

    /// Number of charges that actually moved money.
    pub fn captured_count(&self) -> usize {
        self.state().settled.values().filter(|r| r.success).count()
    }

    /// Builds a webhook payload the mock will accept under `VALID_SIGNATURE`.
    pub fn notification_payload(notification: &PaymentNotification) -> Vec<u8> {
        serde_json::to_vec(notification).unwrap_or_default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_outcome(state: &mut MockState) -> MockCharge {
        state
            .scripted
            .pop_front()
            .or_else(|| state.default_outcome.clone())
            .unwrap_or(MockCharge::Succeed)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeResult, PaymentError> {
        let delay = {
            let mut state = self.state();
            state.charges.push(request.clone());
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(previous) = state.settled.get(&request.idempotency_key) {
            return Ok(previous.clone());
        }

        state.next_payment_number += 1;
        let payment_id = format!("pi_mock_{}", state.next_payment_number);

        let result = match Self::next_outcome(&mut state) {
            MockCharge::Succeed => ChargeResult::succeeded(payment_id),
            MockCharge::Decline(reason) => ChargeResult::declined(payment_id, reason),
            MockCharge::RequireAction(url) => ChargeResult::requires_action(payment_id, url),
            MockCharge::Fail(err) => return Err(err),
        };
        state
            .settled
            .insert(request.idempotency_key.clone(), result.clone());
        Ok(result)
    }

    fn verify_notification(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<Option<PaymentNotification>, PaymentError> {
        if signature != Self::VALID_SIGNATURE {
            return Err(PaymentError::invalid_webhook("Invalid signature"));
        }
        serde_json::from_slice(payload)
            .map(Some)
            .map_err(|e| PaymentError::invalid_webhook(format!("Invalid JSON: {}", e)))
    }
}
