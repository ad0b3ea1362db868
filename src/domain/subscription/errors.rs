//! Subscription-specific error types.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | ValidationFailed / InvalidPlan / InvalidDiscount | 400 |
//! | NotFound / AuthorNotFound | 404 |
//! | DuplicateActive / InvalidState / ConcurrentModification | 409 |
//! | PaymentFailed / PaymentTimeout | 402 |
//! | InvalidWebhookSignature | 401 |
//! | Consistency / Infrastructure | 500 |

use crate::domain::foundation::{AuthorId, DomainError, ErrorCode, SubscriptionId, ValidationError};

/// Subscription-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Subscription was not found.
    NotFound(SubscriptionId),

    /// Author is unknown to the pricing directory.
    AuthorNotFound(AuthorId),

    /// The subscriber already holds an open subscription to this author.
    DuplicateActive {
        subscriber_id: String,
        author_id: String,
    },

    /// Operation not allowed from the current status.
    InvalidState { current: String, attempted: String },

    /// Another writer changed or holds the record; safe to retry.
    ConcurrentModification(String),

    /// Field-level input error.
    ValidationFailed { field: String, message: String },

    /// Plan not offered by this author.
    InvalidPlan(String),

    /// Discount code rejected.
    InvalidDiscount { code: String, reason: String },

    /// Gateway declined or errored. The subscription, if created, was kept
    /// in a non-active state.
    PaymentFailed {
        subscription_id: Option<SubscriptionId>,
        reason: String,
    },

    /// Gateway did not answer in time; treated as a failure.
    PaymentTimeout { subscription_id: Option<SubscriptionId> },

    /// Webhook signature verification failed.
    InvalidWebhookSignature,

    /// Status and counter could not be committed together; rolled back.
    Consistency(String),

    /// Infrastructure error.
    Infrastructure(String),
}

impl SubscriptionError {
    pub fn not_found(id: SubscriptionId) -> Self {
        SubscriptionError::NotFound(id)
    }

    pub fn author_not_found(id: AuthorId) -> Self {
        SubscriptionError::AuthorNotFound(id)
    }

    pub fn duplicate_active(subscriber_id: impl Into<String>, author_id: impl Into<String>) -> Self {
        SubscriptionError::DuplicateActive {
            subscriber_id: subscriber_id.into(),
            author_id: author_id.into(),
        }
    }

    pub fn invalid_state(current: impl Into<String>, attempted: impl Into<String>) -> Self {
        SubscriptionError::InvalidState {
            current: current.into(),
            attempted: attempted.into(),
        }
    }

    pub fn concurrent(message: impl Into<String>) -> Self {
        SubscriptionError::ConcurrentModification(message.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SubscriptionError::ValidationFailed {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_plan(message: impl Into<String>) -> Self {
        SubscriptionError::InvalidPlan(message.into())
    }

    pub fn invalid_discount(code: impl Into<String>, reason: impl Into<String>) -> Self {
        SubscriptionError::InvalidDiscount {
            code: code.into(),
            reason: reason.into(),
        }
    }

    pub fn payment_failed(subscription_id: Option<SubscriptionId>, reason: impl Into<String>) -> Self {
        SubscriptionError::PaymentFailed {
            subscription_id,
            reason: reason.into(),
        }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        SubscriptionError::Consistency(message.into())
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        SubscriptionError::Infrastructure(message.into())
    }

    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            SubscriptionError::NotFound(_) => ErrorCode::SubscriptionNotFound,
            SubscriptionError::AuthorNotFound(_) => ErrorCode::AuthorNotFound,
            SubscriptionError::DuplicateActive { .. } => ErrorCode::DuplicateSubscription,
            SubscriptionError::InvalidState { .. } => ErrorCode::InvalidStateTransition,
            SubscriptionError::ConcurrentModification(_) => ErrorCode::ConcurrentModification,
            SubscriptionError::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            SubscriptionError::InvalidPlan(_) => ErrorCode::InvalidPlan,
            SubscriptionError::InvalidDiscount { .. } => ErrorCode::InvalidDiscountCode,
            SubscriptionError::PaymentFailed { .. } => ErrorCode::PaymentFailed,
            SubscriptionError::PaymentTimeout { .. } => ErrorCode::PaymentTimeout,
            SubscriptionError::InvalidWebhookSignature => ErrorCode::InvalidWebhookSignature,
            SubscriptionError::Consistency(_) => ErrorCode::CounterInconsistency,
            SubscriptionError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }

    /// Returns a user-friendly error message.
    pub fn message(&self) -> String {
        match self {
            SubscriptionError::NotFound(id) => format!("Subscription not found: {}", id),
            SubscriptionError::AuthorNotFound(id) => format!("Author not found: {}", id),
            SubscriptionError::DuplicateActive {
                subscriber_id,
                author_id,
            } => format!(
                "Subscriber {} already has an active subscription to author {}",
                subscriber_id, author_id
            ),
            SubscriptionError::InvalidState { current, attempted } => {
                format!("Cannot {} subscription in {} state", attempted, current)
            }
            SubscriptionError::ConcurrentModification(msg) => msg.clone(),
            SubscriptionError::ValidationFailed { field, message } => {
                format!("Validation failed for '{}': {}", field, message)
            }
            SubscriptionError::InvalidPlan(msg) => format!("Invalid plan: {}", msg),
            SubscriptionError::InvalidDiscount { code, reason } => {
                format!("Discount code '{}' is invalid: {}", code, reason)
            }
            SubscriptionError::PaymentFailed { reason, .. } => format!("Payment failed: {}", reason),
            SubscriptionError::PaymentTimeout { .. } => {
                "Payment gateway did not respond in time".to_string()
            }
            SubscriptionError::InvalidWebhookSignature => "Invalid webhook signature".to_string(),
            SubscriptionError::Consistency(msg) => format!("Consistency failure: {}", msg),
            SubscriptionError::Infrastructure(msg) => format!("Error: {}", msg),
        }
    }

    /// Returns true if the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubscriptionError::ConcurrentModification(_) | SubscriptionError::Infrastructure(_)
        )
    }

    /// Returns true for gateway outcomes the client should answer with a
    /// different payment method.
    pub fn is_payment_error(&self) -> bool {
        matches!(
            self,
            SubscriptionError::PaymentFailed { .. } | SubscriptionError::PaymentTimeout { .. }
        )
    }
}

impl std::fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for SubscriptionError {}

impl From<DomainError> for SubscriptionError {
    fn from(err: DomainError) -> Self {
        let detail = |key: &str| err.details.get(key).cloned();
        match err.code {
            ErrorCode::DuplicateSubscription => SubscriptionError::DuplicateActive {
                subscriber_id: detail("subscriber_id").unwrap_or_default(),
                author_id: detail("author_id").unwrap_or_default(),
            },
            ErrorCode::InvalidStateTransition => SubscriptionError::InvalidState {
                current: detail("current").unwrap_or_else(|| "unknown".to_string()),
                attempted: detail("attempted").unwrap_or_else(|| err.message.clone()),
            },
            ErrorCode::ConcurrentModification => {
                SubscriptionError::ConcurrentModification(err.message)
            }
            ErrorCode::ValidationFailed
            | ErrorCode::EmptyField
            | ErrorCode::OutOfRange
            | ErrorCode::InvalidFormat => SubscriptionError::ValidationFailed {
                field: detail("field").unwrap_or_else(|| "unknown".to_string()),
                message: err.message,
            },
            ErrorCode::InvalidPlan => SubscriptionError::InvalidPlan(err.message),
            ErrorCode::CounterInconsistency => SubscriptionError::Consistency(err.message),
            ErrorCode::PaymentFailed => SubscriptionError::PaymentFailed {
                subscription_id: None,
                reason: err.message,
            },
            _ => SubscriptionError::Infrastructure(err.to_string()),
        }
    }
}

impl From<ValidationError> for SubscriptionError {
    fn from(err: ValidationError) -> Self {
        SubscriptionError::ValidationFailed {
            field: err.field().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<SubscriptionError> for DomainError {
    fn from(err: SubscriptionError) -> Self {
        DomainError::new(err.code(), err.message())
    }
}
