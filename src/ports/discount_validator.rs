//! Discount code validation port.
//!
//! A code is syntactically checked by `DiscountCode`; this port decides
//! whether it is redeemable right now and for how much.

use async_trait::async_trait;

use crate::domain::foundation::{AuthorId, DomainError, Percentage};
use crate::domain::subscription::DiscountCode;

#[async_trait]
pub trait DiscountValidator: Send + Sync {
    /// # Returns
    ///
    /// - `Ok(Valid { .. })` - Code applies to this author
    /// - `Ok(Invalid(reason))` - Code exists but cannot be used, or does not exist
    /// - `Err(DomainError)` - Infrastructure error occurred
    async fn validate(
        &self,
        code: &DiscountCode,
        author_id: &AuthorId,
    ) -> Result<DiscountValidation, DomainError>;
}

/// Result of validating a discount code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscountValidation {
    Valid { percent: Percentage },
    Invalid(String),
}
