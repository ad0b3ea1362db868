//! In-memory discount code table.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::foundation::{AuthorId, DomainError, ErrorCode, Percentage, Timestamp};
use crate::domain::subscription::DiscountCode;
use crate::ports::{Clock, DiscountValidation, DiscountValidator};

/// Redemption rules for one code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountRule {
    pub percent: Percentage,
    /// Restricts the code to one author; `None` applies everywhere.
    pub author_id: Option<AuthorId>,
    pub expires_at: Option<Timestamp>,
}

impl DiscountRule {
    pub fn percent(percent: Percentage) -> Self {
        Self {
            percent,
            author_id: None,
            expires_at: None,
        }
    }

    pub fn for_author(mut self, author_id: AuthorId) -> Self {
        self.author_id = Some(author_id);
        self
    }

    pub fn expiring_at(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Shared redemption check, also used by the Postgres validator.
    pub fn evaluate(&self, author_id: &AuthorId, now: Timestamp) -> DiscountValidation {
        if let Some(expires_at) = self.expires_at {
            if !now.is_before(&expires_at) {
                return DiscountValidation::Invalid("Discount code has expired".to_string());
            }
        }
        if let Some(scope) = &self.author_id {
            if scope != author_id {
                return DiscountValidation::Invalid(
                    "Discount code is not valid for this author".to_string(),
                );
            }
        }
        DiscountValidation::Valid { percent: self.percent }
    }
}

pub struct InMemoryDiscountValidator {
    codes: RwLock<HashMap<DiscountCode, DiscountRule>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDiscountValidator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            codes: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn with_code(self, code: DiscountCode, rule: DiscountRule) -> Self {
        if let Ok(mut codes) = self.codes.write() {
            codes.insert(code, rule);
        }
        self
    }
}

#[async_trait]
impl DiscountValidator for InMemoryDiscountValidator {
    async fn validate(
        &self,
        code: &DiscountCode,
        author_id: &AuthorId,
    ) -> Result<DiscountValidation, DomainError> {
        let codes = self
            .codes
            .read()
            .map_err(|_| DomainError::new(ErrorCode::InternalError, "Discount table lock poisoned"))?;

        Ok(match codes.get(code) {
            Some(rule) => rule.evaluate(author_id, self.clock.now()),
            None => DiscountValidation::Invalid("Unknown discount code".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::clock::ManualClock;

    fn code(s: &str) -> DiscountCode {
        DiscountCode::try_new(s).unwrap()
    }

    fn author(s: &str) -> AuthorId {
        AuthorId::new(s).unwrap()
    }

    #[tokio::test]
    async fn known_code_returns_percent() {
        let validator = InMemoryDiscountValidator::new(Arc::new(ManualClock::new(Timestamp::now())))
            .with_code(code("SPRING20"), DiscountRule::percent(Percentage::try_new(20).unwrap()));

        let result = validator.validate(&code("spring20"), &author("a1")).await.unwrap();
        assert_eq!(
            result,
            DiscountValidation::Valid { percent: Percentage::try_new(20).unwrap() }
        );
    }

    #[tokio::test]
    async fn unknown_code_is_invalid() {
        let validator = InMemoryDiscountValidator::new(Arc::new(ManualClock::new(Timestamp::now())));
        let result = validator.validate(&code("NOPE"), &author("a1")).await.unwrap();
        assert!(matches!(result, DiscountValidation::Invalid(_)));
    }

    #[tokio::test]
    async fn author_scoped_code_rejects_other_authors() {
        let rule = DiscountRule::percent(Percentage::try_new(10).unwrap()).for_author(author("a1"));
        let validator =
            InMemoryDiscountValidator::new(Arc::new(ManualClock::new(Timestamp::now()))).with_code(code("FAN10"), rule);

        assert!(matches!(
            validator.validate(&code("FAN10"), &author("a2")).await.unwrap(),
            DiscountValidation::Invalid(_)
        ));
        assert!(matches!(
            validator.validate(&code("FAN10"), &author("a1")).await.unwrap(),
            DiscountValidation::Valid { .. }
        ));
    }

    #[tokio::test]
    async fn expired_code_is_invalid() {
        let now = Timestamp::now();
        let rule = DiscountRule::percent(Percentage::try_new(50).unwrap()).expiring_at(now.minus_secs(1));
        let validator = InMemoryDiscountValidator::new(Arc::new(ManualClock::new(now))).with_code(code("OLD50"), rule);

        let result = validator.validate(&code("OLD50"), &author("a1")).await.unwrap();
        assert_eq!(result, DiscountValidation::Invalid("Discount code has expired".to_string()));
    }
}
