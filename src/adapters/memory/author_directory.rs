//! In-memory author pricing directory.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::foundation::{AuthorId, DomainError, ErrorCode};
use crate::ports::{AuthorDirectory, AuthorPricing};

#[derive(Default)]
pub struct InMemoryAuthorDirectory {
    authors: RwLock<HashMap<AuthorId, AuthorPricing>>,
}

impl InMemoryAuthorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration, used for tests and startup seeding.
    pub fn with_author(self, author_id: AuthorId, pricing: AuthorPricing) -> Self {
        if let Ok(mut authors) = self.authors.write() {
            authors.insert(author_id, pricing);
        }
        self
    }

    /// Replaces an author's prices. Existing subscriptions keep their snapshot.
    pub fn set_pricing(&self, author_id: AuthorId, pricing: AuthorPricing) -> Result<(), DomainError> {
        self.authors
            .write()
            .map_err(|_| lock_poisoned())?
            .insert(author_id, pricing);
        Ok(())
    }
}

fn lock_poisoned() -> DomainError {
    DomainError::new(ErrorCode::InternalError, "Author directory lock poisoned")
}

#[async_trait]
impl AuthorDirectory for InMemoryAuthorDirectory {
    async fn pricing(&self, author_id: &AuthorId) -> Result<Option<AuthorPricing>, DomainError> {
        Ok(self
            .authors
            .read()
            .map_err(|_| lock_poisoned())?
            .get(author_id)
            .cloned())
    }
}
