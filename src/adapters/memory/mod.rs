//! In-memory adapters for tests and local development.

mod author_directory;
mod discount_validator;
mod subscription_store;

pub use author_directory::InMemoryAuthorDirectory;
pub use discount_validator::{DiscountRule, InMemoryDiscountValidator};
pub use subscription_store::InMemorySubscriptionStore;
