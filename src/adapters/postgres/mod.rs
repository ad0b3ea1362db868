//! PostgreSQL adapters.
//!
//! - `PostgresSubscriptionStore` - Subscriptions and author counters in one transaction
//! - `PostgresAuthorDirectory` - Per-plan prices from the `authors` table
//! - `PostgresDiscountValidator` - Redemption rules from `discount_codes`

mod author_directory;
mod discount_validator;
mod pool;
mod subscription_store;

pub use author_directory::PostgresAuthorDirectory;
pub use discount_validator::PostgresDiscountValidator;
pub use pool::{connect, run_migrations};
pub use subscription_store::PostgresSubscriptionStore;
