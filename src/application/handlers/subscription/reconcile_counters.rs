//! ReconcileCountersHandler - Recomputes subscriber counters from the records.
//!
//! Counters are only ever changed by transitions, so drift means a bug or a
//! manual database edit. Each author's counter is recounted and corrected in
//! one store operation; every discrepancy is reported and logged.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::foundation::AuthorId;
use crate::domain::subscription::SubscriptionError;
use crate::ports::{CounterReconciliation, SubscriptionStore};

/// Command to reconcile counters, for one author or all of them.
#[derive(Debug, Clone, Default)]
pub struct ReconcileCountersCommand {
    pub author_id: Option<AuthorId>,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileCountersResult {
    pub authors_checked: usize,
    /// Authors whose counter was wrong, with the values before correction.
    pub corrected: Vec<CounterReconciliation>,
    /// Authors that could not be reconciled this pass.
    pub failed: Vec<AuthorId>,
}

/// Handler for counter reconciliation.
pub struct ReconcileCountersHandler {
    store: Arc<dyn SubscriptionStore>,
}

impl ReconcileCountersHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    pub async fn handle(
        &self,
        cmd: ReconcileCountersCommand,
    ) -> Result<ReconcileCountersResult, SubscriptionError> {
        let authors = match cmd.author_id {
            Some(author_id) => vec![author_id],
            None => self.store.author_ids().await?,
        };

        let mut result = ReconcileCountersResult::default();
        for author_id in authors {
            result.authors_checked += 1;
            match self.store.reconcile_counter(&author_id).await {
                Ok(report) if report.is_consistent() => {}
                Ok(report) => {
                    warn!(
                        author_id = %report.author_id,
                        recorded = report.recorded,
                        actual = report.actual,
                        drift = report.drift(),
                        "Subscriber counter drift corrected"
                    );
                    result.corrected.push(report);
                }
                Err(err) => {
                    // One author must not block the rest of the pass.
                    error!(author_id = %author_id, error = %err, "Counter reconciliation failed");
                    result.failed.push(author_id);
                }
            }
        }

        info!(
            authors_checked = result.authors_checked,
            corrected = result.corrected.len(),
            failed = result.failed.len(),
            "Counter reconciliation finished"
        );
        Ok(result)
    }
}
