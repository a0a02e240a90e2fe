//! Ticket state updater — one conditional write per delivery.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{StoredAnalytics, TicketAnalytics};
use crate::store::traits::{TicketStore, UpdateOutcome};

/// Moves tickets to `PROCESSED` with their analytics, never regressing state.
pub struct TicketStateUpdater {
    store: Arc<dyn TicketStore>,
}

impl TicketStateUpdater {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Apply analytics stamped with the current time.
    pub async fn apply(
        &self,
        ticket_id: &str,
        analytics: &TicketAnalytics,
    ) -> Result<UpdateOutcome, DatabaseError> {
        self.apply_at(ticket_id, analytics, Utc::now()).await
    }

    /// Apply analytics generated at `now`.
    ///
    /// Redelivering the same message re-applies an equivalent triple; a
    /// ticket already past `PROCESSED` or holding newer analytics is left as is.
    pub async fn apply_at(
        &self,
        ticket_id: &str,
        analytics: &TicketAnalytics,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, DatabaseError> {
        let stored = StoredAnalytics::new(analytics, now);
        let outcome = self.store.apply_analytics(ticket_id, &stored).await?;

        match outcome {
            UpdateOutcome::Applied => {
                debug!(ticket_id, urgency = %analytics.urgency, "Ticket moved to PROCESSED");
            }
            UpdateOutcome::Unchanged { current } => {
                info!(ticket_id, status = %current, "Ticket update skipped, state already ahead");
            }
        }
        Ok(outcome)
    }

    /// Mark a ticket that will never be processed.
    pub async fn mark_failed(&self, ticket_id: &str) -> Result<UpdateOutcome, DatabaseError> {
        let outcome = self.store.mark_failed(ticket_id, Utc::now()).await?;
        if outcome == UpdateOutcome::Applied {
            info!(ticket_id, "Ticket marked FAILED");
        }
        Ok(outcome)
    }
}
