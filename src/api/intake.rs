//! Ticket intake and lookup, independent of the HTTP layer.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DatabaseError, IntakeError};
use crate::pipeline::types::SupportTicket;
use crate::store::traits::{TicketIntake, TicketStore};

/// Submitter id used when the request omits one.
pub const ANONYMOUS_CUSTOMER: &str = "anonymous";

/// Body of `POST /api/tickets`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

/// Body of `GET /api/tickets` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Persist a new `RECEIVED` ticket and enqueue exactly one message for it.
///
/// Whitespace-only content is rejected. Both rows are written atomically, so
/// a failed enqueue leaves no ticket behind.
pub async fn create_ticket(
    intake: &dyn TicketIntake,
    request: IntakeRequest,
) -> Result<SupportTicket, IntakeError> {
    let content = request
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| IntakeError::Validation("content is required".into()))?;
    let customer_id = request
        .customer_id
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_CUSTOMER.to_string());

    let ticket = SupportTicket::new(content, customer_id);
    if let Err(e) = intake.submit_ticket(&ticket).await {
        warn!(ticket_id = %ticket.id, error = %e, "Ticket not submitted");
        return Err(e.into());
    }

    info!(ticket_id = %ticket.id, customer_id = %ticket.customer_id, "Ticket received");
    Ok(ticket)
}

/// The generated response for a ticket, if any.
pub async fn lookup_response(
    store: &dyn TicketStore,
    ticket_id: &str,
) -> Result<LookupResponse, IntakeError> {
    if ticket_id.trim().is_empty() {
        return Err(IntakeError::Validation("ticketId is required".into()));
    }
    let ticket = store
        .get_ticket(ticket_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "ticket".into(),
            id: ticket_id.to_string(),
        })?;

    Ok(LookupResponse {
        response: ticket.analytics.map(|a| a.response),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;

    use crate::pipeline::types::{StoredAnalytics, TicketAnalytics, TicketStatus, Urgency};
    use crate::store::LibSqlBackend;
    use crate::store::traits::TicketQueue;

    fn request(content: Option<&str>, customer: Option<&str>) -> IntakeRequest {
        IntakeRequest {
            content: content.map(String::from),
            customer_id: customer.map(String::from),
        }
    }

    #[tokio::test]
    async fn creates_received_ticket_and_one_message() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let ticket = create_ticket(&db, request(Some("App crashes on login"), Some("cust-1")))
            .await
            .unwrap();

        let stored = db.get_ticket(&ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Received);
        assert_eq!(stored.customer_id, "cust-1");

        let batch = db.receive(10, Duration::from_secs(300)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].body.contains(&ticket.id));
    }

    #[tokio::test]
    async fn missing_customer_defaults_to_anonymous() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let ticket = create_ticket(&db, request(Some("help"), None)).await.unwrap();
        assert_eq!(ticket.customer_id, ANONYMOUS_CUSTOMER);
    }

    #[tokio::test]
    async fn empty_content_is_rejected_and_not_enqueued() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        for content in [None, Some(""), Some("   ")] {
            let err = create_ticket(&db, request(content, None)).await.unwrap_err();
            assert!(matches!(err, IntakeError::Validation(ref m) if m == "content is required"));
        }
        assert!(db.receive(10, Duration::from_secs(300)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_enqueue_leaves_no_ticket() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.conn()
            .execute("DROP TABLE ticket_queue", ())
            .await
            .unwrap();

        let err = create_ticket(&db, request(Some("Printer on fire"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Store(DatabaseError::Query(_))));

        let mut rows = db
            .conn()
            .query("SELECT COUNT(*) FROM tickets", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn lookup_reports_response_once_processed() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let ticket = create_ticket(&db, request(Some("help"), None)).await.unwrap();

        let pending = lookup_response(&db, &ticket.id).await.unwrap();
        assert!(pending.response.is_none());

        let analytics = TicketAnalytics {
            urgency: Urgency::Low,
            response: "All sorted.".into(),
        };
        db.apply_analytics(&ticket.id, &StoredAnalytics::new(&analytics, Utc::now()))
            .await
            .unwrap();

        let done = lookup_response(&db, &ticket.id).await.unwrap();
        assert_eq!(done.response.as_deref(), Some("All sorted."));
    }

    #[tokio::test]
    async fn lookup_unknown_ticket_is_not_found() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let err = lookup_response(&db, "missing").await.unwrap_err();
        assert!(matches!(err, IntakeError::Store(DatabaseError::NotFound { .. })));
    }
}
