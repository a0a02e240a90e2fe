//! Storage traits for tickets and the work queue.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::pipeline::types::{StoredAnalytics, SupportTicket, SupportTicketMessage, TicketStatus};

/// Result of a conditional ticket update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The row was written.
    Applied,
    /// The ticket exists but the write would regress it; nothing changed.
    Unchanged { current: TicketStatus },
}

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEnvelope {
    pub message_id: String,
    /// Raw JSON payload, decoded by the consumer.
    pub body: String,
    /// Deliveries so far, including this one.
    pub receive_count: u32,
}

/// What happened to a message handed back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Visible again for the next receive.
    Requeued,
    /// Receive limit reached; parked for inspection.
    DeadLettered,
}

/// Ticket persistence.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert a newly created ticket.
    async fn insert_ticket(&self, ticket: &SupportTicket) -> Result<(), DatabaseError>;

    /// Point read by ticket id.
    async fn get_ticket(&self, id: &str) -> Result<Option<SupportTicket>, DatabaseError>;

    /// Set `PROCESSED` + analytics, stamping `updated_at` with `generated_at`.
    ///
    /// Only applies while the ticket is `RECEIVED` or `PROCESSED` and carries no
    /// analytics newer than `analytics.generated_at`. A missing ticket is
    /// `DatabaseError::NotFound`.
    async fn apply_analytics(
        &self,
        ticket_id: &str,
        analytics: &StoredAnalytics,
    ) -> Result<UpdateOutcome, DatabaseError>;

    /// Move a `RECEIVED` ticket to `FAILED`. `PROCESSED` and `COMPLETED` are
    /// left alone; an already failed ticket only gets a fresh `updated_at`.
    async fn mark_failed(
        &self,
        ticket_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, DatabaseError>;
}

/// At-least-once work queue.
#[async_trait]
pub trait TicketQueue: Send + Sync {
    /// Enqueue a message. Returns the queue message id.
    async fn enqueue(&self, message: &SupportTicketMessage) -> Result<String, DatabaseError>;

    /// Take up to `max` visible messages, oldest first, marking them in flight.
    ///
    /// Visible means pending, or in flight without being settled for longer
    /// than `visibility_timeout`.
    async fn receive(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueEnvelope>, DatabaseError>;

    /// Remove a successfully processed message.
    async fn ack(&self, message_id: &str) -> Result<(), DatabaseError>;

    /// Return a failed delivery for redelivery, or dead-letter it once its
    /// receive count has reached `max_receive_count`.
    async fn release(
        &self,
        message_id: &str,
        error: &str,
        max_receive_count: u32,
    ) -> Result<ReleaseOutcome, DatabaseError>;

    /// Make in-flight messages pending again (after a crash). Returns the count.
    async fn recover_in_flight(&self) -> Result<usize, DatabaseError>;
}

/// Ticket creation that writes the ticket and its queue message together.
#[async_trait]
pub trait TicketIntake: Send + Sync {
    /// Insert `ticket` and enqueue its message in one transaction.
    ///
    /// Returns the queue message id. On error neither row exists.
    async fn submit_ticket(&self, ticket: &SupportTicket) -> Result<String, DatabaseError>;
}
