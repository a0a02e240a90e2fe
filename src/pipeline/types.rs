//! Shared types for the ticket-enrichment pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Urgency ─────────────────────────────────────────────────────────

/// Severity classification produced by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Every valid urgency, lowest first.
    pub const ALL: [Urgency; 4] = [
        Urgency::Low,
        Urgency::Medium,
        Urgency::High,
        Urgency::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|u| u.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown urgency '{wanted}'"))
    }
}

// ── Ticket status ───────────────────────────────────────────────────

/// Lifecycle status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Received,
    Processed,
    Completed,
    Failed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 4] = [
        TicketStatus::Received,
        TicketStatus::Processed,
        TicketStatus::Completed,
        TicketStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Processed => "PROCESSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether moving to `target` keeps the lifecycle monotonic.
    ///
    /// Re-applying the current status is allowed. `Failed` is only reachable
    /// from `Received`, and nothing leaves `Completed` or `Failed`.
    pub fn can_transition_to(&self, target: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, target),
            (Received, Received | Processed | Failed)
                | (Processed, Processed | Completed)
                | (Completed, Completed)
                | (Failed, Failed)
        )
    }

    /// Every status from which a write of `target` is allowed.
    pub fn sources_of(target: TicketStatus) -> Vec<TicketStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(target))
            .collect()
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(Self::Received),
            "PROCESSED" => Ok(Self::Processed),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

// ── Analytics ───────────────────────────────────────────────────────

/// Enrichment produced by one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketAnalytics {
    pub urgency: Urgency,
    pub response: String,
}

/// Analytics as persisted on the ticket. Always a complete triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalytics {
    pub urgency: Urgency,
    pub response: String,
    pub generated_at: DateTime<Utc>,
}

impl StoredAnalytics {
    pub fn new(analytics: &TicketAnalytics, generated_at: DateTime<Utc>) -> Self {
        Self {
            urgency: analytics.urgency,
            response: analytics.response.clone(),
            generated_at,
        }
    }
}

// ── Ticket ──────────────────────────────────────────────────────────

/// A customer support request tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicket {
    pub id: String,
    pub content: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<StoredAnalytics>,
}

impl SupportTicket {
    /// A freshly received ticket with a new UUID.
    pub fn new(content: impl Into<String>, customer_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            status: TicketStatus::Received,
            created_at: now,
            updated_at: now,
            customer_id: customer_id.into(),
            analytics: None,
        }
    }

    /// The queue payload for this ticket.
    pub fn to_message(&self) -> SupportTicketMessage {
        SupportTicketMessage {
            ticket_id: self.id.clone(),
            content: self.content.clone(),
        }
    }
}

// ── Queue payload ───────────────────────────────────────────────────

/// Queue payload: a projection of the ticket at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicketMessage {
    pub ticket_id: String,
    pub content: String,
}
