//! libSQL backend — implements `TicketStore`, `TicketQueue`, and
//! `ErrorLogSink` over one database. Supports local file and in-memory
//! databases.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errlog::{ErrorLogEntry, ErrorLogSink};
use crate::error::DatabaseError;
use crate::pipeline::types::{StoredAnalytics, SupportTicket, SupportTicketMessage, TicketStatus};
use crate::store::migrations;
use crate::store::traits::{
    QueueEnvelope, ReleaseOutcome, TicketIntake, TicketQueue, TicketStore, UpdateOutcome,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
/// Writes hold `write_lock` so no statement lands inside another task's
/// open transaction.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Most recent error-log entries, newest first.
    pub async fn recent_error_log(&self, limit: usize) -> Result<Vec<ErrorLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT entry FROM error_log ORDER BY id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_error_log: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let raw: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("recent_error_log row: {e}")))?;
            match serde_json::from_str(&raw) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping error log row: {e}"),
            }
        }
        Ok(entries)
    }

    /// Messages parked after exhausting their receive limit.
    pub async fn dead_letters(&self) -> Result<Vec<QueueEnvelope>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, body, receive_count FROM ticket_queue WHERE status = 'dead' ORDER BY enqueued_at ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("dead_letters: {e}")))?;

        let mut envelopes = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            envelopes.push(
                row_to_envelope(&row)
                    .map_err(|e| DatabaseError::Query(format!("dead_letters row: {e}")))?,
            );
        }
        Ok(envelopes)
    }

    async fn current_status(&self, ticket_id: &str) -> Result<Option<TicketStatus>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT status FROM tickets WHERE id = ?1", params![ticket_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("current_status: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("current_status row: {e}")))?;
                raw.parse().map(Some).map_err(DatabaseError::Serialization)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("current_status: {e}"))),
        }
    }

    /// Resolve a zero-row conditional update into an outcome.
    async fn unchanged_or_missing(&self, ticket_id: &str) -> Result<UpdateOutcome, DatabaseError> {
        match self.current_status(ticket_id).await? {
            Some(current) => Ok(UpdateOutcome::Unchanged { current }),
            None => Err(DatabaseError::NotFound {
                entity: "ticket".into(),
                id: ticket_id.to_string(),
            }),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to a SupportTicket.
///
/// Column order matches TICKET_COLUMNS:
/// 0:id, 1:content, 2:status, 3:customer_id, 4:analytics, 5:created_at, 6:updated_at
fn row_to_ticket(row: &libsql::Row) -> Result<SupportTicket, DatabaseError> {
    let status_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("ticket status: {e}")))?;
    let analytics_str: Option<String> = row.get(4).ok();
    let created_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("ticket created_at: {e}")))?;
    let updated_str: String = row
        .get(6)
        .map_err(|e| DatabaseError::Query(format!("ticket updated_at: {e}")))?;

    let analytics = match analytics_str {
        Some(raw) => Some(
            serde_json::from_str::<StoredAnalytics>(&raw)
                .map_err(|e| DatabaseError::Serialization(format!("ticket analytics: {e}")))?,
        ),
        None => None,
    };

    Ok(SupportTicket {
        id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("ticket id: {e}")))?,
        content: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("ticket content: {e}")))?,
        status: status_str.parse().map_err(DatabaseError::Serialization)?,
        customer_id: row
            .get(3)
            .map_err(|e| DatabaseError::Query(format!("ticket customer_id: {e}")))?,
        analytics,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Column order: 0:id, 1:body, 2:receive_count
fn row_to_envelope(row: &libsql::Row) -> Result<QueueEnvelope, libsql::Error> {
    let receive_count: i64 = row.get(2)?;
    Ok(QueueEnvelope {
        message_id: row.get(0)?,
        body: row.get(1)?,
        receive_count: u32::try_from(receive_count).unwrap_or(u32::MAX),
    })
}

const TICKET_COLUMNS: &str = "id, content, status, customer_id, analytics, created_at, updated_at";

/// `status IN (...)` guard admitting every status that may move to `target`.
fn status_guard(target: TicketStatus) -> String {
    let sources: Vec<String> = TicketStatus::sources_of(target)
        .iter()
        .map(|status| format!("'{}'", status.as_str()))
        .collect();
    format!("status IN ({})", sources.join(", "))
}

async fn insert_ticket_row(conn: &Connection, ticket: &SupportTicket) -> Result<(), DatabaseError> {
    let analytics_json = match &ticket.analytics {
        Some(a) => libsql::Value::Text(
            serde_json::to_string(a)
                .map_err(|e| DatabaseError::Serialization(format!("insert_ticket: {e}")))?,
        ),
        None => libsql::Value::Null,
    };
    let generated_at = match &ticket.analytics {
        Some(a) => libsql::Value::Text(format_datetime(&a.generated_at)),
        None => libsql::Value::Null,
    };

    conn.execute(
        "INSERT INTO tickets (id, content, status, customer_id, analytics, analytics_generated_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            ticket.id.clone(),
            ticket.content.clone(),
            ticket.status.as_str(),
            ticket.customer_id.clone(),
            analytics_json,
            generated_at,
            format_datetime(&ticket.created_at),
            format_datetime(&ticket.updated_at),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_ticket: {e}")))?;
    Ok(())
}

/// Insert a pending queue row. Returns the new message id.
async fn insert_queue_row(
    conn: &Connection,
    message: &SupportTicketMessage,
) -> Result<String, DatabaseError> {
    let id = Uuid::new_v4().to_string();
    let body = serde_json::to_string(message)
        .map_err(|e| DatabaseError::Serialization(format!("enqueue: {e}")))?;
    let now = format_datetime(&Utc::now());

    conn.execute(
        "INSERT INTO ticket_queue (id, body, status, receive_count, enqueued_at, updated_at)
         VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
        params![id.clone(), body, now],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("enqueue: {e}")))?;
    Ok(id)
}

// ── Tickets ─────────────────────────────────────────────────────────

#[async_trait]
impl TicketStore for LibSqlBackend {
    async fn insert_ticket(&self, ticket: &SupportTicket) -> Result<(), DatabaseError> {
        let _write = self.write_lock.lock().await;
        insert_ticket_row(self.conn(), ticket).await?;
        debug!(ticket_id = %ticket.id, "Ticket inserted into DB");
        Ok(())
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<SupportTicket>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_ticket: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_ticket(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_ticket: {e}"))),
        }
    }

    async fn apply_analytics(
        &self,
        ticket_id: &str,
        analytics: &StoredAnalytics,
    ) -> Result<UpdateOutcome, DatabaseError> {
        let payload = serde_json::to_string(analytics)
            .map_err(|e| DatabaseError::Serialization(format!("apply_analytics: {e}")))?;
        let stamp = format_datetime(&analytics.generated_at);
        let target = TicketStatus::Processed;
        let sql = format!(
            "UPDATE tickets
             SET status = '{}', updated_at = ?1, analytics = ?2, analytics_generated_at = ?1
             WHERE id = ?3
               AND {}
               AND (analytics_generated_at IS NULL OR analytics_generated_at <= ?1)",
            target.as_str(),
            status_guard(target),
        );

        let _write = self.write_lock.lock().await;
        let changed = self
            .conn()
            .execute(&sql, params![stamp, payload, ticket_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("apply_analytics: {e}")))?;

        if changed > 0 {
            debug!(ticket_id, urgency = %analytics.urgency, "Ticket analytics applied");
            return Ok(UpdateOutcome::Applied);
        }
        self.unchanged_or_missing(ticket_id).await
    }

    async fn mark_failed(
        &self,
        ticket_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, DatabaseError> {
        let target = TicketStatus::Failed;
        let sql = format!(
            "UPDATE tickets SET status = '{}', updated_at = ?1 WHERE id = ?2 AND {}",
            target.as_str(),
            status_guard(target),
        );

        let _write = self.write_lock.lock().await;
        let changed = self
            .conn()
            .execute(&sql, params![format_datetime(&now), ticket_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_failed: {e}")))?;

        if changed > 0 {
            debug!(ticket_id, "Ticket marked failed");
            return Ok(UpdateOutcome::Applied);
        }
        self.unchanged_or_missing(ticket_id).await
    }
}

// ── Queue ───────────────────────────────────────────────────────────

#[async_trait]
impl TicketQueue for LibSqlBackend {
    async fn enqueue(&self, message: &SupportTicketMessage) -> Result<String, DatabaseError> {
        let _write = self.write_lock.lock().await;
        let id = insert_queue_row(self.conn(), message).await?;
        debug!(message_id = %id, ticket_id = %message.ticket_id, "Message enqueued");
        Ok(id)
    }

    async fn receive(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueEnvelope>, DatabaseError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        // Deliveries unsettled since before this instant are visible again.
        let expired_before = chrono::Duration::from_std(visibility_timeout)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let _write = self.write_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "UPDATE ticket_queue
                 SET status = 'in_flight', receive_count = receive_count + 1, updated_at = ?1
                 WHERE id IN (
                     SELECT id FROM ticket_queue
                     WHERE status = 'pending' OR (status = 'in_flight' AND updated_at <= ?3)
                     ORDER BY enqueued_at ASC, id ASC LIMIT ?2
                 )
                 RETURNING id, body, receive_count, enqueued_at",
                params![
                    format_datetime(&now),
                    max as i64,
                    format_datetime(&expired_before)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("receive: {e}")))?;

        let mut received = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let envelope = row_to_envelope(&row)
                .map_err(|e| DatabaseError::Query(format!("receive row: {e}")))?;
            let enqueued_at: String = row
                .get(3)
                .map_err(|e| DatabaseError::Query(format!("receive row: {e}")))?;
            received.push((enqueued_at, envelope));
        }

        // RETURNING order is unspecified.
        received.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.message_id.cmp(&b.1.message_id)));
        Ok(received.into_iter().map(|(_, e)| e).collect())
    }

    async fn ack(&self, message_id: &str) -> Result<(), DatabaseError> {
        let _write = self.write_lock.lock().await;
        self.conn()
            .execute("DELETE FROM ticket_queue WHERE id = ?1", params![message_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("ack: {e}")))?;
        debug!(message_id, "Message acknowledged");
        Ok(())
    }

    async fn release(
        &self,
        message_id: &str,
        error: &str,
        max_receive_count: u32,
    ) -> Result<ReleaseOutcome, DatabaseError> {
        let now = format_datetime(&Utc::now());
        let _write = self.write_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "UPDATE ticket_queue
                 SET status = CASE WHEN receive_count >= ?2 THEN 'dead' ELSE 'pending' END,
                     last_error = ?3,
                     updated_at = ?4
                 WHERE id = ?1 AND status = 'in_flight'
                 RETURNING status",
                params![message_id, i64::from(max_receive_count), error, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let status: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("release row: {e}")))?;
                if status == "dead" {
                    warn!(message_id, "Message dead-lettered");
                    Ok(ReleaseOutcome::DeadLettered)
                } else {
                    Ok(ReleaseOutcome::Requeued)
                }
            }
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "in-flight message".into(),
                id: message_id.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("release: {e}"))),
        }
    }

    async fn recover_in_flight(&self) -> Result<usize, DatabaseError> {
        let _write = self.write_lock.lock().await;
        let count = self
            .conn()
            .execute(
                "UPDATE ticket_queue SET status = 'pending', updated_at = ?1 WHERE status = 'in_flight'",
                params![format_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recover_in_flight: {e}")))?;

        if count > 0 {
            info!(count, "Recovered in-flight queue messages");
        }
        Ok(count as usize)
    }
}

// ── Intake ──────────────────────────────────────────────────────────

#[async_trait]
impl TicketIntake for LibSqlBackend {
    async fn submit_ticket(&self, ticket: &SupportTicket) -> Result<String, DatabaseError> {
        let _write = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("submit_ticket begin: {e}")))?;

        let written = match insert_ticket_row(&tx, ticket).await {
            Ok(()) => insert_queue_row(&tx, &ticket.to_message()).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(message_id) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("submit_ticket commit: {e}")))?;
                debug!(ticket_id = %ticket.id, message_id = %message_id, "Ticket submitted");
                Ok(message_id)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(ticket_id = %ticket.id, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

// ── Error log ───────────────────────────────────────────────────────

#[async_trait]
impl ErrorLogSink for LibSqlBackend {
    async fn write_entry(&self, entry: &ErrorLogEntry) -> Result<(), DatabaseError> {
        let raw = serde_json::to_string(entry)
            .map_err(|e| DatabaseError::Serialization(format!("write_entry: {e}")))?;
        let _write = self.write_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO error_log (ticket_id, service, entry, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.ticket_id.clone(),
                    entry.service.clone(),
                    raw,
                    format_datetime(&entry.timestamp),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("write_entry: {e}")))?;
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errlog::ErrorReporter;
    use crate::pipeline::types::{TicketAnalytics, Urgency};

    /// Long enough that nothing in flight expires during a test.
    const HIDDEN: Duration = Duration::from_secs(300);

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn analytics_at(urgency: Urgency, response: &str, at: DateTime<Utc>) -> StoredAnalytics {
        StoredAnalytics::new(
            &TicketAnalytics {
                urgency,
                response: response.into(),
            },
            at,
        )
    }

    // ── Ticket tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_ticket() {
        let db = test_db().await;
        let ticket = SupportTicket::new("App crashes on login", "cust-9");
        db.insert_ticket(&ticket).await.unwrap();

        let fetched = db.get_ticket(&ticket.id).await.unwrap().unwrap();
        assert_eq!(fetched, ticket);
    }

    #[tokio::test]
    async fn get_missing_ticket_is_none() {
        let db = test_db().await;
        assert!(db.get_ticket("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_analytics_sets_processed_and_triple() {
        let db = test_db().await;
        let ticket = SupportTicket::new("Refund please", "c");
        db.insert_ticket(&ticket).await.unwrap();

        let now = Utc::now();
        let outcome = db
            .apply_analytics(&ticket.id, &analytics_at(Urgency::Low, "Refund issued.", now))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);

        let fetched = db.get_ticket(&ticket.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TicketStatus::Processed);
        assert_eq!(fetched.updated_at, now);
        let analytics = fetched.analytics.unwrap();
        assert_eq!(analytics.urgency, Urgency::Low);
        assert_eq!(analytics.response, "Refund issued.");
        assert_eq!(analytics.generated_at, now);
    }

    #[tokio::test]
    async fn apply_analytics_twice_is_idempotent() {
        let db = test_db().await;
        let ticket = SupportTicket::new("Password reset broken", "c");
        db.insert_ticket(&ticket).await.unwrap();

        let analytics = analytics_at(Urgency::High, "Resetting for you.", Utc::now());
        db.apply_analytics(&ticket.id, &analytics).await.unwrap();
        let once = db.get_ticket(&ticket.id).await.unwrap().unwrap();

        db.apply_analytics(&ticket.id, &analytics).await.unwrap();
        let twice = db.get_ticket(&ticket.id).await.unwrap().unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.status, TicketStatus::Processed);
    }

    #[tokio::test]
    async fn stale_analytics_do_not_overwrite_newer() {
        let db = test_db().await;
        let ticket = SupportTicket::new("x", "c");
        db.insert_ticket(&ticket).await.unwrap();

        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(30);
        db.apply_analytics(&ticket.id, &analytics_at(Urgency::Critical, "new", later))
            .await
            .unwrap();

        let outcome = db
            .apply_analytics(&ticket.id, &analytics_at(Urgency::Low, "old", earlier))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Unchanged {
                current: TicketStatus::Processed
            }
        );
        let fetched = db.get_ticket(&ticket.id).await.unwrap().unwrap();
        assert_eq!(fetched.analytics.unwrap().response, "new");
    }

    #[tokio::test]
    async fn apply_analytics_does_not_regress_completed() {
        let db = test_db().await;
        let mut ticket = SupportTicket::new("x", "c");
        ticket.status = TicketStatus::Completed;
        db.insert_ticket(&ticket).await.unwrap();

        let outcome = db
            .apply_analytics(&ticket.id, &analytics_at(Urgency::High, "r", Utc::now()))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Unchanged {
                current: TicketStatus::Completed
            }
        );
        let fetched = db.get_ticket(&ticket.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TicketStatus::Completed);
        assert!(fetched.analytics.is_none());
    }

    #[tokio::test]
    async fn apply_analytics_missing_ticket_is_not_found() {
        let db = test_db().await;
        let err = db
            .apply_analytics("ghost", &analytics_at(Urgency::Low, "r", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn mark_failed_only_from_received() {
        let db = test_db().await;
        let received = SupportTicket::new("a", "c");
        let processed = SupportTicket::new("b", "c");
        db.insert_ticket(&received).await.unwrap();
        db.insert_ticket(&processed).await.unwrap();
        db.apply_analytics(&processed.id, &analytics_at(Urgency::Low, "r", Utc::now()))
            .await
            .unwrap();

        assert_eq!(
            db.mark_failed(&received.id, Utc::now()).await.unwrap(),
            UpdateOutcome::Applied
        );
        assert_eq!(
            db.mark_failed(&processed.id, Utc::now()).await.unwrap(),
            UpdateOutcome::Unchanged {
                current: TicketStatus::Processed
            }
        );
        let failed = db.get_ticket(&received.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TicketStatus::Failed);
    }

    #[test]
    fn status_guard_follows_transition_rules() {
        assert_eq!(
            status_guard(TicketStatus::Processed),
            "status IN ('RECEIVED', 'PROCESSED')"
        );
        assert_eq!(
            status_guard(TicketStatus::Failed),
            "status IN ('RECEIVED', 'FAILED')"
        );
    }

    // ── Queue tests ─────────────────────────────────────────────────

    fn message(ticket_id: &str) -> SupportTicketMessage {
        SupportTicketMessage {
            ticket_id: ticket_id.into(),
            content: format!("content for {ticket_id}"),
        }
    }

    #[tokio::test]
    async fn enqueue_and_receive_in_order() {
        let db = test_db().await;
        let first = db.enqueue(&message("t-1")).await.unwrap();
        let second = db.enqueue(&message("t-2")).await.unwrap();

        let batch = db.receive(10, HIDDEN).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].message_id, first);
        assert_eq!(batch[1].message_id, second);
        assert_eq!(batch[0].receive_count, 1);

        let decoded: SupportTicketMessage = serde_json::from_str(&batch[0].body).unwrap();
        assert_eq!(decoded, message("t-1"));
    }

    #[tokio::test]
    async fn receive_respects_max_and_hides_in_flight() {
        let db = test_db().await;
        for i in 0..3 {
            db.enqueue(&message(&format!("t-{i}"))).await.unwrap();
        }

        assert_eq!(db.receive(2, HIDDEN).await.unwrap().len(), 2);
        assert_eq!(db.receive(2, HIDDEN).await.unwrap().len(), 1);
        assert!(db.receive(2, HIDDEN).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ack_removes_message() {
        let db = test_db().await;
        let id = db.enqueue(&message("t-1")).await.unwrap();
        db.receive(1, HIDDEN).await.unwrap();
        db.ack(&id).await.unwrap();

        assert_eq!(db.recover_in_flight().await.unwrap(), 0);
        assert!(db.receive(1, HIDDEN).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn release_requeues_then_dead_letters() {
        let db = test_db().await;
        let id = db.enqueue(&message("t-1")).await.unwrap();

        db.receive(1, HIDDEN).await.unwrap();
        assert_eq!(
            db.release(&id, "store down", 2).await.unwrap(),
            ReleaseOutcome::Requeued
        );

        let redelivered = db.receive(1, HIDDEN).await.unwrap();
        assert_eq!(redelivered[0].receive_count, 2);
        assert_eq!(
            db.release(&id, "store down", 2).await.unwrap(),
            ReleaseOutcome::DeadLettered
        );

        assert!(db.receive(1, HIDDEN).await.unwrap().is_empty());
        let dead = db.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message_id, id);
    }

    #[tokio::test]
    async fn release_unknown_message_is_not_found() {
        let db = test_db().await;
        let err = db.release("missing", "x", 3).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn recover_in_flight_makes_messages_visible() {
        let db = test_db().await;
        db.enqueue(&message("t-1")).await.unwrap();
        db.receive(1, HIDDEN).await.unwrap();

        assert_eq!(db.recover_in_flight().await.unwrap(), 1);
        let batch = db.receive(1, HIDDEN).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].receive_count, 2);
    }

    #[tokio::test]
    async fn unsettled_delivery_reappears_after_visibility_timeout() {
        let db = test_db().await;
        let id = db.enqueue(&message("t-1")).await.unwrap();

        db.receive(1, HIDDEN).await.unwrap();
        assert!(db.receive(1, HIDDEN).await.unwrap().is_empty());

        let redelivered = db.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message_id, id);
        assert_eq!(redelivered[0].receive_count, 2);

        // The new delivery can be settled as usual.
        assert_eq!(
            db.release(&id, "retry", 2).await.unwrap(),
            ReleaseOutcome::DeadLettered
        );
    }

    // ── Intake tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn submit_ticket_writes_ticket_and_message() {
        let db = test_db().await;
        let ticket = SupportTicket::new("Cannot log in", "cust-2");
        let message_id = db.submit_ticket(&ticket).await.unwrap();

        assert_eq!(db.get_ticket(&ticket.id).await.unwrap().unwrap(), ticket);
        let batch = db.receive(10, HIDDEN).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message_id, message_id);
        let decoded: SupportTicketMessage = serde_json::from_str(&batch[0].body).unwrap();
        assert_eq!(decoded, ticket.to_message());
    }

    #[tokio::test]
    async fn submit_ticket_rolls_back_when_enqueue_fails() {
        let db = test_db().await;
        db.conn()
            .execute("DROP TABLE ticket_queue", ())
            .await
            .unwrap();

        let ticket = SupportTicket::new("Lost without a message", "c");
        let err = db.submit_ticket(&ticket).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)));
        assert!(db.get_ticket(&ticket.id).await.unwrap().is_none());

        // The connection is usable again after the rollback.
        let other = SupportTicket::new("plain insert", "c");
        db.insert_ticket(&other).await.unwrap();
        assert!(db.get_ticket(&other.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn submit_ticket_with_duplicate_id_leaves_one_message() {
        let db = test_db().await;
        let ticket = SupportTicket::new("dup", "c");
        db.submit_ticket(&ticket).await.unwrap();
        assert!(db.submit_ticket(&ticket).await.is_err());

        assert_eq!(db.receive(10, HIDDEN).await.unwrap().len(), 1);
    }

    // ── Error log tests ─────────────────────────────────────────────

    #[tokio::test]
    async fn error_log_entries_round_trip() {
        let db = Arc::new(test_db().await);
        let reporter = ErrorReporter::new(Some(db.clone()), "svc", "test", "model-a");
        reporter
            .report(
                "t-7",
                &DatabaseError::Query("boom".into()),
                serde_json::json!({"stage": "update"}),
            )
            .await;

        let entries = db.recent_error_log(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ticket_id, "t-7");
        assert_eq!(entries[0].context["stage"], "update");
        assert_eq!(entries[0].environment, "test");
    }

    #[tokio::test]
    async fn file_backed_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("desk.db");
        let ticket = SupportTicket::new("persist me", "c");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.insert_ticket(&ticket).await.unwrap();
        }

        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        let fetched = reopened.get_ticket(&ticket.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "persist me");
    }
}
