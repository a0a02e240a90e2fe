//! Batch consumer — drives each queued message through the pipeline.
//!
//! Per message, strictly in order:
//! 1. Decode the queue payload
//! 2. Generate analytics (never fails)
//! 3. Apply the state update
//! 4. Notify the support team, unless the update left the ticket unchanged
//!
//! A failing message is recorded and the loop moves on; the caller decides
//! what to do with failed deliveries from the returned [`BatchReport`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::errlog::ErrorReporter;
use crate::error::PipelineError;
use crate::notify::NotificationDispatcher;
use crate::pipeline::analytics::AnalyticsGenerator;
use crate::pipeline::types::SupportTicketMessage;
use crate::pipeline::updater::TicketStateUpdater;
use crate::store::traits::{QueueEnvelope, UpdateOutcome};

/// Pipeline step at which a message failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Decode,
    Update,
    Notify,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Update => "update",
            Self::Notify => "notify",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed message in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFailure {
    pub message_id: String,
    /// Absent when the payload could not be decoded.
    pub ticket_id: Option<String>,
    pub stage: FailureStage,
    pub error: String,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Message ids that completed every step.
    pub processed: Vec<String>,
    pub failures: Vec<MessageFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.processed.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Re-raise a partially failed batch as an error.
    pub fn into_result(self) -> Result<Vec<String>, PipelineError> {
        if self.failures.is_empty() {
            Ok(self.processed)
        } else {
            Err(PipelineError::BatchFailed {
                failed: self.failures.len(),
                total: self.total(),
            })
        }
    }
}

/// Drains batches of queue deliveries.
pub struct BatchConsumer {
    analytics: AnalyticsGenerator,
    updater: TicketStateUpdater,
    dispatcher: NotificationDispatcher,
    reporter: Arc<ErrorReporter>,
}

impl BatchConsumer {
    pub fn new(
        analytics: AnalyticsGenerator,
        updater: TicketStateUpdater,
        dispatcher: NotificationDispatcher,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            analytics,
            updater,
            dispatcher,
            reporter,
        }
    }

    /// Process every delivery in order. Never aborts early.
    pub async fn handle_batch(&self, batch: Vec<QueueEnvelope>) -> BatchReport {
        let count = batch.len();
        info!(count, "Processing ticket batch");

        let mut report = BatchReport::default();
        for envelope in batch {
            match self.handle_message(&envelope).await {
                Ok(ticket_id) => {
                    info!(message_id = %envelope.message_id, ticket_id = %ticket_id, "Ticket processed");
                    report.processed.push(envelope.message_id);
                }
                Err(failure) => {
                    error!(
                        message_id = %failure.message_id,
                        stage = %failure.stage,
                        error = %failure.error,
                        "Failed to process ticket message"
                    );
                    report.failures.push(failure);
                }
            }
        }

        info!(
            processed = report.processed.len(),
            failed = report.failures.len(),
            total = count,
            "Batch processing complete"
        );
        report
    }

    async fn handle_message(&self, envelope: &QueueEnvelope) -> Result<String, MessageFailure> {
        let message = match decode(envelope) {
            Ok(message) => message,
            Err(e) => {
                self.reporter
                    .report(
                        "unknown",
                        &e,
                        json!({"stage": "decode", "messageId": envelope.message_id}),
                    )
                    .await;
                return Err(MessageFailure {
                    message_id: envelope.message_id.clone(),
                    ticket_id: None,
                    stage: FailureStage::Decode,
                    error: e.to_string(),
                });
            }
        };

        let analytics = self.analytics.generate(&message).await;

        match self.updater.apply(&message.ticket_id, &analytics).await {
            Ok(UpdateOutcome::Applied) => {}
            Ok(UpdateOutcome::Unchanged { current }) => {
                // Nothing was persisted, so there is nothing new to announce.
                debug!(
                    ticket_id = %message.ticket_id,
                    status = %current,
                    "Skipping notification for unchanged ticket"
                );
                return Ok(message.ticket_id);
            }
            Err(e) => {
                return Err(self
                    .fail(envelope, &message, FailureStage::Update, PipelineError::Update(e))
                    .await);
            }
        }

        // Status is already committed; a failed alert leaves the ticket PROCESSED.
        if let Err(e) = self.dispatcher.dispatch(&message, &analytics).await {
            return Err(self
                .fail(envelope, &message, FailureStage::Notify, PipelineError::Notify(e))
                .await);
        }

        Ok(message.ticket_id)
    }

    async fn fail(
        &self,
        envelope: &QueueEnvelope,
        message: &SupportTicketMessage,
        stage: FailureStage,
        error: PipelineError,
    ) -> MessageFailure {
        self.reporter
            .report(
                &message.ticket_id,
                &error,
                json!({"stage": stage.as_str(), "messageId": envelope.message_id}),
            )
            .await;
        MessageFailure {
            message_id: envelope.message_id.clone(),
            ticket_id: Some(message.ticket_id.clone()),
            stage,
            error: error.to_string(),
        }
    }
}

fn decode(envelope: &QueueEnvelope) -> Result<SupportTicketMessage, PipelineError> {
    serde_json::from_str(&envelope.body).map_err(|e| PipelineError::Decode {
        message_id: envelope.message_id.clone(),
        reason: e.to_string(),
    })
}
