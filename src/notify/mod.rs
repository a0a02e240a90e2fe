//! Notification dispatch — alerts the support team about enriched tickets.
//!
//! One publish per ticket through a [`Notifier`]. SMTP is used when
//! configured; otherwise [`LogNotifier`] emits the alert as a tracing event.

mod smtp;

pub use smtp::SmtpNotifier;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::NotifyError;
use crate::pipeline::types::{SupportTicketMessage, TicketAnalytics};

/// A human-readable alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// Publish-only notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logs and errors.
    fn name(&self) -> &str;

    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Build the alert for an enriched ticket.
///
/// The subject leads with the urgency token so mail filters can route on it.
pub fn format_notification(
    message: &SupportTicketMessage,
    analytics: &TicketAnalytics,
) -> Notification {
    Notification {
        subject: format!("::{}:: New Support Ticket", analytics.urgency),
        body: format!(
            "Ticket ID: {}\nUrgency: {}\n\nContent:\n{}\n\nSuggested response:\n{}\n",
            message.ticket_id, analytics.urgency, message.content, analytics.response
        ),
    }
}

/// Formats and publishes ticket alerts.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Publish one alert. Failures propagate to the caller.
    pub async fn dispatch(
        &self,
        message: &SupportTicketMessage,
        analytics: &TicketAnalytics,
    ) -> Result<(), NotifyError> {
        let notification = format_notification(message, analytics);
        self.notifier.publish(&notification).await?;
        info!(
            ticket_id = %message.ticket_id,
            channel = self.notifier.name(),
            urgency = %analytics.urgency,
            "Support team notified"
        );
        Ok(())
    }
}

/// Notifier that writes alerts to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            subject = %notification.subject,
            body = %notification.body,
            "Support ticket notification"
        );
        Ok(())
    }
}
