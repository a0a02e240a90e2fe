//! SMTP notifier via lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::SmtpConfig;
use crate::error::NotifyError;
use crate::notify::{Notification, Notifier};

/// Sends each alert as one email to every configured recipient.
pub struct SmtpNotifier {
    config: SmtpConfig,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl SmtpNotifier {
    /// Validate addresses up front so bad config fails at startup.
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&config.from_address, "from")?;
        let recipients = config
            .recipients
            .iter()
            .map(|r| parse_mailbox(r, "recipient"))
            .collect::<Result<Vec<_>, _>>()?;
        if recipients.is_empty() {
            return Err(misconfigured("no recipients configured"));
        }

        Ok(Self {
            config,
            from,
            recipients,
        })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject.clone());
        for to in &self.recipients {
            builder = builder.to(to.clone());
        }
        builder
            .body(notification.body.clone())
            .map_err(|e| publish_failed(format!("Failed to build email: {e}")))
    }
}

/// Blocking send; run on the blocking pool.
fn send_blocking(config: &SmtpConfig, email: &Message) -> Result<(), NotifyError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::relay(&config.host)
        .map_err(|e| publish_failed(format!("SMTP relay error: {e}")))?
        .port(config.port)
        .credentials(creds)
        .build();

    transport
        .send(email)
        .map_err(|e| publish_failed(format!("SMTP send failed: {e}")))?;
    Ok(())
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = self.build_message(notification)?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || send_blocking(&config, &email))
            .await
            .map_err(|e| publish_failed(format!("SMTP task failed: {e}")))??;

        tracing::debug!(
            recipients = self.recipients.len(),
            subject = %notification.subject,
            "Notification email sent"
        );
        Ok(())
    }
}

fn parse_mailbox(raw: &str, role: &str) -> Result<Mailbox, NotifyError> {
    raw.parse()
        .map_err(|e| misconfigured(format!("Invalid {role} address '{raw}': {e}")))
}

fn misconfigured(reason: impl Into<String>) -> NotifyError {
    NotifyError::Misconfigured {
        name: "smtp".into(),
        reason: reason.into(),
    }
}

fn publish_failed(reason: impl Into<String>) -> NotifyError {
    NotifyError::PublishFailed {
        name: "smtp".into(),
        reason: reason.into(),
    }
}
