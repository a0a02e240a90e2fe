//! Structured error log — best-effort sink for processing failures.
//!
//! Every report is emitted as a tracing event. When a sink is configured the
//! entry is also persisted; sink failures only produce a fallback log line.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DatabaseError;

/// Error details carried by a log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub name: String,
    pub message: String,
    /// Rendered `source()` chain, outermost cause first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorDetail {
    pub fn from_error<E: std::error::Error + ?Sized>(name: impl Into<String>, err: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            name: name.into(),
            message: err.to_string(),
            stack: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\n"))
            },
        }
    }
}

/// One structured error-log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub service: String,
    pub ticket_id: String,
    pub error: ErrorDetail,
    pub context: Value,
    pub environment: String,
}

/// Destination for structured error entries.
#[async_trait]
pub trait ErrorLogSink: Send + Sync {
    async fn write_entry(&self, entry: &ErrorLogEntry) -> Result<(), DatabaseError>;
}

/// Builds and records error-log entries. Never fails.
pub struct ErrorReporter {
    sink: Option<Arc<dyn ErrorLogSink>>,
    service: String,
    environment: String,
    model_id: String,
}

impl ErrorReporter {
    pub fn new(
        sink: Option<Arc<dyn ErrorLogSink>>,
        service: impl Into<String>,
        environment: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            service: service.into(),
            environment: environment.into(),
            model_id: model_id.into(),
        }
    }

    /// Reporter that only emits tracing events.
    pub fn console_only(service: impl Into<String>) -> Self {
        Self::new(None, service, "dev", "unknown")
    }

    /// Assemble an entry. `context` is merged with the configured model id.
    pub fn build_entry<E: std::error::Error + ?Sized>(
        &self,
        ticket_id: &str,
        error: &E,
        context: Value,
    ) -> ErrorLogEntry {
        let mut ctx = match context {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("detail".into(), other);
                map
            }
        };
        ctx.insert("modelId".into(), Value::String(self.model_id.clone()));

        ErrorLogEntry {
            timestamp: Utc::now(),
            level: "ERROR".into(),
            service: self.service.clone(),
            ticket_id: ticket_id.to_string(),
            error: ErrorDetail::from_error(short_type_name::<E>(), error),
            context: Value::Object(ctx),
            environment: self.environment.clone(),
        }
    }

    /// Record a failure for `ticket_id`.
    pub async fn report<E: std::error::Error + ?Sized>(
        &self,
        ticket_id: &str,
        error: &E,
        context: Value,
    ) {
        let entry = self.build_entry(ticket_id, error, context);
        let rendered = serde_json::to_string(&entry).unwrap_or_else(|_| entry.error.message.clone());

        tracing::error!(
            ticket_id = %entry.ticket_id,
            error_name = %entry.error.name,
            entry = %rendered,
            "Ticket processing error"
        );

        if let Some(sink) = &self.sink
            && let Err(e) = sink.write_entry(&entry).await
        {
            tracing::error!(
                ticket_id = %entry.ticket_id,
                sink_error = %e,
                entry = %rendered,
                "Failed to write error log entry"
            );
        }
    }
}

fn short_type_name<E: ?Sized>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
