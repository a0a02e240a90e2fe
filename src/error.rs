//! Error types for the support desk.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Context length exceeded: {used} characters used, {limit} allowed")]
    ContextLengthExceeded { used: usize, limit: usize },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Failure to recover structured analytics from a model reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("No JSON object found in model reply")]
    NoJsonObject,

    #[error("Model reply contained no parseable JSON object: {0}")]
    InvalidJson(String),
}

/// Notification channel errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification channel {name} is misconfigured: {reason}")]
    Misconfigured { name: String, reason: String },

    #[error("Failed to publish on channel {name}: {reason}")]
    PublishFailed { name: String, reason: String },
}

/// Per-message pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to decode queue message {message_id}: {reason}")]
    Decode { message_id: String, reason: String },

    #[error("Ticket update failed: {0}")]
    Update(#[from] DatabaseError),

    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("{failed} of {total} messages in batch failed")]
    BatchFailed { failed: usize, total: usize },
}

/// Intake endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("{0}")]
    Validation(String),

    #[error("Failed to persist ticket: {0}")]
    Store(#[from] DatabaseError),
}
