//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Service name stamped on structured error-log entries.
pub const SERVICE_NAME: &str = "TicketEnrichmentProcessor";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the libSQL database file holding tickets, queue, and error log.
    pub db_path: PathBuf,
    /// HTTP port for the intake/lookup API.
    pub http_port: u16,
    /// Deployment stage reported in error-log entries.
    pub environment: String,
    /// Optional directory for rolling log files.
    pub log_dir: Option<PathBuf>,
    pub llm: LlmConfig,
    pub analytics: AnalyticsConfig,
    pub worker: WorkerConfig,
    /// SMTP settings; `None` routes notifications to the log.
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    /// Build configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: LlmBackend = env_or("SUPPORT_DESK_LLM_BACKEND", "anthropic")
            .parse()
            .map_err(|message| ConfigError::InvalidValue {
                key: "SUPPORT_DESK_LLM_BACKEND".into(),
                message,
            })?;

        let key_var = backend.api_key_var();
        let api_key = std::env::var(key_var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let llm = LlmConfig {
            backend,
            api_key: SecretString::from(api_key),
            model: env_or("SUPPORT_DESK_MODEL", backend.default_model()),
        };

        let defaults = AnalyticsConfig::default();
        let analytics = AnalyticsConfig {
            max_tokens: parse_env("SUPPORT_DESK_MAX_TOKENS", defaults.max_tokens)?,
            temperature: parse_env("SUPPORT_DESK_TEMPERATURE", defaults.temperature)?,
            top_p: parse_env("SUPPORT_DESK_TOP_P", defaults.top_p)?,
            max_input_chars: parse_env("SUPPORT_DESK_MAX_INPUT_CHARS", defaults.max_input_chars)?,
            model_timeout: Duration::from_secs(parse_env(
                "SUPPORT_DESK_MODEL_TIMEOUT_SECS",
                defaults.model_timeout.as_secs(),
            )?),
        };

        let defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            batch_size: parse_env("SUPPORT_DESK_BATCH_SIZE", defaults.batch_size)?,
            poll_interval: Duration::from_secs(parse_env(
                "SUPPORT_DESK_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            max_receive_count: parse_env(
                "SUPPORT_DESK_MAX_RECEIVE_COUNT",
                defaults.max_receive_count,
            )?,
            visibility_timeout: Duration::from_secs(parse_env(
                "SUPPORT_DESK_VISIBILITY_TIMEOUT_SECS",
                defaults.visibility_timeout.as_secs(),
            )?),
        };
        if worker.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SUPPORT_DESK_BATCH_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            db_path: PathBuf::from(env_or("SUPPORT_DESK_DB_PATH", "./data/support-desk.db")),
            http_port: parse_env("SUPPORT_DESK_PORT", 8080)?,
            environment: env_or("STAGE_NAME", "dev"),
            log_dir: std::env::var("SUPPORT_DESK_LOG_DIR").ok().map(PathBuf::from),
            llm,
            analytics,
            worker,
            smtp: SmtpConfig::from_env()?,
        })
    }
}

/// Model invocation parameters for the analytics step.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Largest ticket body (in characters) sent to the model.
    pub max_input_chars: usize,
    pub model_timeout: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.1,
            top_p: 0.9,
            max_input_chars: 100_000,
            model_timeout: Duration::from_secs(60),
        }
    }
}

/// Queue worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Messages pulled per batch.
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// Deliveries allowed before a message is dead-lettered.
    pub max_receive_count: u32,
    /// How long a delivery may stay unsettled before it is handed out again.
    pub visibility_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
            max_receive_count: 3,
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

/// SMTP notification settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Support team recipients.
    pub recipients: Vec<String>,
}

impl SmtpConfig {
    /// Returns `None` if `SUPPORT_SMTP_HOST` is not set (notifications go to the log).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(host) = std::env::var("SUPPORT_SMTP_HOST") else {
            return Ok(None);
        };

        let username = std::env::var("SUPPORT_SMTP_USERNAME").unwrap_or_default();
        let recipients: Vec<String> = std::env::var("SUPPORT_SMTP_RECIPIENTS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(ConfigError::MissingEnvVar("SUPPORT_SMTP_RECIPIENTS".into()));
        }

        Ok(Some(Self {
            host,
            port: parse_env("SUPPORT_SMTP_PORT", 587)?,
            password: SecretString::from(std::env::var("SUPPORT_SMTP_PASSWORD").unwrap_or_default()),
            from_address: std::env::var("SUPPORT_SMTP_FROM").unwrap_or_else(|_| username.clone()),
            username,
            recipients,
        }))
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, rejecting values that are set but malformed.
fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
