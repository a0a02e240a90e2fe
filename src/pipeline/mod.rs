//! Ticket enrichment pipeline.
//!
//! Every queued ticket flows through:
//! 1. `prompt::build_analytics_request()` — model request from ticket content
//! 2. `AnalyticsGenerator::generate()` — model call + `parser`, with fallback
//! 3. `TicketStateUpdater::apply()` — idempotent move to `PROCESSED`
//! 4. `NotificationDispatcher::dispatch()` — alert the support team
//!
//! `BatchConsumer` runs these per message and reports partial failures.

pub mod analytics;
pub mod consumer;
pub mod parser;
pub mod prompt;
pub mod types;
pub mod updater;

pub use analytics::AnalyticsGenerator;
pub use consumer::{BatchConsumer, BatchReport, FailureStage, MessageFailure};
pub use updater::TicketStateUpdater;
