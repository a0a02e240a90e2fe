//! Persistence layer — libSQL-backed ticket store, work queue, and error log.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    QueueEnvelope, ReleaseOutcome, TicketIntake, TicketQueue, TicketStore, UpdateOutcome,
};
