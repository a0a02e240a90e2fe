//! Support Desk — AI-enriched customer support ticket pipeline.

pub mod api;
pub mod config;
pub mod errlog;
pub mod error;
pub mod llm;
pub mod notify;
pub mod pipeline;
pub mod store;
pub mod worker;
