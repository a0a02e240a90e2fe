//! Prompt construction for ticket analytics.

use crate::config::AnalyticsConfig;
use crate::llm::provider::{ChatMessage, CompletionRequest};
use crate::pipeline::types::Urgency;

/// Build the analytics prompt text for a ticket body.
///
/// The content is embedded verbatim; length limits are enforced by the caller.
pub fn build_analytics_prompt(content: &str) -> String {
    let levels = Urgency::ALL
        .iter()
        .map(Urgency::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Analyze the following customer support ticket and provide:\n\
         1. Urgency level, using exactly one of: {levels}\n\
         2. A professional response to the customer\n\n\
         Ticket: {content}\n\n\
         Respond with ONLY valid JSON in this format:\n\
         {{\n    \"urgency\": \"The ticket urgency level\",\n    \"response\": \"Your response to the ticket\"\n}}"
    )
}

/// Build the model request for a ticket body.
pub fn build_analytics_request(content: &str, config: &AnalyticsConfig) -> CompletionRequest {
    CompletionRequest::new(vec![ChatMessage::user(build_analytics_prompt(content))])
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature)
        .with_top_p(config.top_p)
}
