//! Analytics generator — model call plus parse, with a safe fallback.
//!
//! `generate` is total: every model or parse failure is reported and replaced
//! by [`fallback_analytics`], so one bad reply never stalls a batch.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::config::AnalyticsConfig;
use crate::errlog::ErrorReporter;
use crate::error::LlmError;
use crate::llm::provider::{FinishReason, LlmProvider};
use crate::pipeline::parser::parse_analytics_reply;
use crate::pipeline::prompt::build_analytics_request;
use crate::pipeline::types::{SupportTicketMessage, TicketAnalytics, Urgency};

/// Response sent when the model could not produce usable analytics.
pub const FALLBACK_RESPONSE: &str = "Thank you for contacting support. We have received your request and will get back to you soon.";

/// Analytics used when the model call or parse fails.
pub fn fallback_analytics() -> TicketAnalytics {
    TicketAnalytics {
        urgency: Urgency::Medium,
        response: FALLBACK_RESPONSE.to_string(),
    }
}

/// Turns a ticket message into urgency + suggested response.
pub struct AnalyticsGenerator {
    llm: Arc<dyn LlmProvider>,
    reporter: Arc<ErrorReporter>,
    config: AnalyticsConfig,
}

impl AnalyticsGenerator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        reporter: Arc<ErrorReporter>,
        config: AnalyticsConfig,
    ) -> Self {
        Self {
            llm,
            reporter,
            config,
        }
    }

    /// Produce analytics for a message. Never fails.
    pub async fn generate(&self, message: &SupportTicketMessage) -> TicketAnalytics {
        let raw = match self.call_model(&message.content).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(ticket_id = %message.ticket_id, error = %e, "Model call failed, using fallback analytics");
                self.reporter
                    .report(&message.ticket_id, &e, json!({"stage": "model_call"}))
                    .await;
                return fallback_analytics();
            }
        };

        match parse_analytics_reply(&raw) {
            Ok(analytics) => {
                debug!(
                    ticket_id = %message.ticket_id,
                    urgency = %analytics.urgency,
                    "Generated ticket analytics"
                );
                analytics
            }
            Err(e) => {
                warn!(
                    ticket_id = %message.ticket_id,
                    error = %e,
                    raw_response = %raw,
                    "Failed to parse model reply, using fallback analytics"
                );
                self.reporter
                    .report(&message.ticket_id, &e, json!({"stage": "parse_response"}))
                    .await;
                fallback_analytics()
            }
        }
    }

    /// Invoke the model and return its raw text reply.
    async fn call_model(&self, content: &str) -> Result<String, LlmError> {
        let used = content.chars().count();
        if used > self.config.max_input_chars {
            return Err(LlmError::ContextLengthExceeded {
                used,
                limit: self.config.max_input_chars,
            });
        }

        let request = build_analytics_request(content, &self.config);
        let response = tokio::time::timeout(self.config.model_timeout, self.llm.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.llm.model_name().to_string(),
                timeout: self.config.model_timeout,
            })??;

        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Model call complete"
        );
        if response.finish_reason == FinishReason::Length {
            // The parser still gets a chance; a cut-off object falls back.
            warn!(model = self.llm.model_name(), "Model reply hit the token limit");
        }
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::errlog::{ErrorLogEntry, ErrorLogSink};
    use crate::error::DatabaseError;
    use crate::llm::provider::{CompletionRequest, CompletionResponse};

    enum Reply {
        Text(&'static str),
        Fail,
        Hang,
    }

    struct MockLlm {
        reply: Reply,
        calls: Mutex<Vec<CompletionRequest>>,
    }

    impl MockLlm {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-model"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.lock().unwrap().push(request);
            match self.reply {
                Reply::Text(text) => Ok(CompletionResponse {
                    content: text.to_string(),
                    input_tokens: 10,
                    output_tokens: 5,
                    finish_reason: FinishReason::Stop,
                }),
                Reply::Fail => Err(LlmError::RateLimited {
                    provider: "mock".into(),
                    retry_after: None,
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(LlmError::RequestFailed {
                        provider: "mock".into(),
                        reason: "unreachable".into(),
                    })
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<ErrorLogEntry>>,
    }

    #[async_trait]
    impl ErrorLogSink for RecordingSink {
        async fn write_entry(&self, entry: &ErrorLogEntry) -> Result<(), DatabaseError> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    fn generator(llm: Arc<MockLlm>, config: AnalyticsConfig) -> (AnalyticsGenerator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let reporter = Arc::new(ErrorReporter::new(Some(sink.clone()), "svc", "test", "mock-model"));
        (AnalyticsGenerator::new(llm, reporter, config), sink)
    }

    fn message(content: &str) -> SupportTicketMessage {
        SupportTicketMessage {
            ticket_id: "t-1".into(),
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn success_returns_parsed_analytics() {
        let llm = MockLlm::new(Reply::Text(
            r#"Here it is: {"urgency":"HIGH","response":"We are resetting your password."}"#,
        ));
        let (generator, sink) = generator(llm.clone(), AnalyticsConfig::default());

        let analytics = generator.generate(&message("Password reset broken")).await;
        assert_eq!(analytics.urgency, Urgency::High);
        assert_eq!(analytics.response, "We are resetting your password.");
        assert!(sink.entries.lock().unwrap().is_empty());

        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].messages[0].content.contains("Password reset broken"));
        assert_eq!(calls[0].max_tokens, Some(512));
    }

    #[tokio::test]
    async fn model_failure_falls_back_and_reports() {
        let (generator, sink) = generator(MockLlm::new(Reply::Fail), AnalyticsConfig::default());

        let analytics = generator.generate(&message("help")).await;
        assert_eq!(analytics, fallback_analytics());

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ticket_id, "t-1");
        assert_eq!(entries[0].context["stage"], "model_call");
        assert_eq!(entries[0].context["modelId"], "mock-model");
    }

    #[tokio::test]
    async fn timeout_falls_back() {
        let config = AnalyticsConfig {
            model_timeout: Duration::from_millis(20),
            ..AnalyticsConfig::default()
        };
        let (generator, sink) = generator(MockLlm::new(Reply::Hang), config);

        let analytics = generator.generate(&message("help")).await;
        assert_eq!(analytics, fallback_analytics());
        assert!(sink.entries.lock().unwrap()[0].error.message.contains("timed out"));
    }

    #[tokio::test]
    async fn oversized_content_falls_back_without_calling_model() {
        let config = AnalyticsConfig {
            max_input_chars: 10,
            ..AnalyticsConfig::default()
        };
        let llm = MockLlm::new(Reply::Text(r#"{"urgency":"LOW","response":"x"}"#));
        let (generator, sink) = generator(llm.clone(), config);

        let analytics = generator.generate(&message("this content is far too long")).await;
        assert_eq!(analytics, fallback_analytics());
        assert!(llm.calls.lock().unwrap().is_empty());
        assert_eq!(sink.entries.lock().unwrap()[0].context["stage"], "model_call");
    }

    #[tokio::test]
    async fn reply_without_json_falls_back() {
        let (generator, sink) = generator(
            MockLlm::new(Reply::Text("I'm sorry, I can't help with that.")),
            AnalyticsConfig::default(),
        );

        let analytics = generator.generate(&message("help")).await;
        assert_eq!(analytics.urgency, Urgency::Medium);
        assert_eq!(analytics.response, FALLBACK_RESPONSE);
        assert_eq!(sink.entries.lock().unwrap()[0].context["stage"], "parse_response");
    }

    #[tokio::test]
    async fn unknown_urgency_keeps_response() {
        let (generator, sink) = generator(
            MockLlm::new(Reply::Text(r#"{"urgency":"SEVERE","response":"Looking into it."}"#)),
            AnalyticsConfig::default(),
        );

        let analytics = generator.generate(&message("help")).await;
        assert_eq!(analytics.urgency, Urgency::Medium);
        assert_eq!(analytics.response, "Looking into it.");
        assert!(sink.entries.lock().unwrap().is_empty());
    }
}
