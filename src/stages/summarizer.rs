//! Summarizer: terminal stage, writes finished reports to the completion sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use super::{Stage, generate};
use crate::error::StageError;
use crate::llm::LlmProvider;
use crate::pipeline::envelope::{AnalysisBody, AnalysisPayload, Envelope, ErrorPayload, Payload, StageId};
use crate::pipeline::mailbox::Mailbox;
use crate::pipeline::report::{
    FALLBACK_SUMMARY_STATUS, FallbackSummary, SummaryBody, render_failure, render_summary,
};
use crate::pipeline::sink::{CompletionSink, PipelineResult};

const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert technical writer who can synthesize \
complex information into clear, actionable summaries.";

pub struct Summarizer {
    id: StageId,
    mailbox: Arc<Mailbox>,
    sink: Arc<CompletionSink>,
    llm: Arc<dyn LlmProvider>,
    request_timeout: Duration,
}

impl Summarizer {
    pub fn new(mailbox: Arc<Mailbox>, sink: Arc<CompletionSink>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            id: StageId::summarizer(),
            mailbox,
            sink,
            llm,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn summarize(&self, analysis: AnalysisPayload) -> Result<(), StageError> {
        info!(topic = %analysis.topic, structured = analysis.analysis.is_structured(), "Summarizer received analysis");

        let prompt = build_summary_prompt(&analysis.topic, &analysis.content, &analysis.analysis.to_text());
        let body = match generate(
            self.llm.as_ref(),
            SUMMARY_SYSTEM_PROMPT,
            prompt,
            self.request_timeout,
        )
        .await
        {
            Ok(text) => SummaryBody::Generated(text),
            Err(e) => {
                warn!(topic = %analysis.topic, error = %e, "Generation failed, using templated summary");
                SummaryBody::Fallback(fallback_summary(&analysis.topic, &analysis.analysis))
            }
        };

        let report = render_summary(&analysis.topic, &body, Utc::now());
        self.sink
            .write(PipelineResult::Summary {
                topic: analysis.topic.clone(),
                report,
                fallback: body.is_fallback(),
            })
            .await?;
        info!(topic = %analysis.topic, fallback = body.is_fallback(), "Summary generation completed");
        Ok(())
    }

    async fn record_failure(&self, err: ErrorPayload) -> Result<(), StageError> {
        error!(topic = %err.topic, error = %err.error, "Summarizer received error");
        let report = render_failure(&err.topic, &err.error, Utc::now());
        self.sink
            .write(PipelineResult::Failure {
                topic: err.topic,
                report,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Stage for Summarizer {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), StageError> {
        match envelope.into_payload() {
            Payload::Analysis(analysis) => self.summarize(analysis).await,
            Payload::Error(err) => self.record_failure(err).await,
            other => {
                warn!(kind = %other.kind(), topic = %other.topic(), "Summarizer ignoring envelope");
                Ok(())
            }
        }
    }

    async fn report_fault(&self, topic: &str, fault: StageError) {
        let report = render_failure(topic, &format!("Summary generation failed: {fault}"), Utc::now());
        let result = PipelineResult::Failure {
            topic: topic.to_string(),
            report,
        };
        if let Err(e) = self.sink.write(result).await {
            error!(stage = %self.id, topic = %topic, error = %e, "Could not record summarizer fault");
        }
    }
}

/// Prompt asking the generation capability for the final summary.
pub fn build_summary_prompt(topic: &str, content: &str, analysis: &str) -> String {
    format!(
        "Create a comprehensive research summary based on the following analysis.\n\n\
         TOPIC: {topic}\n\n\
         RESEARCH DATA:\n{content}\n\n\
         ANALYSIS DATA:\n{analysis}\n\n\
         Please provide a well-structured summary that includes:\n\
         1. Key findings and insights\n\
         2. Main themes and patterns\n\
         3. Important conclusions\n\
         4. Potential implications or recommendations\n\n\
         Format the summary in a clear, professional manner suitable for research reporting."
    )
}

/// Templated summary used when generation is unavailable.
pub fn fallback_summary(topic: &str, analysis: &AnalysisBody) -> FallbackSummary {
    let mut key_findings = Vec::new();
    match analysis {
        AnalysisBody::Structured(record) => {
            if !record.key_themes.is_empty() {
                key_findings.push(format!("Key themes identified: {}", record.key_themes.join(", ")));
            }
            key_findings.push(record.summary.clone());
        }
        AnalysisBody::Text(text) => {
            if let Some(line) = text.lines().map(str::trim).find(|l| !l.is_empty()) {
                key_findings.push(format!("Analysis excerpt: {line}"));
            }
        }
    }
    key_findings.push("Analysis completed with basic summary due to technical constraints".to_string());

    FallbackSummary {
        status: FALLBACK_SUMMARY_STATUS.to_string(),
        topic: topic.to_string(),
        summary: format!("Research summary for {topic} - Generated using fallback method"),
        key_findings,
        conclusion: "This summary was generated using fallback methods. Consider checking API \
                     configuration for enhanced analysis."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::envelope::StructuredAnalysis;
    use crate::stages::test_support::{FailingLlm, PanickyLlm, RecordingLlm};

    fn analysis_envelope(topic: &str, analysis: AnalysisBody) -> Envelope {
        Envelope::new(
            StageId::analyzer(),
            StageId::summarizer(),
            Payload::analysis(topic, "source text", analysis).unwrap(),
        )
        .unwrap()
    }

    fn error_envelope(topic: &str, error: &str) -> Envelope {
        Envelope::new(StageId::analyzer(), StageId::summarizer(), Payload::error(topic, error)).unwrap()
    }

    fn keyword_record() -> StructuredAnalysis {
        StructuredAnalysis {
            status: "fallback_analysis".into(),
            topic: "AI".into(),
            key_themes: vec!["AI".into(), "healthcare".into()],
            summary: "Based on research about AI, key areas discussed include: AI, healthcare".into(),
            insights: "n/a".into(),
            data_length: 42,
        }
    }

    #[test]
    fn prompt_embeds_all_sections() {
        let prompt = build_summary_prompt("AI", "raw", "themes");
        assert!(prompt.contains("TOPIC: AI"));
        assert!(prompt.contains("RESEARCH DATA:\nraw"));
        assert!(prompt.contains("ANALYSIS DATA:\nthemes"));
        assert!(!prompt.to_lowercase().contains("fallback"));
    }

    #[test]
    fn fallback_summary_carries_analysis_themes() {
        let summary = fallback_summary("AI", &AnalysisBody::Structured(keyword_record()));
        assert_eq!(summary.status, FALLBACK_SUMMARY_STATUS);
        assert_eq!(summary.key_findings[0], "Key themes identified: AI, healthcare");
        assert_eq!(summary.key_findings.len(), 3);
    }

    #[tokio::test]
    async fn generated_summary_is_written() {
        let mailbox = Mailbox::new();
        let sink = CompletionSink::new();
        let summarizer = Summarizer::new(
            mailbox.clone(),
            sink.clone(),
            Arc::new(RecordingLlm::new("AI improves triage.")),
        );

        mailbox
            .send(analysis_envelope("AI", AnalysisBody::Text("themes".into())))
            .await;
        summarizer.drain().await;

        match sink.take("AI").await.unwrap() {
            PipelineResult::Summary { report, fallback, .. } => {
                assert!(!fallback);
                assert!(report.contains("Summary:\nAI improves triage."));
                assert!(!report.contains("fallback"));
            }
            other => panic!("Expected Summary, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_generation_writes_fallback_summary() {
        let mailbox = Mailbox::new();
        let sink = CompletionSink::new();
        let summarizer = Summarizer::new(mailbox.clone(), sink.clone(), Arc::new(FailingLlm));

        mailbox
            .send(analysis_envelope("AI", AnalysisBody::Structured(keyword_record())))
            .await;
        summarizer.drain().await;

        match sink.take("AI").await.unwrap() {
            PipelineResult::Summary { report, fallback, .. } => {
                assert!(fallback);
                assert!(report.contains(FALLBACK_SUMMARY_STATUS));
                assert!(report.contains("Key themes identified: AI, healthcare"));
            }
            other => panic!("Expected Summary, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn error_envelope_becomes_failure_report() {
        let mailbox = Mailbox::new();
        let sink = CompletionSink::new();
        let summarizer = Summarizer::new(mailbox.clone(), sink.clone(), Arc::new(FailingLlm));

        mailbox
            .send(error_envelope("AI", "Analysis failed: Research failed: offline"))
            .await;
        summarizer.drain().await;

        let result = sink.take("AI").await.unwrap();
        assert!(matches!(result, PipelineResult::Failure { .. }));
        assert!(result.report().contains("Status: ERROR"));
        assert!(result.report().contains("Error: Analysis failed: Research failed: offline"));
    }

    #[tokio::test]
    async fn duplicate_topic_keeps_first_result_and_keeps_draining() {
        let mailbox = Mailbox::new();
        let sink = CompletionSink::new();
        let summarizer = Summarizer::new(
            mailbox.clone(),
            sink.clone(),
            Arc::new(RecordingLlm::new("done")),
        );

        mailbox.send(analysis_envelope("AI", AnalysisBody::Text("one".into()))).await;
        mailbox.send(analysis_envelope("AI", AnalysisBody::Text("two".into()))).await;
        mailbox.send(analysis_envelope("Bees", AnalysisBody::Text("three".into()))).await;
        assert_eq!(summarizer.drain().await, 3);

        assert!(matches!(sink.take("AI").await, Some(PipelineResult::Summary { .. })));
        assert!(sink.contains("Bees").await);
    }

    #[tokio::test]
    async fn retry_envelopes_are_ignored() {
        let mailbox = Mailbox::new();
        let sink = CompletionSink::new();
        let summarizer = Summarizer::new(mailbox.clone(), sink.clone(), Arc::new(RecordingLlm::new("done")));

        let envelope = Envelope::new(
            StageId::analyzer(),
            StageId::summarizer(),
            Payload::retry("AI", "try again"),
        )
        .unwrap();
        mailbox.send(envelope).await;
        assert_eq!(summarizer.drain().await, 1);
        assert!(mailbox.is_empty().await);
        assert!(!sink.contains("AI").await);
    }

    #[tokio::test]
    async fn panic_while_summarizing_becomes_failure_report() {
        let mailbox = Mailbox::new();
        let sink = CompletionSink::new();
        let summarizer = Summarizer::new(mailbox.clone(), sink.clone(), Arc::new(PanickyLlm { trigger: "boom" }));

        mailbox.send(analysis_envelope("boom", AnalysisBody::Text("one".into()))).await;
        mailbox.send(analysis_envelope("calm", AnalysisBody::Text("two".into()))).await;
        assert_eq!(summarizer.drain().await, 2);

        let result = sink.take("boom").await.unwrap();
        assert!(matches!(result, PipelineResult::Failure { .. }));
        assert!(result.report().contains("Error: Summary generation failed: stage panicked"));
        assert!(matches!(sink.take("calm").await, Some(PipelineResult::Summary { .. })));
    }
}
