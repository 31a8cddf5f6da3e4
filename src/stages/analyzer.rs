//! Analyzer: turns gathered content into an analysis for the summarizer.
//!
//! When generation fails the analyzer still forwards a result: a keyword
//! scan of the source text, tagged `fallback_analysis` so downstream
//! consumers can tell it apart from a generated analysis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{error, info, warn};

use super::{Stage, generate};
use crate::error::StageError;
use crate::llm::LlmProvider;
use crate::pipeline::envelope::{
    AnalysisBody, DataPayload, Envelope, ErrorPayload, Payload, StageId, StructuredAnalysis,
};
use crate::pipeline::mailbox::Mailbox;

/// Status tag carried by keyword-scan analyses.
pub const FALLBACK_ANALYSIS_STATUS: &str = "fallback_analysis";

/// Keywords scanned for when generation is unavailable.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "AI",
    "artificial intelligence",
    "healthcare",
    "medical",
    "diagnosis",
    "treatment",
];

/// Source text forwarded to the summarizer is cut to this many characters.
pub const CONTENT_PREVIEW_CHARS: usize = 500;

const ANALYSIS_SYSTEM_PROMPT: &str =
    "You are an expert data analyst who can find patterns and insights in any information.";

pub struct Analyzer {
    id: StageId,
    next: StageId,
    mailbox: Arc<Mailbox>,
    llm: Arc<dyn LlmProvider>,
    request_timeout: Duration,
    keywords: Vec<(String, Regex)>,
}

impl Analyzer {
    pub fn new(mailbox: Arc<Mailbox>, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            id: StageId::analyzer(),
            next: StageId::summarizer(),
            mailbox,
            llm,
            request_timeout: Duration::from_secs(30),
            keywords: compile_keywords(DEFAULT_KEYWORDS),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Replace the keyword list used by the fallback scan.
    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = compile_keywords(keywords);
        self
    }

    async fn analyze(&self, data: DataPayload) -> Result<(), StageError> {
        info!(topic = %data.topic, bytes = data.content.len(), "Analyzer received research data");

        let prompt = build_analysis_prompt(&data.topic, &data.content);
        let analysis = match generate(
            self.llm.as_ref(),
            ANALYSIS_SYSTEM_PROMPT,
            prompt,
            self.request_timeout,
        )
        .await
        {
            Ok(text) => AnalysisBody::Text(text),
            Err(e) => {
                warn!(topic = %data.topic, error = %e, "Generation failed, using keyword analysis");
                AnalysisBody::Structured(fallback_analysis(&data.topic, &data.content, &self.keywords))
            }
        };

        let payload = Payload::analysis(
            data.topic.as_str(),
            truncate_content(&data.content, CONTENT_PREVIEW_CHARS),
            analysis,
        )?;
        let envelope = Envelope::new(self.id.clone(), self.next.clone(), payload)?;
        self.mailbox.send(envelope).await;
        info!(topic = %data.topic, "Analysis completed and sent to summarizer");
        Ok(())
    }

    async fn forward_error(&self, err: ErrorPayload) -> Result<(), StageError> {
        warn!(topic = %err.topic, error = %err.error, "Analyzer received error, forwarding");
        let payload = Payload::error(err.topic, format!("Analysis failed: {}", err.error));
        let envelope = Envelope::new(self.id.clone(), self.next.clone(), payload)?;
        self.mailbox.send(envelope).await;
        Ok(())
    }
}

#[async_trait]
impl Stage for Analyzer {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), StageError> {
        match envelope.into_payload() {
            Payload::Data(data) => self.analyze(data).await,
            Payload::Error(err) => self.forward_error(err).await,
            other => {
                warn!(kind = %other.kind(), topic = %other.topic(), "Analyzer ignoring envelope");
                Ok(())
            }
        }
    }

    async fn report_fault(&self, topic: &str, fault: StageError) {
        let payload = Payload::error(topic, format!("Analysis failed: {fault}"));
        match Envelope::new(self.id.clone(), self.next.clone(), payload) {
            Ok(envelope) => self.mailbox.send(envelope).await,
            Err(e) => error!(stage = %self.id, error = %e, "Could not report analyzer fault"),
        }
    }
}

/// Prompt asking the generation capability for an analysis.
pub fn build_analysis_prompt(topic: &str, content: &str) -> String {
    format!(
        "Analyze this research data about {topic} and extract key points, themes, and insights.\n\
         Provide a comprehensive analysis with the most important information.\n\n\
         RESEARCH DATA:\n{content}\n\n\
         Please provide your analysis in a structured format with clear sections."
    )
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn truncate_content(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Keyword-scan analysis used when generation is unavailable.
pub fn fallback_analysis(topic: &str, content: &str, keywords: &[(String, Regex)]) -> StructuredAnalysis {
    let key_themes: Vec<String> = keywords
        .iter()
        .filter(|(_, pattern)| pattern.is_match(content))
        .map(|(keyword, _)| keyword.clone())
        .collect();

    let areas = if key_themes.is_empty() {
        "general topics".to_string()
    } else {
        key_themes.join(", ")
    };

    StructuredAnalysis {
        status: FALLBACK_ANALYSIS_STATUS.to_string(),
        topic: topic.to_string(),
        summary: format!("Based on research about {topic}, key areas discussed include: {areas}"),
        insights: "Analysis completed using fallback method due to technical constraints.".to_string(),
        data_length: content.chars().count(),
        key_themes,
    }
}

/// Case-insensitive substring matchers, one per keyword.
pub fn compile_keywords(keywords: &[&str]) -> Vec<(String, Regex)> {
    keywords
        .iter()
        .map(|kw| {
            // Escaped literal, so the pattern is always valid
            let pattern = Regex::new(&format!("(?i){}", regex::escape(kw))).unwrap();
            (kw.to_string(), pattern)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{EchoLlm, FailingLlm, PanickyLlm, RecordingLlm};

    fn data_envelope(topic: &str, content: &str) -> Envelope {
        Envelope::new(
            StageId::gatherer(),
            StageId::analyzer(),
            Payload::data(topic, content).unwrap(),
        )
        .unwrap()
    }

    async fn next_for_summarizer(mailbox: &Mailbox) -> Payload {
        mailbox
            .receive(&StageId::summarizer())
            .await
            .expect("envelope for summarizer")
            .into_payload()
    }

    #[test]
    fn truncation_appends_ellipsis_only_when_cut() {
        assert_eq!(truncate_content("short", 500), "short");
        let long = "x".repeat(501);
        let cut = truncate_content(&long, 500);
        assert_eq!(cut.len(), 503);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_content("héllo", 2), "hé...");
    }

    #[test]
    fn fallback_scan_is_case_insensitive() {
        let keywords = compile_keywords(DEFAULT_KEYWORDS);
        let record = fallback_analysis("AI in clinics", "New ai tools aid Diagnosis.", &keywords);
        assert_eq!(record.status, FALLBACK_ANALYSIS_STATUS);
        assert_eq!(record.key_themes, vec!["AI", "diagnosis"]);
        assert_eq!(
            record.summary,
            "Based on research about AI in clinics, key areas discussed include: AI, diagnosis"
        );
        assert_eq!(record.data_length, 27);
    }

    #[test]
    fn fallback_without_matches_says_general_topics() {
        let keywords = compile_keywords(DEFAULT_KEYWORDS);
        let record = fallback_analysis("Bees", "Pollination and hives.", &keywords);
        assert!(record.key_themes.is_empty());
        assert!(record.summary.ends_with("general topics"));
    }

    #[test]
    fn prompt_never_mentions_fallback() {
        let prompt = build_analysis_prompt("AI", "data");
        assert!(prompt.contains("about AI"));
        assert!(prompt.contains("RESEARCH DATA:\ndata"));
        assert!(!prompt.to_lowercase().contains("fallback"));
    }

    #[tokio::test]
    async fn generated_analysis_is_forwarded() {
        let mailbox = Mailbox::new();
        let llm = Arc::new(RecordingLlm::new("Themes: AI adoption."));
        let analyzer = Analyzer::new(mailbox.clone(), llm.clone());

        mailbox.send(data_envelope("AI", "AI is useful.")).await;
        assert_eq!(analyzer.drain().await, 1);

        match next_for_summarizer(&mailbox).await {
            Payload::Analysis(p) => {
                assert_eq!(p.topic, "AI");
                assert_eq!(p.content, "AI is useful.");
                assert_eq!(p.analysis, AnalysisBody::Text("Themes: AI adoption.".into()));
            }
            other => panic!("Expected Analysis, got {:?}", other),
        }
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_generation_uses_keyword_analysis() {
        let mailbox = Mailbox::new();
        let analyzer = Analyzer::new(mailbox.clone(), Arc::new(FailingLlm));

        mailbox.send(data_envelope("AI", "AI for medical diagnosis")).await;
        analyzer.drain().await;

        match next_for_summarizer(&mailbox).await {
            Payload::Analysis(p) => match p.analysis {
                AnalysisBody::Structured(record) => {
                    assert_eq!(record.status, FALLBACK_ANALYSIS_STATUS);
                    assert_eq!(record.key_themes, vec!["AI", "medical", "diagnosis"]);
                }
                other => panic!("Expected structured analysis, got {:?}", other),
            },
            other => panic!("Expected Analysis, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failure_marker_counts_as_failed_generation() {
        let mailbox = Mailbox::new();
        let llm = Arc::new(RecordingLlm::new("Analysis could not be completed due to: quota"));
        let analyzer = Analyzer::new(mailbox.clone(), llm);

        mailbox.send(data_envelope("AI", "AI")).await;
        analyzer.drain().await;

        match next_for_summarizer(&mailbox).await {
            Payload::Analysis(p) => assert!(p.analysis.is_structured()),
            other => panic!("Expected Analysis, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn long_content_is_truncated_before_forwarding() {
        let mailbox = Mailbox::new();
        let analyzer = Analyzer::new(mailbox.clone(), Arc::new(EchoLlm));

        mailbox.send(data_envelope("AI", &"a".repeat(800))).await;
        analyzer.drain().await;

        match next_for_summarizer(&mailbox).await {
            Payload::Analysis(p) => assert_eq!(p.content, format!("{}...", "a".repeat(500))),
            other => panic!("Expected Analysis, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn errors_are_forwarded_with_prefix() {
        let mailbox = Mailbox::new();
        let analyzer = Analyzer::new(mailbox.clone(), Arc::new(EchoLlm));

        let envelope = Envelope::new(
            StageId::gatherer(),
            StageId::analyzer(),
            Payload::error("AI", "search offline"),
        )
        .unwrap();
        mailbox.send(envelope).await;
        analyzer.drain().await;

        match next_for_summarizer(&mailbox).await {
            Payload::Error(p) => assert_eq!(p.error, "Analysis failed: search offline"),
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn retry_envelopes_are_ignored() {
        let mailbox = Mailbox::new();
        let analyzer = Analyzer::new(mailbox.clone(), Arc::new(EchoLlm));

        let envelope = Envelope::new(
            StageId::gatherer(),
            StageId::analyzer(),
            Payload::retry("AI", "try again"),
        )
        .unwrap();
        mailbox.send(envelope).await;
        assert_eq!(analyzer.drain().await, 1);
        assert!(mailbox.is_empty().await);
    }

    #[tokio::test]
    async fn fault_on_one_envelope_does_not_stop_the_drain() {
        let mailbox = Mailbox::new();
        let analyzer = Analyzer::new(mailbox.clone(), Arc::new(PanickyLlm { trigger: "boom" }));

        mailbox.send(data_envelope("boom", "first")).await;
        mailbox.send(data_envelope("calm", "second")).await;
        assert_eq!(analyzer.drain().await, 2);

        match next_for_summarizer(&mailbox).await {
            Payload::Error(p) => {
                assert_eq!(p.topic, "boom");
                assert!(p.error.starts_with("Analysis failed: stage panicked"));
            }
            other => panic!("Expected Error, got {:?}", other),
        }
        match next_for_summarizer(&mailbox).await {
            Payload::Analysis(p) => assert_eq!(p.topic, "calm"),
            other => panic!("Expected Analysis, got {:?}", other),
        }
    }
}
