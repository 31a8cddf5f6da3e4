//! Gatherers: entry-point stages that collect raw content for a topic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

use super::{Gatherer, generate};
use crate::error::ToolError;
use crate::llm::LlmProvider;
use crate::pipeline::envelope::{Envelope, MessageKind, Payload, StageId};
use crate::pipeline::mailbox::Mailbox;
use crate::retry::{CallOutcome, RetryingCaller};
use crate::tools::{SearchProvider, ToolServer, format_hits};

const RESEARCH_SYSTEM_PROMPT: &str = "You are an expert researcher who can find comprehensive and \
accurate information about any topic. Organize what you find into clear, factual notes.";

// ── Web search gatherer ─────────────────────────────────────────────

/// Gathers content from a web search provider plus generated research notes.
pub struct WebGatherer {
    id: StageId,
    analyzer: StageId,
    summarizer: StageId,
    mailbox: Arc<Mailbox>,
    llm: Arc<dyn LlmProvider>,
    search: Arc<dyn SearchProvider>,
    retry: RetryingCaller,
    max_results: usize,
    request_timeout: Duration,
}

impl WebGatherer {
    pub fn new(
        mailbox: Arc<Mailbox>,
        llm: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
        retry: RetryingCaller,
    ) -> Self {
        Self {
            id: StageId::gatherer(),
            analyzer: StageId::analyzer(),
            summarizer: StageId::summarizer(),
            mailbox,
            llm,
            search,
            retry,
            max_results: 5,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn search_sources(&self, topic: &str) -> CallOutcome {
        let search = &self.search;
        let max_results = self.max_results;
        self.retry
            .call("search", move || async move {
                let hits = search.search(topic, max_results).await?;
                if hits.is_empty() {
                    return Err(ToolError::NoResults {
                        name: search.name().to_string(),
                    });
                }
                info!(hits = hits.len(), "Search returned results");
                Ok(format_hits(&hits))
            })
            .await
    }
}

#[async_trait]
impl Gatherer for WebGatherer {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn label(&self) -> &str {
        "Web search"
    }

    async fn execute(&self, topic: &str) -> MessageKind {
        info!(stage = %self.id, topic = %topic, "Gatherer starting work");

        let sources = self.search_sources(topic).await;

        let mut prompt = format!("Research this topic and gather comprehensive information: {topic}");
        if let Some(text) = sources.success() {
            prompt.push_str("\n\nUse these sources:\n");
            prompt.push_str(text);
        }
        let notes = generate(
            self.llm.as_ref(),
            RESEARCH_SYSTEM_PROMPT,
            prompt,
            self.request_timeout,
        )
        .await;

        let content = match (sources.success(), notes) {
            (Some(sources), Ok(notes)) => format!("{}\n\nSOURCES:\n{}", notes.trim(), sources),
            (Some(sources), Err(e)) => {
                warn!(topic = %topic, error = %e, "Note generation failed, sending sources only");
                sources.to_string()
            }
            (None, Ok(notes)) => {
                warn!(topic = %topic, "{}", sources.text());
                notes
            }
            (None, Err(e)) => {
                let reason = format!("Research failed: {}; {}", sources.text(), e);
                return send_error(&self.mailbox, &self.id, &self.summarizer, topic, reason).await;
            }
        };

        let payload = match Payload::data(topic, content) {
            Ok(payload) => payload,
            Err(e) => {
                let reason = format!("Research failed: {e}");
                return send_error(&self.mailbox, &self.id, &self.summarizer, topic, reason).await;
            }
        };

        match Envelope::new(self.id.clone(), self.analyzer.clone(), payload) {
            Ok(envelope) => {
                let envelope = envelope
                    .with_metadata("search_attempts", json!(sources.attempts()))
                    .with_metadata("sources_found", json!(sources.is_success()));
                self.mailbox.send(envelope).await;
                info!(topic = %topic, "Research completed and sent to analyzer");
                MessageKind::Data
            }
            Err(e) => {
                let reason = format!("Research failed: {e}");
                send_error(&self.mailbox, &self.id, &self.summarizer, topic, reason).await
            }
        }
    }
}

// ── Tool-server gatherer ────────────────────────────────────────────

/// Gathers content through named tools on a [`ToolServer`].
pub struct ToolGatherer {
    id: StageId,
    analyzer: StageId,
    summarizer: StageId,
    mailbox: Arc<Mailbox>,
    server: Arc<dyn ToolServer>,
    retry: RetryingCaller,
}

impl ToolGatherer {
    pub fn new(mailbox: Arc<Mailbox>, server: Arc<dyn ToolServer>, retry: RetryingCaller) -> Self {
        Self {
            id: StageId::mcp_gatherer(),
            analyzer: StageId::analyzer(),
            summarizer: StageId::summarizer(),
            mailbox,
            server,
            retry,
        }
    }

    async fn call_tool(&self, name: &'static str, params: serde_json::Value) -> CallOutcome {
        let server = &self.server;
        let params = &params;
        self.retry
            .call(name, move || async move { server.call_tool(name, params).await })
            .await
    }
}

#[async_trait]
impl Gatherer for ToolGatherer {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn label(&self) -> &str {
        "MCP (Model Context Protocol) tools"
    }

    async fn execute(&self, topic: &str) -> MessageKind {
        info!(stage = %self.id, topic = %topic, "Tool gatherer starting work");

        let tools_available = self.server.start().await;
        let content = if tools_available {
            let (search, analysis) = futures::join!(
                self.call_tool(
                    "web_search",
                    json!({ "query": format!("latest developments in {topic}") })
                ),
                self.call_tool(
                    "data_analysis",
                    json!({ "data": format!("Research data about {topic}") })
                ),
            );

            if !search.is_success() && !analysis.is_success() {
                let reason = format!(
                    "MCP Research failed: {}; {}",
                    search.text(),
                    analysis.text()
                );
                return send_error(&self.mailbox, &self.id, &self.summarizer, topic, reason).await;
            }

            format!(
                "MCP-ENHANCED RESEARCH:\n{}\n\nMCP ANALYSIS:\n{}",
                search.text(),
                analysis.text()
            )
        } else {
            warn!(topic = %topic, "Tool server unavailable, using basic research");
            format!("Basic research results for: {topic}")
        };

        let envelope = Payload::data(topic, content)
            .and_then(|payload| Envelope::new(self.id.clone(), self.analyzer.clone(), payload));

        match envelope {
            Ok(envelope) => {
                self.mailbox
                    .send(envelope.with_metadata("mcp_tools_used", json!(tools_available)))
                    .await;
                info!(topic = %topic, tools_used = tools_available, "Tool research sent to analyzer");
                MessageKind::Data
            }
            Err(e) => {
                let reason = format!("MCP Research failed: {e}");
                send_error(&self.mailbox, &self.id, &self.summarizer, topic, reason).await
            }
        }
    }
}

/// Report a total gathering failure straight to the terminal stage.
async fn send_error(
    mailbox: &Mailbox,
    from: &StageId,
    to: &StageId,
    topic: &str,
    reason: String,
) -> MessageKind {
    error!(stage = %from, topic = %topic, error = %reason, "Gathering failed");
    match Envelope::new(from.clone(), to.clone(), Payload::error(topic, reason)) {
        Ok(envelope) => mailbox.send(envelope).await,
        Err(e) => error!(stage = %from, error = %e, "Could not build error envelope"),
    }
    MessageKind::Error
}
