//! Web search capability used by the web gatherer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ToolError;

/// Characters of each snippet kept when formatting sources.
const SNIPPET_PREVIEW_CHARS: usize = 200;

/// DuckDuckGo instant-answer endpoint.
const DUCKDUCKGO_API: &str = "https://api.duckduckgo.com/";

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchHit {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
        }
    }
}

/// Trait for search backends. Results are ordered by relevance.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Run a query, returning at most `max_results` hits.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError>;
}

/// Render hits as numbered source blocks.
pub fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let preview: String = hit.snippet.chars().take(SNIPPET_PREVIEW_CHARS).collect();
            format!(
                "Source {}:\nTitle: {}\nURL: {}\nContent: {}...",
                i + 1,
                hit.title,
                hit.url,
                preview
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── DuckDuckGo ──────────────────────────────────────────────────────

/// Search backed by the DuckDuckGo instant-answer API.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: DUCKDUCKGO_API.to_string(),
        }
    }

    /// Point at a different endpoint (test servers, mirrors).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        debug!(query = query, "Querying DuckDuckGo");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: DdgResponse = response.json().await?;
        let hits = body.into_hits(max_results);
        if hits.is_empty() {
            return Err(ToolError::NoResults {
                name: "duckduckgo".to_string(),
            });
        }
        Ok(hits)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DdgResponse {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<DdgTopic>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DdgTopic {
    Entry {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL")]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<DdgTopic>,
    },
}

impl DdgResponse {
    fn into_hits(self, max_results: usize) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        if !self.abstract_text.is_empty() {
            hits.push(SearchHit::new(
                self.heading.clone(),
                self.abstract_url.clone(),
                self.abstract_text.clone(),
            ));
        }
        collect_topics(self.related_topics, &mut hits);
        hits.truncate(max_results);
        hits
    }
}

fn collect_topics(topics: Vec<DdgTopic>, hits: &mut Vec<SearchHit>) {
    for topic in topics {
        match topic {
            DdgTopic::Entry { text, first_url } => {
                // Topic text reads "Title - description"; the title is the first clause.
                let title = text.split(" - ").next().unwrap_or(&text).to_string();
                hits.push(SearchHit::new(title, first_url, text));
            }
            DdgTopic::Group { topics } => collect_topics(topics, hits),
        }
    }
}
