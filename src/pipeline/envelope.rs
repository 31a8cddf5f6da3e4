//! Envelope model: the only thing stages exchange.
//!
//! An [`Envelope`] is addressed (`sender` → `receiver`), typed by its
//! [`Payload`] variant, and immutable once built. Each payload variant has
//! one concrete record type, so "kind determines shape" holds by
//! construction. The one non-text body, a structured analysis record, is
//! stringified deterministically by [`AnalysisBody::to_text`].

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SchemaError;

/// Topic used when the real topic cannot be recovered.
pub const UNKNOWN_TOPIC: &str = "unknown";

// ── Stage identifiers ───────────────────────────────────────────────

/// Address of a stage in the mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(String);

impl StageId {
    pub const GATHERER: &'static str = "research_agent";
    pub const MCP_GATHERER: &'static str = "mcp_research_agent";
    pub const ANALYZER: &'static str = "analysis_agent";
    pub const SUMMARIZER: &'static str = "summary_agent";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn gatherer() -> Self {
        Self::new(Self::GATHERER)
    }

    pub fn mcp_gatherer() -> Self {
        Self::new(Self::MCP_GATHERER)
    }

    pub fn analyzer() -> Self {
        Self::new(Self::ANALYZER)
    }

    pub fn summarizer() -> Self {
        Self::new(Self::SUMMARIZER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ── Message kinds ───────────────────────────────────────────────────

/// Closed set of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Gathered source content.
    Data,
    /// Analysis of gathered content.
    Analysis,
    /// Terminal result. Written to the completion sink, never queued.
    Summary,
    /// A failure travelling toward the sink.
    Error,
    /// Reserved; nothing produces it today.
    Retry,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Analysis => "analysis",
            Self::Summary => "summary",
            Self::Error => "error",
            Self::Retry => "retry",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Payload records ─────────────────────────────────────────────────

/// Status field carried by every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPayload {
    pub topic: String,
    pub content: String,
    pub status: PayloadStatus,
}

/// Structured analysis record, produced when the analyzer degrades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredAnalysis {
    pub status: String,
    pub topic: String,
    pub key_themes: Vec<String>,
    pub summary: String,
    pub insights: String,
    pub data_length: usize,
}

/// Analysis result: free text from the generation capability, or a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisBody {
    Text(String),
    Structured(StructuredAnalysis),
}

impl AnalysisBody {
    /// Text rendering used when embedding the analysis in a prompt.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(record) => {
                serde_json::to_string(record).unwrap_or_else(|_| format!("{:?}", record))
            }
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisPayload {
    pub topic: String,
    pub content: String,
    pub analysis: AnalysisBody,
    pub status: PayloadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub topic: String,
    pub error: String,
    pub status: PayloadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryPayload {
    pub topic: String,
    pub reason: String,
}

/// Typed payload; the variant is the envelope's kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Data(DataPayload),
    Analysis(AnalysisPayload),
    Error(ErrorPayload),
    Retry(RetryPayload),
}

impl Payload {
    /// Source content for the analyzer. `topic` must be non-empty.
    pub fn data(topic: impl Into<String>, content: impl Into<String>) -> Result<Self, SchemaError> {
        let topic = require_topic(MessageKind::Data, topic.into())?;
        Ok(Self::Data(DataPayload {
            topic,
            content: content.into(),
            status: PayloadStatus::Success,
        }))
    }

    /// Analysis for the summarizer. `topic` and the analysis must be non-empty.
    pub fn analysis(
        topic: impl Into<String>,
        content: impl Into<String>,
        analysis: AnalysisBody,
    ) -> Result<Self, SchemaError> {
        let topic = require_topic(MessageKind::Analysis, topic.into())?;
        if let AnalysisBody::Text(ref text) = analysis
            && text.trim().is_empty()
        {
            return Err(SchemaError::EmptyField {
                kind: MessageKind::Analysis.to_string(),
                field: "analysis".to_string(),
            });
        }
        Ok(Self::Analysis(AnalysisPayload {
            topic,
            content: content.into(),
            analysis,
            status: PayloadStatus::Success,
        }))
    }

    /// Error report. Never fails: a blank topic becomes [`UNKNOWN_TOPIC`].
    pub fn error(topic: impl Into<String>, error: impl Into<String>) -> Self {
        let topic = topic.into();
        let topic = if topic.trim().is_empty() {
            UNKNOWN_TOPIC.to_string()
        } else {
            topic
        };
        Self::Error(ErrorPayload {
            topic,
            error: error.into(),
            status: PayloadStatus::Error,
        })
    }

    pub fn retry(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Retry(RetryPayload {
            topic: topic.into(),
            reason: reason.into(),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Data(_) => MessageKind::Data,
            Self::Analysis(_) => MessageKind::Analysis,
            Self::Error(_) => MessageKind::Error,
            Self::Retry(_) => MessageKind::Retry,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            Self::Data(p) => &p.topic,
            Self::Analysis(p) => &p.topic,
            Self::Error(p) => &p.topic,
            Self::Retry(p) => &p.topic,
        }
    }
}

fn require_topic(kind: MessageKind, topic: String) -> Result<String, SchemaError> {
    if topic.trim().is_empty() {
        return Err(SchemaError::EmptyField {
            kind: kind.to_string(),
            field: "topic".to_string(),
        });
    }
    Ok(topic)
}

// ── Envelope ────────────────────────────────────────────────────────

/// One addressed, typed message between stages.
#[derive(Debug, Clone)]
pub struct Envelope {
    id: Uuid,
    sender: StageId,
    receiver: StageId,
    payload: Payload,
    timestamp: Instant,
    metadata: HashMap<String, Value>,
}

impl Envelope {
    /// Build an envelope. Fails if `sender == receiver`.
    pub fn new(sender: StageId, receiver: StageId, payload: Payload) -> Result<Self, SchemaError> {
        if sender == receiver {
            return Err(SchemaError::SelfAddressed {
                stage: sender.to_string(),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            payload,
            timestamp: Instant::now(),
            metadata: HashMap::new(),
        })
    }

    /// Attach a metadata entry. Only possible before the envelope is sent.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sender(&self) -> &StageId {
        &self.sender
    }

    pub fn receiver(&self) -> &StageId {
        &self.receiver
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn topic(&self) -> &str {
        self.payload.topic()
    }

    /// Monotonic creation instant.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }
}
