//! Completion sink: topic-keyed store of finished pipeline results.
//!
//! Written once per topic by the terminal stage, taken once by the
//! orchestrator. Writers signal a [`Notify`] so the orchestrator can wake
//! early instead of sleeping out its full poll interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::info;

use super::envelope::MessageKind;
use crate::error::SinkError;

/// A finished result for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    /// The summarizer produced a report (generated or fallback).
    Summary {
        topic: String,
        report: String,
        fallback: bool,
    },
    /// An error reached the terminal stage.
    Failure { topic: String, report: String },
}

impl PipelineResult {
    pub fn topic(&self) -> &str {
        match self {
            Self::Summary { topic, .. } | Self::Failure { topic, .. } => topic,
        }
    }

    pub fn report(&self) -> &str {
        match self {
            Self::Summary { report, .. } | Self::Failure { report, .. } => report,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Summary { .. } => MessageKind::Summary,
            Self::Failure { .. } => MessageKind::Error,
        }
    }
}

/// Per-run completion sink.
pub struct CompletionSink {
    results: Mutex<HashMap<String, PipelineResult>>,
    written: Notify,
}

impl CompletionSink {
    /// Create a new, empty sink. Allocate one per orchestrator run.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(HashMap::new()),
            written: Notify::new(),
        })
    }

    /// Store the result for its topic. Each topic may be written once.
    pub async fn write(&self, result: PipelineResult) -> Result<(), SinkError> {
        let topic = result.topic().to_string();
        {
            let mut results = self.results.lock().await;
            if results.contains_key(&topic) {
                return Err(SinkError::AlreadyWritten { topic });
            }
            results.insert(topic.clone(), result);
        }
        info!(topic = %topic, "Result written to completion sink");
        self.written.notify_one();
        Ok(())
    }

    /// Remove and return the result for `topic`, if present.
    pub async fn take(&self, topic: &str) -> Option<PipelineResult> {
        self.results.lock().await.remove(topic)
    }

    pub async fn contains(&self, topic: &str) -> bool {
        self.results.lock().await.contains_key(topic)
    }

    /// Wait until some result is written or `timeout` elapses.
    pub async fn wait_for_write(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.written.notified()).await;
    }
}
