//! Pipeline stages.
//!
//! Three roles, leaf-first:
//! - `gatherer`: entry point, runs once per topic, emits a `Data` envelope
//! - `analyzer`: `Data` → `Analysis`, keyword fallback on generation failure
//! - `summarizer`: `Analysis` → completion sink, templated fallback
//!
//! Mailbox-driven stages implement [`Stage`]; its provided `drain()` loop
//! owns the per-envelope fault boundary, so one bad envelope never stops the
//! rest of the queue from being handled.

pub mod analyzer;
pub mod gatherer;
pub mod summarizer;

pub use analyzer::Analyzer;
pub use gatherer::{ToolGatherer, WebGatherer};
pub use summarizer::Summarizer;

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use crate::error::{LlmError, StageError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::envelope::{Envelope, MessageKind, StageId};
use crate::pipeline::mailbox::Mailbox;

/// Text that marks a generation result as unusable.
const FAILURE_MARKER: &str = "could not be completed";

/// Temperature for stage generation calls.
const GENERATION_TEMPERATURE: f32 = 0.3;

/// Max tokens for stage generation calls.
const GENERATION_MAX_TOKENS: u32 = 2048;

/// A mailbox-driven stage.
#[async_trait]
pub trait Stage: Send + Sync {
    /// This stage's mailbox address.
    fn id(&self) -> &StageId;

    /// The mailbox this stage drains.
    fn mailbox(&self) -> &Mailbox;

    /// Handle one envelope addressed to this stage.
    async fn handle(&self, envelope: Envelope) -> Result<(), StageError>;

    /// Convert a fault raised while handling an envelope into data
    /// (an `Error` envelope, or a failure report for the terminal stage).
    async fn report_fault(&self, topic: &str, fault: StageError);

    /// Receive and handle envelopes until none are addressed to this stage.
    ///
    /// Returns the number of envelopes handled.
    async fn drain(&self) -> usize {
        let mut handled = 0;
        while let Some(envelope) = self.mailbox().receive(self.id()).await {
            let topic = envelope.topic().to_string();
            let kind = envelope.kind();
            debug!(stage = %self.id(), kind = %kind, topic = %topic, "Handling envelope");

            let outcome = AssertUnwindSafe(self.handle(envelope)).catch_unwind().await;
            let fault = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(panic) => Some(StageError::Fault(panic_message(panic.as_ref()))),
            };

            if let Some(fault) = fault {
                error!(stage = %self.id(), kind = %kind, topic = %topic, error = %fault, "Envelope handling failed");
                self.report_fault(&topic, fault).await;
            }
            handled += 1;
        }
        handled
    }
}

/// Entry-point stage: runs once per orchestrator run.
#[async_trait]
pub trait Gatherer: Send + Sync {
    fn id(&self) -> &StageId;

    /// Short description of where content comes from, for reports.
    fn label(&self) -> &str;

    /// Gather content for `topic` and send exactly one envelope downstream.
    ///
    /// Returns the kind of envelope sent (`Data`, or `Error` on total failure).
    async fn execute(&self, topic: &str) -> MessageKind;
}

/// Call the generation capability and classify the result.
///
/// Errors, timeouts, empty text and failure markers all come back as `Err`,
/// so callers pick their fallback with a single match.
pub async fn generate(
    llm: &dyn LlmProvider,
    system_prompt: &str,
    prompt: String,
    timeout: Duration,
) -> Result<String, LlmError> {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(prompt),
    ])
    .with_temperature(GENERATION_TEMPERATURE)
    .with_max_tokens(GENERATION_MAX_TOKENS);

    let response = tokio::time::timeout(timeout, llm.complete(request))
        .await
        .map_err(|_| LlmError::Timeout {
            provider: llm.model_name().to_string(),
            timeout,
        })??;

    check_generated(response.content)
}

/// Reject empty output and output carrying the failure marker.
pub fn check_generated(text: String) -> Result<String, LlmError> {
    if text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    if text.to_lowercase().contains(FAILURE_MARKER) {
        return Err(LlmError::FailureMarker(text));
    }
    Ok(text)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("stage panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("stage panicked: {s}")
    } else {
        "stage panicked".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn check_generated_rejects_markers_and_blanks() {
        assert!(matches!(check_generated("  ".into()), Err(LlmError::EmptyResponse)));
        assert!(matches!(
            check_generated("Analysis could not be completed due to: quota".into()),
            Err(LlmError::FailureMarker(_))
        ));
        assert_eq!(check_generated("fine".into()).unwrap(), "fine");
    }

    #[tokio::test]
    async fn generate_passes_prompt_through() {
        let text = generate(&EchoLlm, "system", "hello".into(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(text, "OK:hello");
    }

    #[tokio::test]
    async fn generate_maps_provider_errors() {
        let err = generate(&FailingLlm, "system", "hello".into(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }

    #[tokio::test]
    async fn generate_times_out() {
        let err = generate(&HangingLlm, "system", "hello".into(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout { .. }));
    }
}
