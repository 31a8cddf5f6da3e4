//! Message-routed research pipeline.
//!
//! A run for one topic flows through:
//! 1. `Gatherer::execute()`: collect raw content, send a `Data` envelope
//! 2. `Analyzer`: `Data` → `Analysis` (keyword scan if generation fails)
//! 3. `Summarizer`: `Analysis` → report in the `CompletionSink`
//!
//! Stages only talk through the `Mailbox`. An `Error` envelope may short-cut
//! straight to the summarizer, which records it as a failure report.

pub mod envelope;
pub mod mailbox;
pub mod orchestrator;
pub mod report;
pub mod sink;

pub use envelope::{AnalysisBody, Envelope, MessageKind, Payload, StageId};
pub use mailbox::Mailbox;
pub use orchestrator::{Orchestrator, Pipeline, RunOutcome, RunState};
pub use sink::{CompletionSink, PipelineResult};
