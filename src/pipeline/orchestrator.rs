//! Orchestrator: runs one topic through gather → analyze → summarize.
//!
//! Each run gets a fresh mailbox and completion sink. The gatherer runs
//! once; then the orchestrator ticks, draining the analyzer and then the
//! summarizer, until a result for the topic lands in the sink or the
//! wall-clock budget runs out. Every await inside a run is bounded by the
//! remaining budget, so a hung generation call cannot outlive the run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::mailbox::Mailbox;
use super::report::render_failure;
use super::sink::{CompletionSink, PipelineResult};
use crate::config::PipelineConfig;
use crate::llm::LlmProvider;
use crate::retry::RetryingCaller;
use crate::stages::{Analyzer, Gatherer, Stage, Summarizer, ToolGatherer, WebGatherer};
use crate::tools::{SearchProvider, ToolServer};

// ── Run state ───────────────────────────────────────────────────────

/// Lifecycle of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Run created, gatherer not started.
    Idle,
    /// Stages are being driven.
    Running,
    /// A summary was written for the topic.
    Completed,
    /// The budget ran out before a result appeared.
    TimedOut,
    /// An error reached the terminal stage.
    Failed,
}

impl RunState {
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::*;

        matches!(
            (self, target),
            (Idle, Running)
                | (Idle, Failed)
                | (Running, Completed)
                | (Running, TimedOut)
                | (Running, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Tracks the state of a run and logs each transition.
struct RunTracker {
    state: RunState,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
        }
    }

    fn transition_to(&mut self, target: RunState, reason: &str) {
        if !self.state.can_transition_to(target) {
            warn!(from = %self.state, to = %target, "Ignoring invalid run state transition");
            return;
        }
        info!(from = %self.state, to = %target, reason, "Run state changed");
        self.state = target;
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Final result of one run. Runs never raise; every ending is one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        topic: String,
        report: String,
        fallback: bool,
        source: String,
        elapsed: Duration,
    },
    TimedOut {
        topic: String,
        budget: Duration,
        elapsed: Duration,
    },
    Failed {
        topic: String,
        report: String,
        elapsed: Duration,
    },
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            Self::Completed { .. } => RunState::Completed,
            Self::TimedOut { .. } => RunState::TimedOut,
            Self::Failed { .. } => RunState::Failed,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            Self::Completed { topic, .. } | Self::TimedOut { topic, .. } | Self::Failed { topic, .. } => {
                topic
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Completed { elapsed, .. }
            | Self::TimedOut { elapsed, .. }
            | Self::Failed { elapsed, .. } => *elapsed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// The report, or the timeout message.
    pub fn text(&self) -> String {
        match self {
            Self::Completed { report, .. } | Self::Failed { report, .. } => report.clone(),
            Self::TimedOut { budget, .. } => timeout_message(*budget),
        }
    }

    /// Printable form: status line, body, and for completed runs a footer
    /// describing how the result was produced.
    pub fn render(&self) -> String {
        match self {
            Self::Completed {
                report,
                fallback,
                source,
                elapsed,
                ..
            } => {
                let mode = if *fallback { "templated" } else { "generated" };
                format!(
                    "STATUS: COMPLETED\n\n{report}\n\n\
                     ---\n\
                     Pipeline: gather -> analyze -> summarize\n\
                     Content source: {source}\n\
                     Summary mode: {mode}\n\
                     Elapsed: {:.1}s",
                    elapsed.as_secs_f64()
                )
            }
            Self::TimedOut { budget, .. } => {
                format!("STATUS: TIMED_OUT\n\n{}", timeout_message(*budget))
            }
            Self::Failed { report, .. } => format!("STATUS: FAILED\n\n{report}"),
        }
    }
}

/// Message carried by a timed-out run.
pub fn timeout_message(budget: Duration) -> String {
    format!("ERROR: Pipeline timeout after {} seconds", budget.as_secs_f64())
}

// ── Pipeline ────────────────────────────────────────────────────────

/// One run's worth of wired-up stages. Consumed by [`Pipeline::run`].
pub struct Pipeline {
    sink: Arc<CompletionSink>,
    gatherer: Arc<dyn Gatherer>,
    analyzer: Arc<dyn Stage>,
    summarizer: Arc<dyn Stage>,
}

impl Pipeline {
    /// `sink` must be the sink `summarizer` writes to.
    pub fn new(
        sink: Arc<CompletionSink>,
        gatherer: Arc<dyn Gatherer>,
        analyzer: Arc<dyn Stage>,
        summarizer: Arc<dyn Stage>,
    ) -> Self {
        Self {
            sink,
            gatherer,
            analyzer,
            summarizer,
        }
    }

    /// Drive the stages for `topic` until a result appears or `budget` runs out.
    pub async fn run(self, topic: &str, budget: Duration, poll_interval: Duration) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", run_id = %run_id, topic = %topic);
        self.drive(topic, budget, poll_interval).instrument(span).await
    }

    async fn drive(&self, topic: &str, budget: Duration, poll_interval: Duration) -> RunOutcome {
        let started = Instant::now();
        let mut tracker = RunTracker::new();

        // Nothing downstream can file a result under a blank topic.
        if topic.trim().is_empty() {
            error!("Rejecting run with empty topic");
            tracker.transition_to(RunState::Failed, "empty topic");
            return RunOutcome::Failed {
                topic: topic.to_string(),
                report: render_failure(topic, "Research failed: topic must not be empty", Utc::now()),
                elapsed: started.elapsed(),
            };
        }

        tracker.transition_to(RunState::Running, "gatherer starting");
        info!(budget_secs = budget.as_secs_f64(), source = self.gatherer.label(), "Starting research pipeline");

        let gathered = tokio::time::timeout(
            budget,
            AssertUnwindSafe(self.gatherer.execute(topic)).catch_unwind(),
        )
        .await;
        match gathered {
            Err(_) => {
                tracker.transition_to(RunState::TimedOut, "gatherer exceeded budget");
                return self.timed_out(topic, budget, started);
            }
            Ok(Err(_)) => {
                error!(stage = %self.gatherer.id(), "Gatherer panicked");
                tracker.transition_to(RunState::Failed, "gatherer panicked");
                return RunOutcome::Failed {
                    topic: topic.to_string(),
                    report: render_failure(topic, "Research failed: gatherer panicked", Utc::now()),
                    elapsed: started.elapsed(),
                };
            }
            Ok(Ok(kind)) => info!(kind = %kind, "Gatherer finished"),
        }

        loop {
            let Some(remaining) = budget.checked_sub(started.elapsed()) else {
                break;
            };

            let drained = tokio::time::timeout(remaining, async {
                let analyzed = self.analyzer.drain().await;
                let summarized = self.summarizer.drain().await;
                (analyzed, summarized)
            })
            .await;

            match drained {
                Ok((analyzed, summarized)) if analyzed + summarized > 0 => {
                    info!(analyzed, summarized, "Drained stages");
                }
                Ok(_) => {}
                Err(_) => {
                    warn!("Stage drain cut short by run budget");
                    break;
                }
            }

            if let Some(result) = self.sink.take(topic).await {
                let elapsed = started.elapsed();
                return match result {
                    PipelineResult::Summary { report, fallback, .. } => {
                        tracker.transition_to(RunState::Completed, "summary written");
                        info!(elapsed_ms = elapsed.as_millis() as u64, fallback, "Pipeline completed");
                        RunOutcome::Completed {
                            topic: topic.to_string(),
                            report,
                            fallback,
                            source: self.gatherer.label().to_string(),
                            elapsed,
                        }
                    }
                    PipelineResult::Failure { report, .. } => {
                        tracker.transition_to(RunState::Failed, "error reached summarizer");
                        warn!(elapsed_ms = elapsed.as_millis() as u64, "Pipeline failed");
                        RunOutcome::Failed {
                            topic: topic.to_string(),
                            report,
                            elapsed,
                        }
                    }
                };
            }

            let Some(remaining) = budget.checked_sub(started.elapsed()) else {
                break;
            };
            if remaining.is_zero() {
                break;
            }
            self.sink.wait_for_write(poll_interval.min(remaining)).await;
        }

        tracker.transition_to(RunState::TimedOut, "budget exhausted");
        self.timed_out(topic, budget, started)
    }

    fn timed_out(&self, topic: &str, budget: Duration, started: Instant) -> RunOutcome {
        let elapsed = started.elapsed();
        error!(elapsed_ms = elapsed.as_millis() as u64, "{}", timeout_message(budget));
        RunOutcome::TimedOut {
            topic: topic.to_string(),
            budget,
            elapsed,
        }
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

/// Builds and runs pipelines from configuration and shared capabilities.
pub struct Orchestrator {
    config: PipelineConfig,
    llm: Arc<dyn LlmProvider>,
    search: Arc<dyn SearchProvider>,
    tools: Arc<dyn ToolServer>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        llm: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
        tools: Arc<dyn ToolServer>,
    ) -> Self {
        Self {
            config,
            llm,
            search,
            tools,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Wire a fresh mailbox, sink and set of stages.
    pub fn build_pipeline(&self) -> Pipeline {
        let mailbox = Mailbox::new();
        let sink = CompletionSink::new();
        let retry = RetryingCaller::new(self.config.retry_policy());
        let timeout = self.config.request_timeout;

        let gatherer: Arc<dyn Gatherer> = if self.config.use_mcp {
            Arc::new(ToolGatherer::new(mailbox.clone(), self.tools.clone(), retry))
        } else {
            Arc::new(
                WebGatherer::new(mailbox.clone(), self.llm.clone(), self.search.clone(), retry)
                    .with_max_results(self.config.max_search_results)
                    .with_request_timeout(timeout),
            )
        };
        let analyzer = Arc::new(Analyzer::new(mailbox.clone(), self.llm.clone()).with_request_timeout(timeout));
        let summarizer = Arc::new(
            Summarizer::new(mailbox, sink.clone(), self.llm.clone()).with_request_timeout(timeout),
        );

        Pipeline::new(sink, gatherer, analyzer, summarizer)
    }

    /// Run `topic` with the configured budget and poll interval.
    pub async fn run(&self, topic: &str) -> RunOutcome {
        self.run_with(topic, self.config.run_timeout, self.config.poll_interval)
            .await
    }

    pub async fn run_with(&self, topic: &str, budget: Duration, poll_interval: Duration) -> RunOutcome {
        self.build_pipeline().run(topic, budget, poll_interval).await
    }
}
