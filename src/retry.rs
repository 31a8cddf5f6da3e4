//! Bounded retry around unreliable external calls.
//!
//! `RetryingCaller` never returns an error: when every attempt fails the
//! caller receives a sentinel string naming the exhausted attempt count, so
//! downstream code always has *some* text to work with.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

/// Attempt budget and inter-attempt wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Result of a retried call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// One attempt returned usable text.
    Success { text: String, attempts: u32 },
    /// Every attempt failed or came back empty.
    Exhausted { sentinel: String, attempts: u32 },
}

impl CallOutcome {
    /// The success text or the exhaustion sentinel.
    pub fn text(&self) -> &str {
        match self {
            Self::Success { text, .. } => text,
            Self::Exhausted { sentinel, .. } => sentinel,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Success { text, .. } => text,
            Self::Exhausted { sentinel, .. } => sentinel,
        }
    }

    /// Number of attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Number of backoff waits performed (one between each pair of attempts).
    pub fn backoff_waits(&self) -> u32 {
        self.attempts().saturating_sub(1)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The success text, if any.
    pub fn success(&self) -> Option<&str> {
        match self {
            Self::Success { text, .. } => Some(text),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Sentinel text for an exhausted call.
pub fn exhausted_sentinel(attempts: u32, label: &str) -> String {
    format!("All {attempts} {label} attempts failed")
}

/// Runs a fallible call up to `max_attempts` times with a fixed backoff.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryingCaller {
    policy: RetryPolicy,
}

impl RetryingCaller {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Invoke `attempt` until it yields non-empty text or the budget runs out.
    ///
    /// `label` names the call in logs and in the exhaustion sentinel
    /// (e.g. `"search"` → `"All 3 search attempts failed"`).
    pub async fn call<F, Fut, E>(&self, label: &str, mut attempt: F) -> CallOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: Display,
    {
        let max = self.policy.max_attempts;

        for n in 1..=max {
            info!(call = label, attempt = n, max_attempts = max, "Attempting call");

            match attempt().await {
                Ok(text) if !text.trim().is_empty() => {
                    info!(call = label, attempt = n, "Call succeeded");
                    return CallOutcome::Success { text, attempts: n };
                }
                Ok(_) => {
                    warn!(call = label, attempt = n, "Call returned an empty result");
                }
                Err(e) => {
                    error!(call = label, attempt = n, error = %e, "Call failed");
                }
            }

            if n < max {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        let sentinel = exhausted_sentinel(max, label);
        error!(call = label, attempts = max, "{}", sentinel);
        CallOutcome::Exhausted {
            sentinel,
            attempts: max,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use super::*;

    fn caller(max: u32, backoff_ms: u64) -> RetryingCaller {
        RetryingCaller::new(RetryPolicy::new(max, Duration::from_millis(backoff_ms)))
    }

    #[test]
    fn policy_clamps_zero_attempts() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test]
    async fn immediate_success_makes_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = caller(3, 10)
            .call("search", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("result".to_string())
                }
            })
            .await;

        assert_eq!(outcome, CallOutcome::Success { text: "result".into(), attempts: 1 });
        assert_eq!(outcome.backoff_waits(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = Instant::now();
        let outcome = caller(3, 20)
            .call("search", move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("transient failure {n}"))
                    } else {
                        Ok("third time lucky".to_string())
                    }
                }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.text(), "third time lucky");
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.backoff_waits(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn always_failing_returns_sentinel() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = caller(3, 1)
            .call("search", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<String, _>("down")
                }
            })
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.text(), "All 3 search attempts failed");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_results_count_as_failures() {
        let outcome = caller(2, 1)
            .call("tool", || async { Ok::<_, String>("   ".to_string()) })
            .await;
        assert_eq!(
            outcome,
            CallOutcome::Exhausted {
                sentinel: "All 2 tool attempts failed".into(),
                attempts: 2
            }
        );
    }

    #[tokio::test]
    async fn no_wait_after_final_attempt() {
        let start = Instant::now();
        let outcome = caller(1, 500)
            .call("search", || async { Err::<String, _>("nope") })
            .await;
        assert_eq!(outcome.attempts(), 1);
        assert!(start.elapsed() < Duration::from_millis(400));
    }
}
