//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Default model name when `MODEL` is unset.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Pipeline configuration.
///
/// Built once by the binary and passed explicitly to every component that
/// needs it. There is no process-wide instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempt budget for flaky external calls (search, tools).
    pub max_retries: u32,
    /// Upper bound on a single generation call.
    pub request_timeout: Duration,
    /// Log filter directive for the binary (e.g. "info", "research_assist=debug").
    pub log_level: String,
    /// Model identifier passed to the LLM backend.
    pub model: String,
    /// Wait between failed search/tool attempts.
    pub search_backoff: Duration,
    /// Maximum number of search hits the gatherer keeps.
    pub max_search_results: usize,
    /// Wall-clock budget for one orchestrator run.
    pub run_timeout: Duration,
    /// Maximum sleep between orchestrator ticks.
    pub poll_interval: Duration,
    /// Use the tool-server gatherer instead of plain web search.
    pub use_mcp: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            log_level: "info".to_string(),
            model: DEFAULT_MODEL.to_string(),
            search_backoff: Duration::from_secs(2),
            max_search_results: 5,
            run_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            use_mcp: true,
        }
    }
}

impl PipelineConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            max_retries: parse_or(&lookup, "MAX_RETRIES", defaults.max_retries)?,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs(),
            )?),
            log_level: lookup("LOG_LEVEL")
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.log_level),
            model: lookup("MODEL")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.model),
            search_backoff: Duration::from_millis(parse_or(
                &lookup,
                "RESEARCH_SEARCH_BACKOFF_MS",
                defaults.search_backoff.as_millis() as u64,
            )?),
            max_search_results: parse_or(
                &lookup,
                "RESEARCH_MAX_RESULTS",
                defaults.max_search_results,
            )?,
            run_timeout: Duration::from_secs(parse_or(
                &lookup,
                "RESEARCH_RUN_TIMEOUT_SECS",
                defaults.run_timeout.as_secs(),
            )?),
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "RESEARCH_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            use_mcp: parse_or(&lookup, "RESEARCH_USE_MCP", defaults.use_mcp)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(invalid("MAX_RETRIES", "must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("RESEARCH_POLL_INTERVAL_MS", "must be greater than 0"));
        }
        if self.run_timeout.is_zero() {
            return Err(invalid("RESEARCH_RUN_TIMEOUT_SECS", "must be greater than 0"));
        }
        Ok(())
    }

    /// Retry budget for search and tool calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.search_backoff)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &format!("'{}': {}", raw.trim(), e))),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = PipelineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.run_timeout, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.use_mcp);
    }

    #[test]
    fn reads_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("MAX_RETRIES", "5"),
            ("REQUEST_TIMEOUT", "10"),
            ("LOG_LEVEL", "DEBUG"),
            ("MODEL", "claude-sonnet-4-20250514"),
            ("RESEARCH_USE_MCP", "false"),
            ("RESEARCH_POLL_INTERVAL_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.model, "claude-sonnet-4-20250514");
        assert!(!config.use_mcp);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn unparseable_value_is_rejected() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("MAX_RETRIES", "lots")])).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "MAX_RETRIES"),
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn zero_retries_is_rejected() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("MAX_RETRIES", "0")])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn retry_policy_mirrors_config() {
        let config = PipelineConfig {
            max_retries: 4,
            search_backoff: Duration::from_millis(20),
            ..PipelineConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.backoff(), Duration::from_millis(20));
    }
}
