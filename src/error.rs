//! Error types for Research Assist.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Malformed envelope payloads, rejected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("{kind} payload field '{field}' must not be empty")]
    EmptyField { kind: String, field: String },

    #[error("Envelope sender and receiver are both '{stage}'")]
    SelfAddressed { stage: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Generation returned a failure marker: {0}")]
    FailureMarker(String),

    #[error("Generation returned an empty response")]
    EmptyResponse,
}

/// Search and tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} returned no results")]
    NoResults { name: String },

    #[error("Tool server is not running")]
    ServerUnavailable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Completion sink errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("A result for topic '{topic}' has already been written")]
    AlreadyWritten { topic: String },
}

/// Faults raised while a stage handles one envelope.
///
/// These never escape `drain()`; the envelope boundary turns them into
/// `Error` envelopes (or terminal failure reports).
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{0}")]
    Schema(#[from] SchemaError),

    #[error("{0}")]
    Sink(#[from] SinkError),

    #[error("{0}")]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Fault(String),
}

